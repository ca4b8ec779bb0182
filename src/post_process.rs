//! Post-processing: filters and the ping-pong target they run on.
//!
//! ```text
//!  scene ──► attachment 0 ──filter──► attachment 1 ──filter──► screen
//!                 ▲                        │
//!                 └────────── ... ◄────────┘
//! ```
//!
//! Before each filter the renderer publishes the current source attachment
//! as the `inputMap` parameter. A filter draws into the other attachment and
//! reports how many times it flipped source and destination.

use std::sync::Arc;

use glam::{IVec2, Mat3, Vec2, Vec3};
use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::device::{
    DepthStencilDesc, Device, RasterizerDesc, RenderTargetDesc, RenderTargetId, TextureDesc,
    TextureId, Viewport,
};
use crate::effect_pass::{EffectPass, EffectPassDesc, Pass};
use crate::error::Result;
use crate::shader_program::EffectShaderProgram;
use crate::tables::{ParamHandle, ParamType, ParamValue, RenderContext, TextureKind};

/// One step of a camera's filter chain.
pub trait PostProcessFilter: Send + Sync {
    /// Runs the filter reading `inputMap`.
    ///
    /// With `Some(target)` the target is bound and `source` names the color
    /// attachment holding the input. With `None` the filter draws to the
    /// default framebuffer. Returns the number of source/destination flips.
    fn perform(
        &self,
        device: &mut dyn Device,
        ctx: &mut RenderContext,
        target: Option<RenderTargetId>,
        source: u32,
    ) -> u32;
}

enum PassSlot {
    Unbuilt,
    Built(Arc<EffectPass>),
    Failed,
}

/// A pass built on first use.
///
/// A failed build is logged once and remembered until [`reset`](Self::reset),
/// so a broken shader costs one compile attempt rather than one per frame.
pub(crate) struct FilterPass(Mutex<PassSlot>);

impl FilterPass {
    pub(crate) fn new() -> Self {
        Self(Mutex::new(PassSlot::Unbuilt))
    }

    pub(crate) fn get_or_build(
        &self,
        name: &str,
        build: impl FnOnce() -> Result<EffectPass>,
    ) -> Option<Arc<EffectPass>> {
        let mut slot = self.0.lock();
        match &*slot {
            PassSlot::Built(pass) => return Some(Arc::clone(pass)),
            PassSlot::Failed => return None,
            PassSlot::Unbuilt => {}
        }

        match build() {
            Ok(pass) => {
                let pass = Arc::new(pass);
                *slot = PassSlot::Built(Arc::clone(&pass));
                Some(pass)
            }
            Err(err) => {
                error!("Can't create post process filter '{name}': {err}");
                *slot = PassSlot::Failed;
                None
            }
        }
    }

    pub(crate) fn reset(&self) {
        *self.0.lock() = PassSlot::Unbuilt;
    }
}

/// Draws `pass` once over the whole target.
pub(crate) fn draw_fullscreen(device: &mut dyn Device, pass: &EffectPass) {
    pass.begin(device, 0);
    device.draw(0..3, 0..1);
    pass.end(device);
}

/// Draws into the attachment `source` does not name, or to the screen.
/// Returns the flip count for the chain.
fn ping_pong(device: &mut dyn Device, pass: &EffectPass, target: Option<RenderTargetId>, source: u32) -> u32 {
    if target.is_some() {
        device.set_draw_buffer(1 - source % 2);
    }
    draw_fullscreen(device, pass);
    u32::from(target.is_some())
}

pub(crate) fn fullscreen_desc(device: &mut dyn Device, ctx: &mut RenderContext, program: EffectShaderProgram) -> Result<EffectPassDesc> {
    let program = program.with_shader("Post/fullscreen.vert").program(device, ctx)?;
    Ok(EffectPassDesc::new(program)
        .depth_stencil(DepthStencilDesc::disabled())
        .rasterizer(RasterizerDesc::default().cull(None)))
}

/// Draws one full-screen triangle with `Post/fullscreen.vert` and a fragment
/// shader of your choice.
///
/// The pass is built on first use, so the renderer's `inputMap` parameter
/// already exists when the filter resolves it.
pub struct FullscreenFilter {
    fragment: String,
    uniforms: Vec<(String, ParamHandle)>,
    pass: FilterPass,
}

impl FullscreenFilter {
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            uniforms: Vec::new(),
            pass: FilterPass::new(),
        }
    }

    /// Copies the input unchanged.
    pub fn copy() -> Self {
        Self::new("Post/copy.frag")
    }

    /// Feeds an extra uniform from `param`.
    pub fn with_uniform(mut self, uniform: impl Into<String>, param: ParamHandle) -> Self {
        self.uniforms.push((uniform.into(), param));
        self
    }

    /// Drops the built pass, or a remembered build failure, so the next
    /// `perform` builds again.
    pub fn mark_dirty(&self) {
        self.pass.reset();
    }

    fn build(&self, device: &mut dyn Device, ctx: &mut RenderContext) -> Result<EffectPass> {
        let program = EffectShaderProgram::new().with_shader(self.fragment.clone());
        let desc = self.uniforms.iter().fold(
            fullscreen_desc(device, ctx, program)?.uniform("inputMap", "inputMap"),
            |desc, (uniform, param)| desc.uniform_param(uniform.clone(), Some(param.clone())),
        );
        Ok(EffectPass::new(device, ctx, desc))
    }
}

impl PostProcessFilter for FullscreenFilter {
    fn perform(
        &self,
        device: &mut dyn Device,
        ctx: &mut RenderContext,
        target: Option<RenderTargetId>,
        source: u32,
    ) -> u32 {
        match self.pass.get_or_build(&self.fragment, || self.build(device, ctx)) {
            Some(pass) => ping_pong(device, &pass, target, source),
            None => 0,
        }
    }
}

/// Exponential height fog reconstructed from the depth map.
///
/// Reads `inputMap`, `depthMap`, `invProjectionMatrix`, `depthParams` and
/// `normalMatrix` from the parameter table. Fog thins out exponentially above
/// the fog level, measured along world up.
pub struct FogFilter {
    direction: ParamHandle,
    color: ParamHandle,
    density: ParamHandle,
    level: ParamHandle,
    height_falloff: ParamHandle,
    pass: FilterPass,
}

impl Default for FogFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl FogFilter {
    pub fn new() -> Self {
        Self {
            direction: ParamHandle::anonymous(Vec3::Y, false),
            color: ParamHandle::anonymous(Vec3::ONE, false),
            density: ParamHandle::anonymous(0.001f32, false),
            level: ParamHandle::anonymous(0.0f32, false),
            height_falloff: ParamHandle::anonymous(0.01f32, false),
            pass: FilterPass::new(),
        }
    }

    pub fn set_fog_color(&self, color: Vec3) {
        self.color.write_values(color);
    }

    pub fn fog_color(&self) -> Vec3 {
        self.color.read().vec3(0).unwrap_or(Vec3::ONE)
    }

    pub fn set_fog_density(&self, density: f32) {
        self.density.write_values(density);
    }

    pub fn fog_density(&self) -> f32 {
        self.density.read().float(0).unwrap_or_default()
    }

    /// World height where the fog is densest.
    pub fn set_fog_level(&self, level: f32) {
        self.level.write_values(level);
    }

    pub fn fog_level(&self) -> f32 {
        self.level.read().float(0).unwrap_or_default()
    }

    pub fn set_fog_height_falloff(&self, falloff: f32) {
        self.height_falloff.write_values(falloff);
    }

    pub fn fog_height_falloff(&self) -> f32 {
        self.height_falloff.read().float(0).unwrap_or_default()
    }

    pub fn mark_dirty(&self) {
        self.pass.reset();
    }

    fn build(&self, device: &mut dyn Device, ctx: &mut RenderContext) -> Result<EffectPass> {
        let program = EffectShaderProgram::new()
            .with_shader("Post/fog.frag")
            .with_shader("depth.frag");
        let desc = fullscreen_desc(device, ctx, program)?
            .uniform("inputMap", "inputMap")
            .uniform("depthMap", "depthMap")
            .uniform("projectionMatrixInverse", "invProjectionMatrix")
            .uniform("depthParams", "depthParams")
            .uniform_param("fogDirection", Some(self.direction.clone()))
            .uniform_param("fogColor", Some(self.color.clone()))
            .uniform_param("fogDensity", Some(self.density.clone()))
            .uniform_param("fogLevel", Some(self.level.clone()))
            .uniform_param("fogHeightFalloff", Some(self.height_falloff.clone()));
        Ok(EffectPass::new(device, ctx, desc))
    }
}

impl PostProcessFilter for FogFilter {
    fn perform(
        &self,
        device: &mut dyn Device,
        ctx: &mut RenderContext,
        target: Option<RenderTargetId>,
        source: u32,
    ) -> u32 {
        let Some(pass) = self.pass.get_or_build("Post/fog.frag", || self.build(device, ctx)) else {
            return 0;
        };

        // World up in view space.
        let normal = ctx
            .parameters
            .parameter_of_type("normalMatrix", ParamType::Mat3)
            .and_then(|p| p.read().mat3(0))
            .unwrap_or(Mat3::IDENTITY);
        let up = normal * Vec3::Y;
        if self.direction.read().vec3(0) != Some(up) {
            self.direction.write_values(up);
        }

        ping_pong(device, &pass, target, source)
    }
}

/// Radix-2 FFT over the two color attachments of a square target.
///
/// Transforms rows, then columns, flipping attachments after every butterfly
/// stage. The side length must be a power of two. Without a target there is
/// nothing to ping-pong and the filter does nothing.
pub struct FftFilter {
    size: u32,
    input: ParamHandle,
    direction: ParamHandle,
    shift: ParamHandle,
    row_direction: ParamHandle,
    grid_size: ParamHandle,
    partitions: ParamHandle,
    pass: FilterPass,
}

impl FftFilter {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            input: ParamHandle::anonymous(ParamValue::texture_slot(TextureKind::D2), false),
            direction: ParamHandle::anonymous(1.0f32, false),
            shift: ParamHandle::anonymous(Vec2::ZERO, false),
            row_direction: ParamHandle::anonymous(Vec2::X, false),
            grid_size: ParamHandle::anonymous(size as f32, false),
            partitions: ParamHandle::anonymous(0.0f32, false),
            pass: FilterPass::new(),
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// `1` for the forward transform, `-1` for the inverse.
    pub fn set_direction(&self, direction: i32) {
        self.direction.write_values(direction.signum() as f32);
    }

    pub fn direction(&self) -> i32 {
        self.direction.read().float(0).unwrap_or(1.0) as i32
    }

    /// Offset added to texel indices before the phase is computed.
    pub fn set_index_shift(&self, shift: IVec2) {
        self.shift.write_values(shift.as_vec2());
    }

    pub fn index_shift(&self) -> IVec2 {
        self.shift.read().vec2(0).unwrap_or_default().as_ivec2()
    }

    /// Butterfly stages per axis.
    pub fn iterations(&self) -> u32 {
        self.size.max(1).ilog2()
    }

    fn build(&self, device: &mut dyn Device, ctx: &mut RenderContext) -> Result<EffectPass> {
        let program = EffectShaderProgram::new().with_shader("Post/FFT.frag");
        let desc = fullscreen_desc(device, ctx, program)?
            .uniform_param("fftInput", Some(self.input.clone()))
            .uniform_param("direction", Some(self.direction.clone()))
            .uniform_param("shift", Some(self.shift.clone()))
            .uniform_param("rowDirection", Some(self.row_direction.clone()))
            .uniform_param("N", Some(self.grid_size.clone()))
            .uniform_param("numPartitions", Some(self.partitions.clone()));
        Ok(EffectPass::new(device, ctx, desc))
    }
}

impl PostProcessFilter for FftFilter {
    fn perform(
        &self,
        device: &mut dyn Device,
        ctx: &mut RenderContext,
        target: Option<RenderTargetId>,
        source: u32,
    ) -> u32 {
        let Some(target) = target else {
            warn!("FFT filter needs a render target with two color attachments");
            return 0;
        };
        let Some(pass) = self.pass.get_or_build("Post/FFT.frag", || self.build(device, ctx)) else {
            return 0;
        };

        let attachments = [device.render_target_color(target, 0), device.render_target_color(target, 1)];
        let restore = device.current_viewport();
        device.set_viewport(Viewport::new(self.size, self.size));

        let iterations = self.iterations();
        let mut current = source % 2;
        for row_direction in [Vec2::X, Vec2::Y] {
            self.row_direction.write_values(row_direction);
            for i in 1..=iterations {
                self.input.set_texture(attachments[current as usize]);
                self.partitions.write_values((self.size >> i) as f32);
                current = 1 - current;
                device.set_draw_buffer(current);
                draw_fullscreen(device, &pass);
            }
        }

        device.set_viewport(restore);
        2 * iterations
    }
}

/// Two color attachments and a depth attachment, grown to fit the viewport.
#[derive(Debug, Default)]
pub struct PostProcessTarget {
    target: Option<RenderTargetId>,
    color: [Option<(TextureId, u32, u32)>; 2],
    depth: Option<TextureId>,
}

impl PostProcessTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a target at least `width` x `height`, reallocating attachments
    /// that are too small.
    pub fn ensure(&mut self, device: &mut dyn Device, width: u32, height: u32) -> Result<RenderTargetId> {
        let mut dirty = self.target.is_none();

        for attachment in &mut self.color {
            let fits = matches!(attachment, Some((_, w, h)) if *w >= width && *h >= height);
            if fits {
                continue;
            }
            if let Some((old, ..)) = attachment.take() {
                device.destroy_texture(old);
            }
            let texture = device.create_texture(&TextureDesc::color(width, height));
            *attachment = Some((texture, width, height));
            dirty = true;
        }

        match self.target {
            Some(target) if !dirty => Ok(target),
            _ => self.rebuild(device, width, height),
        }
    }

    fn rebuild(&mut self, device: &mut dyn Device, width: u32, height: u32) -> Result<RenderTargetId> {
        debug!("Growing post process target to {width}x{height}");

        if let Some(target) = self.target.take() {
            device.destroy_render_target(target);
        }
        if let Some(depth) = self.depth.take() {
            device.destroy_texture(depth);
        }
        let depth = device.create_texture(&TextureDesc::depth(width, height));
        self.depth = Some(depth);

        let desc = RenderTargetDesc {
            color: self.color.iter().flatten().map(|(texture, ..)| *texture).collect(),
            depth: Some(depth),
        };
        let target = device.create_render_target(&desc)?;
        self.target = Some(target);
        Ok(target)
    }

    pub fn target(&self) -> Option<RenderTargetId> {
        self.target
    }

    pub fn attachment(&self, index: usize) -> Option<TextureId> {
        self.color.get(index).copied().flatten().map(|(texture, ..)| texture)
    }

    pub fn depth(&self) -> Option<TextureId> {
        self.depth
    }

    /// Destroys every attachment and the target.
    pub fn release(&mut self, device: &mut dyn Device) {
        if let Some(target) = self.target.take() {
            device.destroy_render_target(target);
        }
        for (texture, ..) in self.color.iter_mut().filter_map(Option::take) {
            device.destroy_texture(texture);
        }
        if let Some(depth) = self.depth.take() {
            device.destroy_texture(depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;
    use crate::shaders::ShaderLibrary;
    use approx::assert_relative_eq;
    use glam::{Mat4, Vec4};

    #[test]
    fn target_grows_but_never_shrinks() {
        let mut device = HeadlessDevice::new();
        let mut target = PostProcessTarget::new();

        let first = target.ensure(&mut device, 640, 480).unwrap();
        assert_eq!(device.textures_created, 3);
        assert_eq!(device.targets_created, 1);

        assert_eq!(target.ensure(&mut device, 320, 240).unwrap(), first);
        assert_eq!(device.textures_created, 3);

        let grown = target.ensure(&mut device, 1280, 480).unwrap();
        assert_ne!(grown, first);
        assert_eq!(device.targets_created, 2);
        let color = target.attachment(0).unwrap();
        assert_eq!(device.texture_desc(color).unwrap().width, 1280);
        let depth = target.depth().unwrap();
        assert_eq!(device.texture_desc(depth).unwrap().format, wgpu::TextureFormat::Depth24Plus);
    }

    #[test]
    fn fullscreen_filter_samples_input_map() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let input = ctx
            .parameters
            .add_parameter("inputMap", ParamValue::texture_slot(TextureKind::D2), false)
            .unwrap();
        let mut post = PostProcessTarget::new();
        let target = post.ensure(&mut device, 64, 64).unwrap();
        device.bind_render_target(Some(target)).unwrap();

        input.set_texture(post.attachment(0));
        let filter = FullscreenFilter::copy();
        assert_eq!(filter.perform(&mut device, &mut ctx, Some(target), 0), 1);

        let draw = &device.draws[0];
        assert_eq!(draw.draw_buffer, 1);
        assert_eq!(draw.textures.get(&0).copied(), post.attachment(0));

        device.bind_render_target(None).unwrap();
        assert_eq!(filter.perform(&mut device, &mut ctx, None, 1), 0);
        assert_eq!(device.draws[1].target, None);
    }

    #[test]
    fn failed_build_is_not_retried_every_frame() {
        let mut device = HeadlessDevice::new();
        let library = ShaderLibrary::builtin().with("Post/broken.frag", "#version 130\n#error not today\n");
        let mut ctx = RenderContext::new(library);
        let filter = FullscreenFilter::new("Post/broken.frag");

        assert_eq!(filter.perform(&mut device, &mut ctx, None, 0), 0);
        let attempt = device.compiles;
        assert!(attempt > 0);

        for _ in 0..4 {
            assert_eq!(filter.perform(&mut device, &mut ctx, None, 0), 0);
        }
        assert_eq!(device.compiles, attempt);
        assert!(device.draws.is_empty());

        filter.mark_dirty();
        filter.perform(&mut device, &mut ctx, None, 0);
        filter.perform(&mut device, &mut ctx, None, 0);
        assert_eq!(device.compiles, 2 * attempt);
    }

    #[test]
    fn fog_filter_reads_depth_and_ping_pongs() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let params = &mut ctx.parameters;
        let input = params
            .add_parameter("inputMap", ParamValue::texture_slot(TextureKind::D2), false)
            .unwrap();
        let depth_map = params
            .add_parameter("depthMap", ParamValue::texture_slot(TextureKind::D2), false)
            .unwrap();
        let inv_projection = Mat4::perspective_rh_gl(1.0, 1.0, 0.5, 100.0).inverse();
        params.add_parameter("invProjectionMatrix", inv_projection, false).unwrap();
        let depth_params = Vec4::new(1.0, 2.0, 3.0, 4.0);
        params.add_parameter("depthParams", depth_params, false).unwrap();
        params
            .add_parameter("normalMatrix", Mat3::from_rotation_x(std::f32::consts::FRAC_PI_2), false)
            .unwrap();

        let mut post = PostProcessTarget::new();
        let target = post.ensure(&mut device, 64, 64).unwrap();
        device.bind_render_target(Some(target)).unwrap();
        input.set_texture(post.attachment(0));
        depth_map.set_texture(post.depth());

        let fog = FogFilter::new();
        assert_relative_eq!(fog.fog_density(), 0.001);
        assert_eq!(fog.perform(&mut device, &mut ctx, Some(target), 0), 1);

        let draw = &device.draws[0];
        assert_eq!(draw.draw_buffer, 1);
        assert_eq!(draw.textures.get(&0).copied(), post.attachment(0));
        assert_eq!(draw.textures.get(&1).copied(), post.depth());
        assert_eq!(draw.uniform("depthParams").unwrap().as_f32s(), vec![1.0, 2.0, 3.0, 4.0]);
        let uploaded = draw.uniform("projectionMatrixInverse").unwrap().as_f32s();
        for (a, b) in uploaded.iter().zip(inv_projection.to_cols_array()) {
            assert_relative_eq!(*a, b, epsilon = 1e-6);
        }
        let up = draw.uniform("fogDirection").unwrap().as_f32s();
        assert_relative_eq!(up[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(up[2], 1.0, epsilon = 1e-6);

        fog.set_fog_density(0.05);
        input.set_texture(post.attachment(1));
        assert_eq!(fog.perform(&mut device, &mut ctx, Some(target), 1), 1);
        let draw = &device.draws[1];
        assert_eq!(draw.draw_buffer, 0);
        assert_eq!(draw.textures.get(&0).copied(), post.attachment(1));
        assert_relative_eq!(draw.uniform("fogDensity").unwrap().as_f32s()[0], 0.05);
    }

    fn fft_target(device: &mut HeadlessDevice, size: u32) -> RenderTargetId {
        let color = vec![
            device.create_texture(&TextureDesc::float(size, size)),
            device.create_texture(&TextureDesc::float(size, size)),
        ];
        device
            .create_render_target(&RenderTargetDesc { color, depth: None })
            .unwrap()
    }

    #[test]
    fn fft_transforms_rows_then_columns() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let target = fft_target(&mut device, 8);
        device.bind_render_target(Some(target)).unwrap();
        device.set_viewport(Viewport::new(640, 480));

        let fft = FftFilter::new(8);
        fft.set_direction(-1);
        fft.set_index_shift(IVec2::splat(-4));
        assert_eq!(fft.iterations(), 3);
        assert_eq!(fft.perform(&mut device, &mut ctx, Some(target), 0), 6);
        assert_eq!(device.current_viewport(), Viewport::new(640, 480));
        assert!(device.viewports.contains(&Viewport::new(8, 8)));

        let attachments = [device.render_target_color(target, 0), device.render_target_color(target, 1)];
        assert_eq!(device.draws.len(), 6);
        for (i, draw) in device.draws.iter().enumerate() {
            assert_eq!(draw.draw_buffer, (i as u32 + 1) % 2);
            assert_eq!(draw.textures.get(&0).copied(), attachments[i % 2]);
            assert_eq!(draw.uniform("N").unwrap().as_f32s(), vec![8.0]);
            assert_eq!(draw.uniform("direction").unwrap().as_f32s(), vec![-1.0]);
            assert_eq!(draw.uniform("shift").unwrap().as_f32s(), vec![-4.0, -4.0]);
        }
        let partitions: Vec<f32> = device
            .draws
            .iter()
            .map(|d| d.uniform("numPartitions").unwrap().as_f32s()[0])
            .collect();
        assert_eq!(partitions, vec![4.0, 2.0, 1.0, 4.0, 2.0, 1.0]);
        assert_eq!(device.draws[2].uniform("rowDirection").unwrap().as_f32s(), vec![1.0, 0.0]);
        assert_eq!(device.draws[3].uniform("rowDirection").unwrap().as_f32s(), vec![0.0, 1.0]);
    }

    #[test]
    fn fft_needs_a_target() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let fft = FftFilter::new(16);
        assert_eq!(fft.perform(&mut device, &mut ctx, None, 0), 0);
        assert!(device.draws.is_empty());
        assert_eq!(device.compiles, 0);
    }
}
