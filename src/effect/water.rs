//! Projected-grid ocean surface.
//!
//! The grid vertices live in `[0, 1]²` screen space and are spread over the
//! four `surfaceCorners` (bound as `projectedGridCorners`). Rows are squeezed
//! toward the camera so distant water gets fewer vertices; the squeeze
//! relaxes as the view tilts down toward the surface.

use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3};

use super::{BuildState, DefaultAttributes, Effect, EffectState, report_build_error};
use crate::camera::SharedCamera;
use crate::config::RenderTechnique;
use crate::device::{Device, TextureDesc, TextureId};
use crate::effect_pass::{EffectPass, EffectPassDesc, Pass, PassList, RenderBin};
use crate::error::{RenderError, Result};
use crate::phase::{RenderGroup, RenderPass};
use crate::shader_program::EffectShaderProgram;
use crate::tables::{ParamHandle, ParamType, ParamValue, RenderContext, TextureKind};

/// Produces the displacement and normal maps the surface samples.
pub trait WaveMapGenerator: Send {
    /// World-space extent one tile of the maps covers.
    fn surface_size(&self) -> Vec2;

    /// Refreshes the maps for the current frame.
    fn generate(&mut self, device: &mut dyn Device, ctx: &mut RenderContext);

    fn height_map(&self) -> Option<TextureId>;

    fn normal_map(&self) -> Option<TextureId>;
}

/// A still surface: zero height, straight-up normals.
#[derive(Debug)]
pub struct FlatWaves {
    surface_size: Vec2,
    maps: Option<(TextureId, TextureId)>,
}

impl FlatWaves {
    pub fn new(surface_size: Vec2) -> Self {
        Self {
            surface_size,
            maps: None,
        }
    }
}

impl WaveMapGenerator for FlatWaves {
    fn surface_size(&self) -> Vec2 {
        self.surface_size
    }

    fn generate(&mut self, device: &mut dyn Device, _ctx: &mut RenderContext) {
        if self.maps.is_none() {
            let height = device.create_texture(&TextureDesc::color(1, 1));
            let normal = device.create_texture(&TextureDesc::color(1, 1));
            self.maps = Some((height, normal));
        }
    }

    fn height_map(&self) -> Option<TextureId> {
        self.maps.map(|(height, _)| height)
    }

    fn normal_map(&self) -> Option<TextureId> {
        self.maps.map(|(_, normal)| normal)
    }
}

fn texture_param(kind: TextureKind) -> ParamHandle {
    ParamHandle::anonymous(ParamValue::texture_slot(kind), false)
}

/// Ocean lit by one directional light, forward rendering only.
///
/// Reflections, refractions and soft shore fading are switched on by
/// providing the matching textures. Each one changes the program, so the
/// setters mark the effect dirty.
pub struct WaterEffect {
    generator: Box<dyn WaveMapGenerator>,
    squeezing: f32,
    reflect_camera: Option<SharedCamera>,
    refract_texture: Option<TextureId>,
    depth_texture: Option<TextureId>,

    sharpness: ParamHandle,
    distance_smoothness: ParamHandle,
    transparency: ParamHandle,
    squeeze_params: ParamHandle,
    surface_size: ParamHandle,
    world_view: ParamHandle,
    reflection_matrix: ParamHandle,
    height_map: ParamHandle,
    normal_map: ParamHandle,
    reflect_map: ParamHandle,
    refract_map: ParamHandle,
    depth_map: ParamHandle,
    environment_map: ParamHandle,
    grid_corners: Option<ParamHandle>,
    allow_culling: Option<ParamHandle>,

    pass: Option<Arc<dyn Pass>>,
    build: BuildState,
    attributes: DefaultAttributes,
}

impl WaterEffect {
    pub fn new(ctx: &mut RenderContext, generator: impl WaveMapGenerator + 'static) -> Self {
        let surface_size = generator.surface_size();
        Self {
            generator: Box::new(generator),
            squeezing: 5.0,
            reflect_camera: None,
            refract_texture: None,
            depth_texture: None,
            sharpness: ParamHandle::anonymous(0.5f32, false),
            distance_smoothness: ParamHandle::anonymous(0.005f32, false),
            transparency: ParamHandle::anonymous(0.5f32, false),
            squeeze_params: ParamHandle::anonymous(Vec2::ZERO, false),
            surface_size: ParamHandle::anonymous(surface_size, false),
            world_view: ParamHandle::anonymous(Mat4::IDENTITY, false),
            reflection_matrix: ParamHandle::anonymous(Mat4::IDENTITY, false),
            height_map: texture_param(TextureKind::D2),
            normal_map: texture_param(TextureKind::D2),
            reflect_map: texture_param(TextureKind::D2),
            refract_map: texture_param(TextureKind::D2),
            depth_map: texture_param(TextureKind::D2),
            environment_map: texture_param(TextureKind::Cube),
            grid_corners: None,
            allow_culling: None,
            pass: None,
            build: BuildState::default(),
            attributes: DefaultAttributes::acquire(&mut ctx.attributes),
        }
    }

    pub fn set_wave_sharpness(&self, sharpness: f32) {
        self.sharpness.write_values(sharpness);
    }

    pub fn set_water_transparency(&self, transparency: f32) {
        self.transparency.write_values(transparency);
    }

    pub fn set_distance_smoothness(&self, smoothness: f32) {
        self.distance_smoothness.write_values(smoothness);
    }

    /// Grid squeeze when looking along the horizon. `1.0` spaces rows evenly.
    pub fn set_squeezing(&mut self, squeezing: f32) {
        self.squeezing = squeezing;
    }

    pub fn set_environment_map(&self, map: Option<TextureId>) {
        self.environment_map.set_texture(map);
    }

    /// Mirrors the scene through `camera`, whose output lands in the texture.
    pub fn set_reflection(&mut self, reflection: Option<(SharedCamera, TextureId)>) {
        let (camera, texture) = reflection.unzip();
        self.reflect_camera = camera;
        self.reflect_map.set_texture(texture);
        self.build.mark_dirty();
    }

    /// The color buffer is copied here before the water draws.
    pub fn set_refract_texture(&mut self, texture: Option<TextureId>) {
        self.refract_texture = texture;
        self.refract_map.set_texture(texture);
        self.build.mark_dirty();
    }

    /// The depth buffer is copied here before the water draws.
    pub fn set_depth_texture(&mut self, texture: Option<TextureId>) {
        self.depth_texture = texture;
        self.depth_map.set_texture(texture);
        self.build.mark_dirty();
    }

    fn rebuild(&mut self, device: &mut dyn Device, ctx: &mut RenderContext) -> Result<()> {
        if ctx.technique != RenderTechnique::ForwardRendering {
            return Err(RenderError::UnsupportedTechnique {
                effect: "WaterEffect",
                technique: ctx.technique,
            });
        }

        let reflections = self.reflect_camera.is_some();
        let refractions = self.refract_texture.is_some();
        let depth_map = self.depth_texture.is_some();

        let mut program = EffectShaderProgram::new()
            .with_shader("Water/Ocean.vert")
            .with_shader("Water/Ocean.frag")
            .with_shader("depth.frag")
            .with_definition("#define DIRECTIONAL_LIGHTING");
        if reflections {
            program.add_definition("#define ENABLE_REFLECTIONS");
        }
        if refractions {
            program.add_definition("#define ENABLE_REFRACTIONS");
        }
        if depth_map {
            program.add_definition("#define ENABLE_DEPTH_MAP");
        }
        let program = program.program(device, ctx)?;

        let mut desc = EffectPassDesc::new(program)
            .bin(RenderBin::Opaque)
            .uniform("projectionMatrix", "projectionMatrix")
            .uniform("depthParams", "depthParams")
            .uniform("eyePosition", "eyePosition")
            .uniform("lightColorIntensity", "lightColorIntensity")
            .uniform("lightDirectionAmbient", "lightDirectionAmbient")
            .uniform_param("sharpness", Some(self.sharpness.clone()))
            .uniform_param("distanceSmoothness", Some(self.distance_smoothness.clone()))
            .uniform_param("waterTransparency", Some(self.transparency.clone()))
            .uniform_param("squeezeParams", Some(self.squeeze_params.clone()))
            .uniform_param("surfaceSize", Some(self.surface_size.clone()))
            .uniform_param("surfaceCorners", self.grid_corners.clone())
            .uniform_param("worldViewMatrix", Some(self.world_view.clone()))
            .uniform_param("reflectionMatrix", Some(self.reflection_matrix.clone()))
            .uniform_param("heightMap", Some(self.height_map.clone()))
            .uniform_param("normalMap", Some(self.normal_map.clone()))
            .uniform_param("environmentMap", Some(self.environment_map.clone()));
        if reflections {
            desc = desc.uniform_param("reflectMap", Some(self.reflect_map.clone()));
        }
        if refractions {
            desc = desc.uniform_param("refractMap", Some(self.refract_map.clone()));
        }
        if depth_map {
            desc = desc.uniform_param("depthMap", Some(self.depth_map.clone()));
        }

        self.pass = Some(Arc::new(EffectPass::new(device, ctx, desc)));
        Ok(())
    }

    fn prepare_frame(&mut self, device: &mut dyn Device, ctx: &mut RenderContext) {
        self.generator.generate(device, ctx);
        self.height_map.set_texture(self.generator.height_map());
        self.normal_map.set_texture(self.generator.normal_map());

        if let Some(texture) = self.refract_texture {
            device.copy_to_texture(texture);
            device.generate_mipmaps(texture);
        }
        if let Some(texture) = self.depth_texture {
            device.copy_to_texture(texture);
        }
        if let Some(camera) = &self.reflect_camera {
            self.reflection_matrix.write_values(camera.read().reflection_matrix());
        }

        let view = ctx
            .parameters
            .parameter_of_type("viewMatrix", ParamType::Mat4)
            .and_then(|p| p.read().mat4(0))
            .unwrap_or(Mat4::IDENTITY);
        self.squeeze_params.write_values(squeeze_params(self.squeezing, view));
        self.world_view.write_values(view);
    }
}

/// `(1 / (e^s - 1), s)` where `s` blends from `squeezing` at the horizon to
/// `1` looking straight down.
fn squeeze_params(squeezing: f32, view: Mat4) -> Vec2 {
    let dir = view.row(2).truncate().normalize_or(Vec3::Z);
    let factor = (1.0 - dir.y.abs()).max(0.0).sqrt();
    let adapted = 1.0 + (squeezing - 1.0) * factor;
    Vec2::new(1.0 / adapted.exp_m1(), adapted)
}

impl Effect for WaterEffect {
    fn present(
        &mut self,
        device: &mut dyn Device,
        ctx: &mut RenderContext,
        group: RenderGroup,
        pass: RenderPass,
    ) -> PassList {
        if self.build.needs_rebuild(ctx.technique) {
            self.pass = None;
            if let Err(err) = self.rebuild(device, ctx) {
                report_build_error("water", &err);
            }
            self.build.built(ctx.technique);
        }

        if group != RenderGroup::MAIN || pass != RenderPass::OPAQUE {
            return PassList::new();
        }
        let Some(water) = self.pass.clone() else {
            return PassList::new();
        };
        self.prepare_frame(device, ctx);
        vec![water]
    }

    fn parameter(&self, name: &str) -> Option<ParamHandle> {
        match name {
            "projectedGridCorners" => self.grid_corners.clone(),
            "allowCulling" => self.allow_culling.clone(),
            _ => None,
        }
    }

    fn bind_parameter(&mut self, name: &str, param: Option<ParamHandle>) -> bool {
        let fits = |ty: ParamType| param.as_ref().is_none_or(|p| p.ty() == ty);
        match name {
            "projectedGridCorners" if fits(ParamType::Vec3) => {
                self.grid_corners = param;
                self.build.mark_dirty();
                true
            }
            "allowCulling" if fits(ParamType::Bool) => {
                self.allow_culling = param;
                true
            }
            _ => false,
        }
    }

    fn query_attribute(&self, name: &str) -> Option<u32> {
        self.attributes.index(name)
    }

    fn state(&self) -> EffectState {
        self.build.state()
    }

    fn mark_dirty(&mut self) {
        self.build.mark_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::device::HeadlessDevice;
    use approx::assert_relative_eq;
    use parking_lot::RwLock;

    fn water(ctx: &mut RenderContext) -> (WaterEffect, ParamHandle) {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 10.0), Vec3::new(0.0, 2.0, 0.0), Vec3::Y);
        let view = ctx.parameters.add_parameter("viewMatrix", view, false).unwrap();
        let mut effect = WaterEffect::new(ctx, FlatWaves::new(Vec2::splat(64.0)));
        let corners = ParamHandle::anonymous(vec![Vec3::ZERO; 4], false);
        assert!(effect.bind_parameter("projectedGridCorners", Some(corners)));
        (effect, view)
    }

    fn draw(effect: &mut WaterEffect, device: &mut HeadlessDevice, ctx: &mut RenderContext) {
        let passes = effect.present(device, ctx, RenderGroup::MAIN, RenderPass::OPAQUE);
        assert_eq!(passes.len(), 1);
        passes[0].begin(device, 0);
        device.draw(0..6, 0..1);
        passes[0].end(device);
    }

    #[test]
    fn horizon_view_uses_full_squeeze() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let (mut effect, _view) = water(&mut ctx);
        draw(&mut effect, &mut device, &mut ctx);

        let record = &device.draws[0];
        assert!(record.is_defined("DIRECTIONAL_LIGHTING"));
        assert!(!record.is_defined("ENABLE_REFLECTIONS"));
        assert!(record.uniform("reflectMap").is_none());
        assert_eq!(record.uniform("surfaceCorners").map(|u| u.count), Some(4));
        assert_eq!(record.uniform("surfaceSize").unwrap().as_f32s(), vec![64.0, 64.0]);

        let squeeze = record.uniform("squeezeParams").unwrap().as_f32s();
        assert_relative_eq!(squeeze[1], 5.0, epsilon = 1e-5);
        assert_relative_eq!(squeeze[0], 1.0 / (5.0f32.exp() - 1.0), epsilon = 1e-6);
    }

    #[test]
    fn looking_down_relaxes_the_squeeze() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO, Vec3::Z);
        let params = squeeze_params(5.0, view);
        assert_relative_eq!(params.y, 1.0, epsilon = 1e-5);
        assert_relative_eq!(params.x, 1.0 / (1.0f32.exp() - 1.0), epsilon = 1e-5);
    }

    #[test]
    fn refraction_and_depth_textures_are_copied() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let (mut effect, _view) = water(&mut ctx);
        draw(&mut effect, &mut device, &mut ctx);

        effect.set_refract_texture(Some(TextureId(40)));
        effect.set_depth_texture(Some(TextureId(41)));
        assert_eq!(effect.state(), EffectState::Dirty);
        device.reset_counters();
        draw(&mut effect, &mut device, &mut ctx);

        assert_eq!(device.copies, vec![TextureId(40), TextureId(41)]);
        assert_eq!(device.mipmaps_generated, vec![TextureId(40)]);
        let record = &device.draws[0];
        assert!(record.is_defined("ENABLE_REFRACTIONS"));
        assert!(record.is_defined("ENABLE_DEPTH_MAP"));
        assert!(record.textures.values().any(|t| *t == TextureId(40)));
    }

    #[test]
    fn reflection_matrix_follows_the_reflect_camera() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let (mut effect, _view) = water(&mut ctx);
        let camera = Arc::new(RwLock::new(
            Camera::new().looking_at(Vec3::new(0.0, -3.0, 8.0), Vec3::ZERO, Vec3::Y),
        ));
        effect.set_reflection(Some((Arc::clone(&camera), TextureId(9))));
        draw(&mut effect, &mut device, &mut ctx);

        let record = &device.draws[0];
        assert!(record.is_defined("ENABLE_REFLECTIONS"));
        assert!(record.textures.values().any(|t| *t == TextureId(9)));
        let expected = camera.read().reflection_matrix().to_cols_array();
        let uploaded = record.uniform("reflectionMatrix").unwrap().as_f32s();
        for (a, b) in uploaded.iter().zip(expected) {
            assert_relative_eq!(*a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn only_forward_rendering_is_supported() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders().technique(RenderTechnique::FixedPipeline);
        let mut effect = WaterEffect::new(&mut ctx, FlatWaves::new(Vec2::ONE));
        assert!(effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::OPAQUE).is_empty());
        assert_eq!(effect.state(), EffectState::Clean);
    }

    #[test]
    fn parameter_bindings_are_typed() {
        let mut ctx = RenderContext::with_builtin_shaders();
        let mut effect = WaterEffect::new(&mut ctx, FlatWaves::new(Vec2::ONE));
        assert!(!effect.bind_parameter("projectedGridCorners", Some(ParamHandle::anonymous(1.0f32, false))));
        assert!(effect.bind_parameter("allowCulling", Some(ParamHandle::anonymous(true, false))));
        assert!(effect.parameter("allowCulling").is_some());
        assert!(!effect.bind_parameter("surfaceSize", None));
    }
}
