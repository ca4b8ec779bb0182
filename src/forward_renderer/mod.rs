//! The forward frame driver.
//!
//! One [`ForwardRenderer::render`] call draws one camera:
//!
//! ```text
//! cull ─► depth pre-pass ─► lighting buckets ─► opaque ─► debug ─► filters
//!                           (additive, one draw
//!                            per ≤3 lights)
//! ```
//!
//! Lights of one type are drawn in buckets of at most `max_light_count`; the
//! renderer publishes each bucket through the `light*` parameters and the
//! lighting effects pick the program compiled for that bucket size. More
//! lights than fit in one bucket cost extra draws, never dropped lights.

mod camera_params;
mod light_params;

use std::sync::Arc;

use log::{debug, error, warn};
use parking_lot::RwLock;

use self::camera_params::CameraParams;
use self::light_params::LightParams;
use crate::camera::{Camera, CameraKind};
use crate::config::{RenderTechnique, RendererConfig};
use crate::device::{Device, RasterizerDesc, RenderTargetId, StateCategory, StateDesc, StateId};
use crate::effect_pass::{MAX_NUM_PASSES, Pass};
use crate::hooks::FrameHooks;
use crate::phase::{RenderGroup, RenderPass};
use crate::post_process::PostProcessTarget;
use crate::scene::{CullResults, Light, LightKind, Renderable, SceneWorld};
use crate::tables::{ParamHandle, ParamValue, ParameterTable, RenderContext, TextureKind};

/// Registers `name`, or takes over an existing parameter of the same type.
///
/// A same-named parameter of another type stays untouched and the renderer
/// writes to a private slot instead.
pub(crate) fn acquire(params: &mut ParameterTable, name: &str, value: impl Into<ParamValue>) -> ParamHandle {
    let value = value.into();
    if let Some(handle) = params.add_parameter(name, value.clone(), false) {
        return handle;
    }
    match params.parameter_of_type(name, value.ty()) {
        Some(existing) => {
            existing.switch_values(value, false);
            existing
        }
        None => {
            warn!("Parameter '{name}' is registered with another type, renderer output will not reach it");
            ParamHandle::anonymous(value, false)
        }
    }
}

/// A pass paired with the object it draws.
pub struct RenderPacket {
    pub pass: Arc<dyn Pass>,
    pub renderable: Arc<dyn Renderable>,
}

/// Draws cameras with multi-pass forward lighting.
///
/// # Example
///
/// ```
/// use parking_lot::RwLock;
/// use phalanx::{Camera, EcsWorld, ForwardRenderer, HeadlessDevice, RenderContext, RendererConfig};
///
/// let mut device = HeadlessDevice::new();
/// let mut ctx = RenderContext::with_builtin_shaders();
/// let mut renderer = ForwardRenderer::new(&mut device, &mut ctx, RendererConfig::default());
///
/// let world = RwLock::new(EcsWorld::new());
/// renderer.render(&mut device, &mut ctx, &world, &Camera::new());
/// ```
pub struct ForwardRenderer {
    config: RendererConfig,
    hooks: FrameHooks,
    camera_params: CameraParams,
    light_params: LightParams,
    input_map: ParamHandle,
    depth_map: Option<ParamHandle>,
    wireframe_state: StateId,
    post_target: PostProcessTarget,
    culled: CullResults,
    packets: Vec<RenderPacket>,
}

impl ForwardRenderer {
    /// Publishes the renderer's parameters and switches `ctx` to the
    /// configured technique.
    pub fn new(device: &mut dyn Device, ctx: &mut RenderContext, config: RendererConfig) -> Self {
        ctx.technique = config.technique;
        let max_light_count = config.max_light_count.clamp(1, crate::config::MAX_LIGHTS_PER_DRAW);
        let params = &mut ctx.parameters;

        Self {
            camera_params: CameraParams::new(params),
            light_params: LightParams::new(params, max_light_count),
            input_map: acquire(params, "inputMap", ParamValue::texture_slot(TextureKind::D2)),
            depth_map: config
                .make_depth_map
                .then(|| acquire(params, "depthMap", ParamValue::texture_slot(TextureKind::D2))),
            wireframe_state: ctx
                .states
                .get(device, StateDesc::Rasterizer(RasterizerDesc::wireframe())),
            post_target: PostProcessTarget::new(),
            culled: CullResults::new(),
            packets: Vec::new(),
            hooks: FrameHooks::new(),
            config,
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Pre- and post-render callbacks, fired for every camera.
    pub fn hooks(&self) -> &FrameHooks {
        &self.hooks
    }

    pub fn set_wireframe(&mut self, wireframe: bool) {
        self.config.wireframe = wireframe;
    }

    /// Switches technique; effects rebuild their passes on their next
    /// `present`.
    pub fn set_technique(&mut self, ctx: &mut RenderContext, technique: RenderTechnique) {
        self.config.technique = technique;
        ctx.technique = technique;
    }

    /// Releases the post-processing attachments.
    pub fn release(&mut self, device: &mut dyn Device) {
        self.post_target.release(device);
    }

    /// Renders everything `world` reports inside `camera`'s frustum.
    ///
    /// A render target that fails to bind is logged and the camera is
    /// skipped.
    pub fn render<W>(&mut self, device: &mut dyn Device, ctx: &mut RenderContext, world: &RwLock<W>, camera: &Camera)
    where
        W: SceneWorld + ?Sized,
    {
        self.hooks.fire_pre_render(camera);

        let (group, reflect_texture) = match camera.kind() {
            CameraKind::Main => (RenderGroup::MAIN, None),
            CameraKind::Reflect { reflect_texture } => (RenderGroup::REFLECT, reflect_texture),
        };
        self.camera_params.setup(camera);

        self.culled.clear();
        world.read().visit(&camera.frustum(), &mut self.culled);
        self.culled.lights.sort_by_key(Light::kind);

        let viewport = camera.viewport();
        let target = match camera.target() {
            Some(target) => Some(target),
            None if !camera.filters().is_empty() => {
                match self.post_target.ensure(device, viewport.width, viewport.height) {
                    Ok(target) => Some(target),
                    Err(err) => {
                        error!("Can't create post process target: {err}");
                        return;
                    }
                }
            }
            None => None,
        };
        if let Some(target) = target {
            if let Err(err) = device.bind_render_target(Some(target)) {
                error!("Can't bind camera render target: {err}");
                return;
            }
        }

        device.set_viewport(viewport);
        let wireframe = self.config.wireframe;
        if wireframe {
            device.push_state(StateCategory::Rasterizer);
            device.bind_state(StateCategory::Rasterizer, self.wireframe_state);
        }

        self.input_map.set_texture(None);
        if let Some(depth_map) = &self.depth_map {
            depth_map.set_texture(None);
        }

        let renderables = &self.culled.renderables;
        let packets = &mut self.packets;

        if self.config.use_depth_pass {
            if target.is_some() {
                device.clear(None, Some(1.0));
            }
            render_phase(packets, device, ctx, group, RenderPass::DEPTH, renderables);
            if let (Some(depth_map), Some(target)) = (&self.depth_map, target) {
                depth_map.set_texture(device.render_target_depth(target));
            }
        }

        if target.is_some() {
            device.set_draw_buffer(0);
            let depth = (!self.config.use_depth_pass).then_some(1.0);
            device.clear(Some(self.config.clear_color), depth);
        }

        for same_kind in self.culled.lights.chunk_by(|a, b| a.kind() == b.kind()) {
            for bucket in same_kind.chunks(self.light_params.max_light_count()) {
                let pass = match bucket[0].kind() {
                    LightKind::Directional => {
                        self.light_params.setup_directional(camera, bucket);
                        RenderPass::DIRECTIONAL_LIGHTING
                    }
                    LightKind::Point => {
                        self.light_params.setup_point(camera, bucket);
                        RenderPass::POINT_LIGHTING
                    }
                    LightKind::Spot => RenderPass::SPOT_LIGHTING,
                };
                render_phase(packets, device, ctx, group, pass, renderables);
            }
        }

        render_phase(packets, device, ctx, group, RenderPass::OPAQUE, renderables);
        if self.config.use_debug_render {
            render_phase(packets, device, ctx, group, RenderPass::DEBUG, renderables);
        }

        if wireframe {
            device.pop_state(StateCategory::Rasterizer);
        }

        let mut target_bound = target.is_some();
        if let Some(target) = target {
            target_bound = self.run_filters(device, ctx, camera, target);
        }

        self.hooks.fire_post_render(camera);

        if target_bound {
            if let Err(err) = device.bind_render_target(None) {
                error!("Can't unbind camera render target: {err}");
            }
        }
        if let Some(texture) = reflect_texture {
            device.generate_mipmaps(texture);
        }
    }

    /// Runs the camera's filter chain over `target`'s color attachments.
    /// Returns whether `target` is still bound.
    fn run_filters(
        &mut self,
        device: &mut dyn Device,
        ctx: &mut RenderContext,
        camera: &Camera,
        target: RenderTargetId,
    ) -> bool {
        let filters = camera.filters();
        let internal = camera.target().is_none();
        let attachments = [device.render_target_color(target, 0), device.render_target_color(target, 1)];

        let mut source = 0u32;
        for (i, filter) in filters.iter().enumerate() {
            self.input_map.set_texture(attachments[source as usize]);
            if internal && i + 1 == filters.len() {
                if let Err(err) = device.bind_render_target(None) {
                    error!("Can't unbind post process target: {err}");
                }
                filter.perform(device, ctx, None, source);
                return false;
            }
            let switches = filter.perform(device, ctx, Some(target), source);
            source = (source + switches) % 2;
        }
        true
    }

    /// Draws every renderable whose effect answers `pass` in `group`.
    pub fn render_pass(
        &mut self,
        device: &mut dyn Device,
        ctx: &mut RenderContext,
        group: RenderGroup,
        pass: RenderPass,
        renderables: &[Arc<dyn Renderable>],
    ) {
        render_phase(&mut self.packets, device, ctx, group, pass, renderables);
    }
}

fn render_phase(
    packets: &mut Vec<RenderPacket>,
    device: &mut dyn Device,
    ctx: &mut RenderContext,
    group: RenderGroup,
    pass: RenderPass,
    renderables: &[Arc<dyn Renderable>],
) {
    packets.clear();
    for renderable in renderables {
        let mut passes = renderable.effect().lock().present(device, ctx, group, pass);
        if passes.len() > MAX_NUM_PASSES {
            debug!("Effect returned {} passes for {pass:?}, keeping {MAX_NUM_PASSES}", passes.len());
            passes.truncate(MAX_NUM_PASSES);
        }
        packets.extend(passes.into_iter().map(|pass| RenderPacket {
            pass,
            renderable: Arc::clone(renderable),
        }));
    }
    if packets.is_empty() {
        return;
    }

    packets.sort_by_key(|packet| packet.pass.priority());

    for category in StateCategory::ALL {
        device.push_state(category);
    }
    for packet in packets.iter() {
        packet.pass.begin(device, 0);
        packet.renderable.render(device);
        packet.pass.end(device);
    }
    for category in StateCategory::ALL {
        device.pop_state(category);
    }
    packets.clear();
}
