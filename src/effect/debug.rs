//! Flat-colored helper geometry: bounds, axes, light gizmos.

use std::sync::Arc;

use glam::{Mat4, Vec4};

use super::{BuildState, DefaultAttributes, Effect, EffectState, report_build_error};
use crate::config::RenderTechnique;
use crate::device::{DepthStencilDesc, Device, RasterizerDesc};
use crate::effect_pass::{EffectPass, EffectPassDesc, ParamSource, Pass, PassList, RenderBin};
use crate::error::{RenderError, Result};
use crate::ffp_pass::{FixedFunctionPass, FixedFunctionPassDesc};
use crate::phase::{RenderGroup, RenderPass};
use crate::shader_program::EffectShaderProgram;
use crate::tables::{ParamHandle, ParamType, RenderContext};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DebugEffectDesc {
    pub color: Vec4,
    /// Used instead of the camera's when `use_camera_projection` is off,
    /// e.g. for screen-space overlays.
    pub projection: Mat4,
    /// Applied before the bound world matrix.
    pub model: Mat4,
    pub depth_test: bool,
    pub wireframe: bool,
    pub use_camera_projection: bool,
}

impl Default for DebugEffectDesc {
    fn default() -> Self {
        Self {
            color: Vec4::ONE,
            projection: Mat4::IDENTITY,
            model: Mat4::IDENTITY,
            depth_test: true,
            wireframe: false,
            use_camera_projection: true,
        }
    }
}

/// Draws geometry in a single color during the `Debug` pass.
pub struct DebugEffect {
    desc: DebugEffectDesc,
    world: Option<ParamHandle>,
    color: ParamHandle,
    projection: ParamHandle,
    world_view: ParamHandle,
    world_view_proj: ParamHandle,

    pass: Option<Arc<dyn Pass>>,
    build: BuildState,
    attributes: DefaultAttributes,
}

impl DebugEffect {
    pub fn new(ctx: &mut RenderContext, desc: DebugEffectDesc) -> Self {
        Self {
            desc,
            world: None,
            color: ParamHandle::anonymous(desc.color, false),
            projection: ParamHandle::anonymous(desc.projection, false),
            world_view: ParamHandle::anonymous(Mat4::IDENTITY, false),
            world_view_proj: ParamHandle::anonymous(Mat4::IDENTITY, false),
            pass: None,
            build: BuildState::default(),
            attributes: DefaultAttributes::acquire(&mut ctx.attributes),
        }
    }

    pub fn desc(&self) -> &DebugEffectDesc {
        &self.desc
    }

    /// Applies a new description. Changing the depth test or fill mode
    /// rebuilds the pass with the new states.
    pub fn reset(&mut self, desc: DebugEffectDesc) {
        if desc.depth_test != self.desc.depth_test || desc.wireframe != self.desc.wireframe {
            self.build.mark_dirty();
        }
        self.color.write_values(desc.color);
        self.desc = desc;
    }

    fn states(&self) -> (DepthStencilDesc, RasterizerDesc) {
        let depth = if self.desc.depth_test {
            DepthStencilDesc::default()
        } else {
            DepthStencilDesc::disabled()
        };
        let raster = if self.desc.wireframe {
            RasterizerDesc::wireframe()
        } else {
            RasterizerDesc::default()
        };
        (depth, raster.cull(None))
    }

    fn rebuild(&mut self, device: &mut dyn Device, ctx: &mut RenderContext) -> Result<()> {
        let (depth, raster) = self.states();
        match ctx.technique {
            RenderTechnique::ForwardRendering => {
                let program = EffectShaderProgram::new()
                    .with_shader("debug.vert")
                    .with_shader("debug.frag")
                    .program(device, ctx)?;
                let desc = EffectPassDesc::new(program)
                    .depth_stencil(depth)
                    .rasterizer(raster)
                    .bin(RenderBin::Opaque)
                    .uniform_param("worldViewProjMatrix", Some(self.world_view_proj.clone()))
                    .uniform_param("color", Some(self.color.clone()));
                self.pass = Some(Arc::new(EffectPass::new(device, ctx, desc)));
            }
            RenderTechnique::FixedPipeline => {
                let desc = FixedFunctionPassDesc::new()
                    .depth_stencil(depth)
                    .rasterizer(raster)
                    .projection(ParamSource::Direct(Some(self.projection.clone())))
                    .world_view(Some(self.world_view.clone()))
                    .diffuse_specular(Some(self.color.clone()));
                self.pass = Some(Arc::new(FixedFunctionPass::new(device, ctx, desc)));
            }
            technique @ RenderTechnique::DeferredShading => {
                return Err(RenderError::UnsupportedTechnique {
                    effect: "DebugEffect",
                    technique,
                });
            }
        }
        Ok(())
    }

    fn update_matrices(&self, ctx: &RenderContext) {
        let scene_matrix = |name: &str| {
            ctx.parameters
                .parameter_of_type(name, ParamType::Mat4)
                .and_then(|p| p.read().mat4(0))
                .unwrap_or(Mat4::IDENTITY)
        };
        let world = self
            .world
            .as_ref()
            .and_then(|p| p.read().mat4(0))
            .unwrap_or(Mat4::IDENTITY);
        let object = world * self.desc.model;

        let (world_view, projection) = if self.desc.use_camera_projection {
            (scene_matrix("viewMatrix") * object, scene_matrix("projectionMatrix"))
        } else {
            (object, self.desc.projection)
        };
        self.world_view.write_values(world_view);
        self.world_view_proj.write_values(projection * world_view);
        self.projection.write_values(projection);
    }
}

impl Effect for DebugEffect {
    fn present(
        &mut self,
        device: &mut dyn Device,
        ctx: &mut RenderContext,
        _group: RenderGroup,
        pass: RenderPass,
    ) -> PassList {
        if self.build.needs_rebuild(ctx.technique) {
            self.pass = None;
            if let Err(err) = self.rebuild(device, ctx) {
                report_build_error("debug", &err);
            }
            self.build.built(ctx.technique);
        }

        if pass != RenderPass::DEBUG {
            return PassList::new();
        }
        match &self.pass {
            Some(debug) => {
                self.update_matrices(ctx);
                vec![Arc::clone(debug)]
            }
            None => PassList::new(),
        }
    }

    fn parameter(&self, name: &str) -> Option<ParamHandle> {
        match name {
            "worldMatrix" => self.world.clone(),
            "color" => Some(self.color.clone()),
            "worldViewProjMatrix" => Some(self.world_view_proj.clone()),
            _ => None,
        }
    }

    fn bind_parameter(&mut self, name: &str, param: Option<ParamHandle>) -> bool {
        if name != "worldMatrix" || param.as_ref().is_some_and(|p| p.ty() != ParamType::Mat4) {
            return false;
        }
        self.world = param;
        true
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
    use crate::device::{HeadlessDevice, StateDesc};
    use approx::assert_relative_eq;
    use glam::Vec3;

    fn draw(effect: &mut DebugEffect, device: &mut HeadlessDevice, ctx: &mut RenderContext) {
        let passes = effect.present(device, ctx, RenderGroup::MAIN, RenderPass::DEBUG);
        assert_eq!(passes.len(), 1);
        passes[0].begin(device, 0);
        device.draw(0..24, 0..1);
    }

    fn assert_mat4_eq(uploaded: &[f32], expected: Mat4) {
        for (a, b) in uploaded.iter().zip(expected.to_cols_array()) {
            assert_relative_eq!(*a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn camera_projection_chains_every_matrix() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 6.0), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_rh_gl(1.0, 1.0, 0.1, 100.0);
        let _view = ctx.parameters.add_parameter("viewMatrix", view, false).unwrap();
        let _proj = ctx.parameters.add_parameter("projectionMatrix", projection, false).unwrap();

        let model = Mat4::from_scale(Vec3::splat(2.0));
        let world = Mat4::from_translation(Vec3::X);
        let mut effect = DebugEffect::new(
            &mut ctx,
            DebugEffectDesc {
                color: Vec4::new(1.0, 0.0, 0.0, 1.0),
                model,
                ..Default::default()
            },
        );
        assert!(effect.bind_parameter("worldMatrix", Some(ParamHandle::anonymous(world, false))));
        draw(&mut effect, &mut device, &mut ctx);

        let record = &device.draws[0];
        assert_mat4_eq(&record.uniform("worldViewProjMatrix").unwrap().as_f32s(), projection * view * world * model);
        assert_eq!(record.uniform("color").unwrap().as_f32s(), vec![1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn own_projection_skips_the_view() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let overlay = Mat4::orthographic_rh_gl(0.0, 640.0, 0.0, 480.0, -1.0, 1.0);
        let mut effect = DebugEffect::new(
            &mut ctx,
            DebugEffectDesc {
                projection: overlay,
                use_camera_projection: false,
                ..Default::default()
            },
        );
        draw(&mut effect, &mut device, &mut ctx);
        assert_mat4_eq(&device.draws[0].uniform("worldViewProjMatrix").unwrap().as_f32s(), overlay);
    }

    #[test]
    fn reset_swaps_states() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let mut effect = DebugEffect::new(&mut ctx, DebugEffectDesc::default());
        draw(&mut effect, &mut device, &mut ctx);

        effect.reset(DebugEffectDesc {
            color: Vec4::new(0.0, 1.0, 0.0, 1.0),
            ..Default::default()
        });
        assert_eq!(effect.state(), EffectState::Clean);

        effect.reset(DebugEffectDesc {
            wireframe: true,
            depth_test: false,
            ..Default::default()
        });
        assert_eq!(effect.state(), EffectState::Dirty);
        draw(&mut effect, &mut device, &mut ctx);

        let record = &device.draws[1];
        match record.states[2].and_then(|s| device.state_desc(s).copied()) {
            Some(StateDesc::Rasterizer(desc)) => {
                assert_eq!(desc.polygon_mode, wgpu::PolygonMode::Line);
                assert_eq!(desc.cull, None);
            }
            other => panic!("unexpected rasterizer state {other:?}"),
        }
        match record.states[1].and_then(|s| device.state_desc(s).copied()) {
            Some(StateDesc::DepthStencil(desc)) => assert!(!desc.depth_test),
            other => panic!("unexpected depth state {other:?}"),
        }
    }

    #[test]
    fn fixed_pipeline_uses_own_projection_param() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders().technique(RenderTechnique::FixedPipeline);
        let overlay = Mat4::orthographic_rh_gl(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0);
        let mut effect = DebugEffect::new(
            &mut ctx,
            DebugEffectDesc {
                projection: overlay,
                use_camera_projection: false,
                ..Default::default()
            },
        );
        draw(&mut effect, &mut device, &mut ctx);
        let state = device.draws[0].fixed_function.unwrap();
        assert_eq!(state.projection, overlay);
        assert_eq!(state.diffuse, Vec4::ONE);
    }
}
