//! Cube-mapped sky drawn around the camera.

use std::sync::Arc;

use glam::{Mat4, Vec4};

use super::{BuildState, DefaultAttributes, Effect, EffectState, report_build_error};
use crate::config::RenderTechnique;
use crate::device::{DepthStencilDesc, Device, RasterizerDesc, TextureId};
use crate::effect_pass::{EffectPass, EffectPassDesc, ParamSource, Pass, PassList, RenderBin};
use crate::error::{RenderError, Result};
use crate::ffp_pass::{FixedFunctionPass, FixedFunctionPassDesc};
use crate::phase::{RenderGroup, RenderPass};
use crate::shader_program::EffectShaderProgram;
use crate::tables::{ParamHandle, ParamType, ParamValue, RenderContext, TextureKind};

/// Draws an environment cube map behind everything in the main view.
///
/// The view translation is dropped so the sky stays centered on the eye.
/// Depth is tested but never written.
pub struct SkyBoxEffect {
    environment_map: ParamHandle,
    view_projection: ParamHandle,
    world_view: ParamHandle,
    pass: Option<Arc<dyn Pass>>,
    build: BuildState,
    attributes: DefaultAttributes,
}

impl SkyBoxEffect {
    pub fn new(ctx: &mut RenderContext) -> Self {
        Self {
            environment_map: ParamHandle::anonymous(ParamValue::texture_slot(TextureKind::Cube), false),
            view_projection: ParamHandle::anonymous(Mat4::IDENTITY, false),
            world_view: ParamHandle::anonymous(Mat4::IDENTITY, false),
            pass: None,
            build: BuildState::default(),
            attributes: DefaultAttributes::acquire(&mut ctx.attributes),
        }
    }

    pub fn with_environment_map(self, map: TextureId) -> Self {
        self.set_environment_map(Some(map));
        self
    }

    pub fn set_environment_map(&self, map: Option<TextureId>) {
        self.environment_map.set_texture(map);
    }

    fn rebuild(&mut self, device: &mut dyn Device, ctx: &mut RenderContext) -> Result<()> {
        let depth = DepthStencilDesc::read_only();
        let raster = RasterizerDesc::default().cull(None);

        match ctx.technique {
            RenderTechnique::ForwardRendering => {
                let program = EffectShaderProgram::new()
                    .with_shader("skybox.vert")
                    .with_shader("skybox.frag")
                    .program(device, ctx)?;
                let desc = EffectPassDesc::new(program)
                    .depth_stencil(depth)
                    .rasterizer(raster)
                    .bin(RenderBin::Opaque)
                    .uniform_param("environmentMap", Some(self.environment_map.clone()))
                    .uniform_param("viewProjectionMatrix", Some(self.view_projection.clone()));
                self.pass = Some(Arc::new(EffectPass::new(device, ctx, desc)));
            }
            RenderTechnique::FixedPipeline => {
                let desc = FixedFunctionPassDesc::new()
                    .depth_stencil(depth)
                    .rasterizer(raster)
                    .projection(ParamSource::Direct(Some(self.view_projection.clone())))
                    .world_view(Some(self.world_view.clone()))
                    .texture(0, Some(self.environment_map.clone()));
                self.pass = Some(Arc::new(FixedFunctionPass::new(device, ctx, desc)));
            }
            technique @ RenderTechnique::DeferredShading => {
                return Err(RenderError::UnsupportedTechnique {
                    effect: "SkyBoxEffect",
                    technique,
                });
            }
        }
        Ok(())
    }

    fn update_matrices(&self, technique: RenderTechnique, ctx: &RenderContext) {
        let scene_matrix = |name: &str| {
            ctx.parameters
                .parameter_of_type(name, ParamType::Mat4)
                .and_then(|p| p.read().mat4(0))
                .unwrap_or(Mat4::IDENTITY)
        };
        let mut view = scene_matrix("viewMatrix");
        view.w_axis = Vec4::new(0.0, 0.0, 0.0, view.w_axis.w);
        let mut projection = scene_matrix("projectionMatrix");

        if technique == RenderTechnique::FixedPipeline {
            // Pin every fragment to the far plane.
            for column in [
                &mut projection.x_axis,
                &mut projection.y_axis,
                &mut projection.z_axis,
                &mut projection.w_axis,
            ] {
                column.z = column.w;
            }
            self.world_view.write_values(view);
            self.view_projection.write_values(projection);
        } else {
            self.view_projection.write_values(projection * view);
        }
    }
}

impl Effect for SkyBoxEffect {
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
                report_build_error("sky box", &err);
            }
            self.build.built(ctx.technique);
        }

        if group != RenderGroup::MAIN || pass != RenderPass::OPAQUE {
            return PassList::new();
        }
        match &self.pass {
            Some(sky) => {
                self.update_matrices(ctx.technique, ctx);
                vec![Arc::clone(sky)]
            }
            None => PassList::new(),
        }
    }

    fn parameter(&self, name: &str) -> Option<ParamHandle> {
        match name {
            "environmentMap" => Some(self.environment_map.clone()),
            "viewProjectionMatrix" => Some(self.view_projection.clone()),
            _ => None,
        }
    }

    fn bind_parameter(&mut self, name: &str, param: Option<ParamHandle>) -> bool {
        match (name, param) {
            ("environmentMap", Some(map)) if map.ty().is_texture() => {
                self.environment_map = map;
                self.build.mark_dirty();
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
    use crate::device::HeadlessDevice;
    use approx::assert_relative_eq;
    use glam::Vec3;

    fn scene(ctx: &mut RenderContext) -> (Mat4, Mat4, [ParamHandle; 2]) {
        let view = Mat4::look_at_rh(Vec3::new(4.0, 3.0, 2.0), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_rh_gl(1.2, 1.5, 0.5, 200.0);
        let handles = [
            ctx.parameters.add_parameter("viewMatrix", view, false).unwrap(),
            ctx.parameters.add_parameter("projectionMatrix", projection, false).unwrap(),
        ];
        (view, projection, handles)
    }

    #[test]
    fn view_translation_is_removed() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let (view, projection, _scene) = scene(&mut ctx);
        let mut sky = SkyBoxEffect::new(&mut ctx).with_environment_map(TextureId(5));

        let passes = sky.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::OPAQUE);
        assert_eq!(passes.len(), 1);
        passes[0].begin(&mut device, 0);
        device.draw(0..36, 0..1);

        let mut rotation = view;
        rotation.w_axis = Vec4::W;
        let expected = (projection * rotation).to_cols_array();
        let uploaded = device.draws[0].uniform("viewProjectionMatrix").unwrap().as_f32s();
        for (a, b) in uploaded.iter().zip(expected) {
            assert_relative_eq!(*a, b, epsilon = 1e-5);
        }
        assert_eq!(device.draws[0].textures.get(&0), Some(&TextureId(5)));
    }

    #[test]
    fn only_main_opaque_draws_the_sky() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let mut sky = SkyBoxEffect::new(&mut ctx);
        assert!(sky.present(&mut device, &mut ctx, RenderGroup::REFLECT, RenderPass::OPAQUE).is_empty());
        assert!(sky.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::DEPTH).is_empty());
    }

    #[test]
    fn fixed_pipeline_projection_collapses_depth() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders().technique(RenderTechnique::FixedPipeline);
        let (_, projection, _scene) = scene(&mut ctx);
        let mut sky = SkyBoxEffect::new(&mut ctx);

        let passes = sky.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::OPAQUE);
        passes[0].begin(&mut device, 0);
        device.draw(0..36, 0..1);

        let state = device.draws[0].fixed_function.unwrap();
        assert_eq!(state.projection.row(2), state.projection.row(3));
        assert_eq!(state.projection.row(0), projection.row(0));
        assert_eq!(state.world_view.w_axis.truncate(), Vec3::ZERO);
    }

    #[test]
    fn deferred_draws_nothing() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders().technique(RenderTechnique::DeferredShading);
        let mut sky = SkyBoxEffect::new(&mut ctx);
        assert!(sky.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::OPAQUE).is_empty());
    }
}
