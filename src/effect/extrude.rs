//! Shadow-volume extrusion.

use std::sync::Arc;

use glam::{Mat4, Vec3};

use super::{BuildState, Effect, EffectState, TransformEffect, report_build_error};
use crate::config::RenderTechnique;
use crate::device::{DepthStencilDesc, Device, RasterizerDesc};
use crate::effect_pass::{EffectPass, EffectPassDesc, Pass, PassList};
use crate::error::{RenderError, Result};
use crate::phase::{RenderGroup, RenderPass};
use crate::shader_program::EffectShaderProgram;
use crate::tables::{ParamHandle, RenderContext};

/// The light a shadow volume is cast from, in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ShadowLight {
    Directional { direction: Vec3 },
    Point { position: Vec3 },
}

/// Stretches silhouette geometry away from a light.
///
/// Vertices with `position.w == 0` are extruded to infinity, the others stay
/// put. Volumes are rasterized without color or depth writes.
pub struct ExtrudeEffect {
    transform: TransformEffect,
    light: ShadowLight,
    light_direction: ParamHandle,
    light_position: ParamHandle,

    directional: Option<Arc<dyn Pass>>,
    point: Option<Arc<dyn Pass>>,
    build: BuildState,
}

impl ExtrudeEffect {
    pub fn new(ctx: &mut RenderContext, light: ShadowLight) -> Self {
        Self {
            transform: TransformEffect::new(ctx),
            light,
            light_direction: ParamHandle::anonymous(Vec3::NEG_Y, false),
            light_position: ParamHandle::anonymous(Vec3::ZERO, false),
            directional: None,
            point: None,
            build: BuildState::default(),
        }
    }

    pub fn with_world(mut self, world: ParamHandle) -> Self {
        self.transform.bind_parameter("worldMatrix", Some(world));
        self
    }

    pub fn set_light(&mut self, light: ShadowLight) {
        self.light = light;
    }

    pub fn light(&self) -> ShadowLight {
        self.light
    }

    fn rebuild(&mut self, device: &mut dyn Device, ctx: &mut RenderContext) -> Result<()> {
        if ctx.technique != RenderTechnique::ForwardRendering {
            return Err(RenderError::UnsupportedTechnique {
                effect: "ExtrudeEffect",
                technique: ctx.technique,
            });
        }

        let volume = |desc: EffectPassDesc| {
            desc.depth_stencil(DepthStencilDesc::read_only()).rasterizer(
                RasterizerDesc::default()
                    .cull(None)
                    .color_writes(wgpu::ColorWrites::empty()),
            )
        };
        let base = EffectShaderProgram::new()
            .with_shader("Extrude/extrude.vert")
            .with_shader("fill.frag");

        let program = base
            .clone()
            .with_definition("#define DIRECTIONAL_LIGHT")
            .program(device, ctx)?;
        let desc = volume(EffectPassDesc::new(program))
            .uniform_param("worldViewProjMatrix", Some(self.transform.world_view_proj().clone()))
            .uniform_param("lightDirection", Some(self.light_direction.clone()));
        self.directional = Some(Arc::new(EffectPass::new(device, ctx, desc)));

        let program = base.with_definition("#define POINT_LIGHT").program(device, ctx)?;
        let desc = volume(EffectPassDesc::new(program))
            .uniform_param("worldViewProjMatrix", Some(self.transform.world_view_proj().clone()))
            .uniform_param("lightPosition", Some(self.light_position.clone()));
        self.point = Some(Arc::new(EffectPass::new(device, ctx, desc)));
        Ok(())
    }

    /// Moves the light into object space.
    fn update_light(&self) {
        let world = self
            .transform
            .parameter("worldMatrix")
            .and_then(|p| p.read().mat4(0))
            .unwrap_or(Mat4::IDENTITY);
        let to_object = world.inverse();
        match self.light {
            ShadowLight::Directional { direction } => {
                self.light_direction
                    .write_values(to_object.transform_vector3(direction));
            }
            ShadowLight::Point { position } => {
                self.light_position
                    .write_values(to_object.transform_point3(position));
            }
        }
    }
}

impl Effect for ExtrudeEffect {
    fn present(
        &mut self,
        device: &mut dyn Device,
        ctx: &mut RenderContext,
        _group: RenderGroup,
        pass: RenderPass,
    ) -> PassList {
        if self.build.needs_rebuild(ctx.technique) {
            self.directional = None;
            self.point = None;
            if let Err(err) = self.rebuild(device, ctx) {
                report_build_error("shadow volume extrude", &err);
            }
            self.build.built(ctx.technique);
        }

        let selected = match (pass, self.light) {
            (RenderPass::DIRECTIONAL_SHADOW_VOLUME, ShadowLight::Directional { .. }) => &self.directional,
            (RenderPass::POINT_SHADOW_VOLUME, ShadowLight::Point { .. }) => &self.point,
            _ => return PassList::new(),
        };
        let Some(volume) = selected.clone() else {
            return PassList::new();
        };
        self.transform.update_matrices(ctx);
        self.update_light();
        vec![volume]
    }

    fn parameter(&self, name: &str) -> Option<ParamHandle> {
        match name {
            "lightDirection" => Some(self.light_direction.clone()),
            "lightPosition" => Some(self.light_position.clone()),
            _ => self.transform.parameter(name),
        }
    }

    fn bind_parameter(&mut self, name: &str, param: Option<ParamHandle>) -> bool {
        name == "worldMatrix" && self.transform.bind_parameter(name, param)
    }

    fn query_attribute(&self, name: &str) -> Option<u32> {
        self.transform.query_attribute(name)
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

    #[test]
    fn point_light_moves_into_object_space() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let world = Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0));
        let mut effect = ExtrudeEffect::new(
            &mut ctx,
            ShadowLight::Point {
                position: Vec3::new(2.0, 5.0, 0.0),
            },
        )
        .with_world(ParamHandle::anonymous(world, false));

        assert!(effect
            .present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::DIRECTIONAL_SHADOW_VOLUME)
            .is_empty());
        let passes = effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::POINT_SHADOW_VOLUME);
        assert_eq!(passes.len(), 1);
        passes[0].begin(&mut device, 0);
        device.draw(0..12, 0..1);

        let record = &device.draws[0];
        assert!(record.is_defined("POINT_LIGHT"));
        let position = record.uniform("lightPosition").unwrap().as_f32s();
        assert_relative_eq!(position[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(position[1], 5.0, epsilon = 1e-6);
    }

    #[test]
    fn directional_volume_writes_no_color() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let mut effect = ExtrudeEffect::new(&mut ctx, ShadowLight::Directional { direction: Vec3::NEG_Y });

        let passes = effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::DIRECTIONAL_SHADOW_VOLUME);
        passes[0].begin(&mut device, 0);
        device.draw(0..12, 0..1);

        let record = &device.draws[0];
        assert!(record.is_defined("DIRECTIONAL_LIGHT"));
        assert_eq!(record.uniform("lightDirection").unwrap().as_f32s(), vec![0.0, -1.0, 0.0]);
        match record.states[2].and_then(|s| device.state_desc(s).copied()) {
            Some(crate::device::StateDesc::Rasterizer(desc)) => {
                assert!(desc.color_writes.is_empty());
                assert_eq!(desc.cull, None);
            }
            other => panic!("unexpected rasterizer state {other:?}"),
        }
    }

    #[test]
    fn fixed_pipeline_is_rejected() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders().technique(RenderTechnique::FixedPipeline);
        let mut effect = ExtrudeEffect::new(&mut ctx, ShadowLight::Directional { direction: Vec3::NEG_Y });
        assert!(effect
            .present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::DIRECTIONAL_SHADOW_VOLUME)
            .is_empty());
        assert_eq!(device.links, 0);
    }
}
