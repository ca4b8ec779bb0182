//! Per-object transforms and the depth-only passes.

use std::sync::Arc;

use glam::{Mat3, Mat4};

use super::{BuildState, DefaultAttributes, Effect, EffectState, report_build_error};
use crate::config::RenderTechnique;
use crate::device::{Device, RasterizerDesc};
use crate::effect_pass::{EffectPass, EffectPassDesc, Pass, PassList};
use crate::error::Result;
use crate::phase::{RenderGroup, RenderPass};
use crate::shader_program::EffectShaderProgram;
use crate::tables::{ParamHandle, ParamType, RenderContext};

/// Owns an object's derived matrices and draws it into the depth buffer.
///
/// `present` on the `Depth` pass refreshes `worldViewProjMatrix` from the
/// scene's `viewMatrix`/`projectionMatrix` and the bound `worldMatrix`, then
/// returns the depth pass. Reflection cameras get a variant culling front
/// faces, since the mirrored view flips the winding.
///
/// Binding `boneMatrices`, or both `boneRotations` and `boneTranslations`,
/// switches the programs to `skinned.vert`.
pub struct TransformEffect {
    world: Option<ParamHandle>,
    bone_matrices: Option<ParamHandle>,
    bone_rotations: Option<ParamHandle>,
    bone_translations: Option<ParamHandle>,

    world_view: ParamHandle,
    world_view_proj: ParamHandle,
    normal: ParamHandle,

    depth: Option<Arc<dyn Pass>>,
    back_depth: Option<Arc<dyn Pass>>,
    build: BuildState,
    attributes: DefaultAttributes,
}

impl TransformEffect {
    pub fn new(ctx: &mut RenderContext) -> Self {
        Self {
            world: None,
            bone_matrices: None,
            bone_rotations: None,
            bone_translations: None,
            world_view: ParamHandle::anonymous(Mat4::IDENTITY, false),
            world_view_proj: ParamHandle::anonymous(Mat4::IDENTITY, false),
            normal: ParamHandle::anonymous(Mat3::IDENTITY, false),
            depth: None,
            back_depth: None,
            build: BuildState::default(),
            attributes: DefaultAttributes::acquire(&mut ctx.attributes),
        }
    }

    /// Binds the object's world matrix.
    pub fn with_world(mut self, world: ParamHandle) -> Self {
        self.bind_parameter("worldMatrix", Some(world));
        self
    }

    pub fn is_skinned(&self) -> bool {
        self.bone_matrices.is_some() || (self.bone_rotations.is_some() && self.bone_translations.is_some())
    }

    pub fn world_view(&self) -> &ParamHandle {
        &self.world_view
    }

    pub fn world_view_proj(&self) -> &ParamHandle {
        &self.world_view_proj
    }

    pub fn normal(&self) -> &ParamHandle {
        &self.normal
    }

    /// Vertex stage matching the current skinning inputs.
    pub(crate) fn vertex_program(&self) -> EffectShaderProgram {
        if !self.is_skinned() {
            return EffectShaderProgram::new().with_shader("rigid.vert");
        }
        let program = EffectShaderProgram::new().with_shader("skinned.vert");
        if self.bone_matrices.is_some() {
            program.with_definition("#define USE_BONE_MATRICES")
        } else {
            program
        }
    }

    /// Adds the bound bone uniforms to `desc`.
    pub(crate) fn bone_uniforms(&self, mut desc: EffectPassDesc) -> EffectPassDesc {
        if self.bone_matrices.is_some() {
            desc = desc.uniform_param("boneMatrices", self.bone_matrices.clone());
        } else if self.is_skinned() {
            desc = desc
                .uniform_param("boneRotations", self.bone_rotations.clone())
                .uniform_param("boneTranslations", self.bone_translations.clone());
        }
        desc
    }

    /// Refreshes the world-view, world-view-projection and normal matrices.
    pub(crate) fn update_matrices(&self, ctx: &RenderContext) {
        let scene_matrix = |name: &str| {
            ctx.parameters
                .parameter_of_type(name, ParamType::Mat4)
                .and_then(|p| p.read().mat4(0))
                .unwrap_or(Mat4::IDENTITY)
        };
        let view = scene_matrix("viewMatrix");
        let projection = scene_matrix("projectionMatrix");
        let world = self
            .world
            .as_ref()
            .and_then(|p| p.read().mat4(0))
            .unwrap_or(Mat4::IDENTITY);

        let world_view = view * world;
        self.world_view.write_values(world_view);
        self.world_view_proj.write_values(projection * world_view);
        self.normal
            .write_values(Mat3::from_mat4(world_view.inverse().transpose()));
    }

    /// Rebuilds the depth passes if needed.
    pub(crate) fn refresh(&mut self, device: &mut dyn Device, ctx: &mut RenderContext) {
        if !self.build.needs_rebuild(ctx.technique) {
            return;
        }
        self.depth = None;
        self.back_depth = None;
        if let Err(err) = self.rebuild(device, ctx) {
            report_build_error("transform", &err);
        }
        self.build.built(ctx.technique);
    }

    fn rebuild(&mut self, device: &mut dyn Device, ctx: &mut RenderContext) -> Result<()> {
        if ctx.technique != RenderTechnique::ForwardRendering {
            return Ok(());
        }

        let program = self
            .vertex_program()
            .with_shader("fill.frag")
            .with_definition("#define DEPTH_ONLY")
            .program(device, ctx)?;

        let desc = self.bone_uniforms(
            EffectPassDesc::new(program)
                .uniform_param("worldViewProjMatrix", Some(self.world_view_proj.clone())),
        );
        let depth_only = RasterizerDesc::default().color_writes(wgpu::ColorWrites::empty());

        self.depth = Some(Arc::new(EffectPass::new(
            device,
            ctx,
            desc.clone().rasterizer(depth_only),
        )));
        self.back_depth = Some(Arc::new(EffectPass::new(
            device,
            ctx,
            desc.rasterizer(depth_only.cull(Some(wgpu::Face::Front))),
        )));
        Ok(())
    }
}

impl Effect for TransformEffect {
    fn present(
        &mut self,
        device: &mut dyn Device,
        ctx: &mut RenderContext,
        group: RenderGroup,
        pass: RenderPass,
    ) -> PassList {
        self.refresh(device, ctx);
        if pass != RenderPass::DEPTH {
            return PassList::new();
        }

        let selected = if group == RenderGroup::REFLECT {
            &self.back_depth
        } else {
            &self.depth
        };
        match selected {
            Some(depth) => {
                self.update_matrices(ctx);
                vec![Arc::clone(depth)]
            }
            None => PassList::new(),
        }
    }

    fn parameter(&self, name: &str) -> Option<ParamHandle> {
        match name {
            "worldMatrix" => self.world.clone(),
            "boneMatrices" => self.bone_matrices.clone(),
            "boneRotations" => self.bone_rotations.clone(),
            "boneTranslations" => self.bone_translations.clone(),
            "worldViewMatrix" => Some(self.world_view.clone()),
            "worldViewProjMatrix" => Some(self.world_view_proj.clone()),
            "normalMatrix" => Some(self.normal.clone()),
            _ => None,
        }
    }

    fn bind_parameter(&mut self, name: &str, param: Option<ParamHandle>) -> bool {
        let (slot, ty) = match name {
            "worldMatrix" => (&mut self.world, ParamType::Mat4),
            "boneMatrices" => (&mut self.bone_matrices, ParamType::Mat4),
            "boneRotations" => (&mut self.bone_rotations, ParamType::Vec4),
            "boneTranslations" => (&mut self.bone_translations, ParamType::Vec3),
            _ => return false,
        };
        if param.as_ref().is_some_and(|p| p.ty() != ty) {
            return false;
        }
        *slot = param;
        if name != "worldMatrix" {
            self.build.mark_dirty();
        }
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
    use glam::{Vec3, Vec4};

    fn scene(ctx: &mut RenderContext, view: Mat4, projection: Mat4) -> (ParamHandle, ParamHandle) {
        (
            ctx.parameters.add_parameter("viewMatrix", view, false).unwrap(),
            ctx.parameters.add_parameter("projectionMatrix", projection, false).unwrap(),
        )
    }

    #[test]
    fn depth_pass_writes_world_view_projection() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_rh_gl(1.0, 1.0, 0.1, 50.0);
        let _scene = scene(&mut ctx, view, projection);
        let world = Mat4::from_translation(Vec3::new(1.0, 0.0, -2.0));

        let mut effect = TransformEffect::new(&mut ctx).with_world(ParamHandle::anonymous(world, false));
        let passes = effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::DEPTH);
        assert_eq!(passes.len(), 1);
        assert_eq!(effect.state(), EffectState::Clean);

        passes[0].begin(&mut device, 0);
        device.draw(0..36, 0..1);
        let draw = &device.draws[0];
        assert!(draw.is_defined("DEPTH_ONLY"));
        let uploaded = draw.uniform("worldViewProjMatrix").unwrap().as_f32s();
        let expected = (projection * view * world).to_cols_array();
        for (a, b) in uploaded.iter().zip(expected) {
            assert_relative_eq!(*a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn reflection_group_culls_front_faces() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let mut effect = TransformEffect::new(&mut ctx);

        let passes = effect.present(&mut device, &mut ctx, RenderGroup::REFLECT, RenderPass::DEPTH);
        passes[0].begin(&mut device, 0);
        device.draw(0..3, 0..1);

        let raster = device.draws[0].states[2].and_then(|s| device.state_desc(s).copied());
        match raster {
            Some(StateDesc::Rasterizer(desc)) => {
                assert_eq!(desc.cull, Some(wgpu::Face::Front));
                assert!(desc.color_writes.is_empty());
            }
            other => panic!("unexpected rasterizer state {other:?}"),
        }
    }

    #[test]
    fn other_passes_get_nothing() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let mut effect = TransformEffect::new(&mut ctx);
        assert!(effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::OPAQUE).is_empty());
    }

    #[test]
    fn bone_bindings_switch_to_skinned_program() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let mut effect = TransformEffect::new(&mut ctx);
        effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::DEPTH);

        assert!(effect.bind_parameter("boneRotations", Some(ParamHandle::anonymous(vec![Vec4::W; 4], false))));
        assert!(!effect.is_skinned());
        assert!(effect.bind_parameter("boneTranslations", Some(ParamHandle::anonymous(vec![Vec3::ZERO; 4], false))));
        assert!(effect.is_skinned());
        assert_eq!(effect.state(), EffectState::Dirty);

        let passes = effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::DEPTH);
        passes[0].begin(&mut device, 0);
        device.draw(0..3, 0..1);
        assert_eq!(device.draws[0].uniform("boneRotations").map(|u| u.count), Some(4));
        assert!(!device.draws[0].is_defined("USE_BONE_MATRICES"));
    }

    #[test]
    fn mistyped_bindings_are_rejected() {
        let mut ctx = RenderContext::with_builtin_shaders();
        let mut effect = TransformEffect::new(&mut ctx);
        assert!(!effect.bind_parameter("worldMatrix", Some(ParamHandle::anonymous(Vec4::ONE, false))));
        assert!(!effect.bind_parameter("albedo", None));
        assert!(effect.bind_parameter("worldMatrix", None));
    }

    #[test]
    fn fixed_pipeline_has_no_depth_pass() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders().technique(RenderTechnique::FixedPipeline);
        let mut effect = TransformEffect::new(&mut ctx);
        assert!(effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::DEPTH).is_empty());
        assert_eq!(device.links, 0);
    }
}
