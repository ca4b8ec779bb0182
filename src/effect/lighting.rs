//! Multi-pass forward lighting.
//!
//! Every light type (directional, point) gets one program variant per bucket
//! size `1..=MAX_LIGHTS_PER_DRAW`, each in a front-face and a back-face flavor:
//!
//! ```text
//!                 NUM_LIGHTS 1    NUM_LIGHTS 2    NUM_LIGHTS 3
//! directional     front/back      front/back      front/back
//! point           front/back      front/back      front/back
//! ```
//!
//! The renderer publishes `lightCount` before each lighting draw and the
//! effect picks the matching bucket, so switching bucket sizes never
//! recompiles anything.

use std::sync::Arc;

use glam::Vec4;

use super::{BuildState, Effect, EffectState, TransformEffect, report_build_error};
use crate::config::{MAX_LIGHTS_PER_DRAW, RenderTechnique};
use crate::device::{BlendStateDesc, DepthStencilDesc, Device, RasterizerDesc, TextureId};
use crate::effect_pass::{EffectPass, EffectPassDesc, Pass, PassList, RenderBin};
use crate::error::{RenderError, Result};
use crate::ffp_pass::{FixedFunctionPass, FixedFunctionPassDesc};
use crate::phase::{RenderGroup, RenderPass};
use crate::tables::{ParamHandle, ParamType, ParamValue, RenderContext, TextureKind};

/// Surface properties of a lit object.
#[derive(Clone, Debug, PartialEq)]
pub struct LightingMaterial {
    /// Diffuse color in `xyz`, specular factor in `w`.
    pub diffuse_specular: Vec4,
    pub shininess: f32,
    /// Modulates `diffuse_specular` per texel when set.
    pub diffuse_specular_map: Option<TextureId>,
}

impl Default for LightingMaterial {
    fn default() -> Self {
        Self {
            diffuse_specular: Vec4::new(0.8, 0.8, 0.8, 0.5),
            shininess: 32.0,
            diffuse_specular_map: None,
        }
    }
}

#[derive(Clone)]
struct LightPasses {
    front: Arc<dyn Pass>,
    back: Arc<dyn Pass>,
}

const LIGHT_TYPES: [(&str, &str); 2] = [
    ("#define DIRECTIONAL_LIGHTING", "lightViewDirectionAmbient"),
    ("#define POINT_LIGHTING", "lightViewPositionRadius"),
];

fn light_type(pass: RenderPass) -> Option<usize> {
    match pass {
        RenderPass::DIRECTIONAL_LIGHTING => Some(0),
        RenderPass::POINT_LIGHTING => Some(1),
        _ => None,
    }
}

/// Diffuse/specular lighting, one additive draw per light bucket.
///
/// Binding `opacity` turns the material transparent: passes alpha-blend,
/// write depth and land in the transparent bins, drawing back faces before
/// front faces.
pub struct LightingEffect {
    transform: TransformEffect,

    diffuse_specular: ParamHandle,
    shininess: ParamHandle,
    diffuse_specular_map: Option<ParamHandle>,
    opacity: Option<ParamHandle>,
    opacity_one: ParamHandle,

    passes: [[Option<LightPasses>; MAX_LIGHTS_PER_DRAW]; 2],
    ffp: Option<Arc<dyn Pass>>,
    build: BuildState,
}

impl LightingEffect {
    pub fn new(ctx: &mut RenderContext, material: &LightingMaterial) -> Self {
        Self {
            transform: TransformEffect::new(ctx),
            diffuse_specular: ParamHandle::anonymous(material.diffuse_specular, false),
            shininess: ParamHandle::anonymous(material.shininess, false),
            diffuse_specular_map: material
                .diffuse_specular_map
                .map(|map| ParamHandle::anonymous(ParamValue::Texture(TextureKind::D2, Some(map)), false)),
            opacity: None,
            opacity_one: ParamHandle::anonymous(1.0f32, false),
            passes: Default::default(),
            ffp: None,
            build: BuildState::default(),
        }
    }

    pub fn with_world(mut self, world: ParamHandle) -> Self {
        self.transform.bind_parameter("worldMatrix", Some(world));
        self
    }

    pub fn transform(&self) -> &TransformEffect {
        &self.transform
    }

    pub fn is_transparent(&self) -> bool {
        self.opacity.is_some()
    }

    /// Updates material values in place. Adding or removing the texture map
    /// changes the programs and marks the effect dirty.
    pub fn set_material(&mut self, material: &LightingMaterial) {
        self.diffuse_specular.write_values(material.diffuse_specular);
        self.shininess.write_values(material.shininess);

        let had_map = self.diffuse_specular_map.is_some();
        match material.diffuse_specular_map {
            Some(texture) if had_map => {
                if let Some(map) = &self.diffuse_specular_map {
                    map.set_texture(Some(texture));
                }
            }
            None if !had_map => {}
            texture => {
                self.diffuse_specular_map = texture
                    .map(|t| ParamHandle::anonymous(ParamValue::Texture(TextureKind::D2, Some(t)), false));
                self.build.mark_dirty();
            }
        }
    }

    fn refresh(&mut self, device: &mut dyn Device, ctx: &mut RenderContext) {
        self.transform.refresh(device, ctx);
        if !self.build.needs_rebuild(ctx.technique) {
            return;
        }
        self.passes = Default::default();
        self.ffp = None;
        if let Err(err) = self.rebuild(device, ctx) {
            report_build_error("lighting", &err);
        }
        self.build.built(ctx.technique);
    }

    fn rebuild(&mut self, device: &mut dyn Device, ctx: &mut RenderContext) -> Result<()> {
        match ctx.technique {
            RenderTechnique::ForwardRendering => self.build_forward(device, ctx),
            RenderTechnique::FixedPipeline => {
                let desc = FixedFunctionPassDesc::new()
                    .world_view(Some(self.transform.world_view().clone()))
                    .diffuse_specular(Some(self.diffuse_specular.clone()))
                    .shininess(Some(self.shininess.clone()))
                    .texture(0, self.diffuse_specular_map.clone());
                self.ffp = Some(Arc::new(FixedFunctionPass::new(device, ctx, desc)));
                Ok(())
            }
            technique @ RenderTechnique::DeferredShading => Err(RenderError::UnsupportedTechnique {
                effect: "LightingEffect",
                technique,
            }),
        }
    }

    fn build_forward(&mut self, device: &mut dyn Device, ctx: &mut RenderContext) -> Result<()> {
        let mut base = self
            .transform
            .vertex_program()
            .with_shader("Forward/normal.frag")
            .with_shader("Forward/lighting.frag");
        if self.diffuse_specular_map.is_some() {
            base.add_definition("#define ENABLE_DIFFUSE_SPECULAR_MAP");
        }

        let transparent = self.is_transparent();
        let (blend, depth, front_bin, back_bin) = if transparent {
            (
                BlendStateDesc::ALPHA,
                DepthStencilDesc::default(),
                RenderBin::FrontTransparent,
                RenderBin::BackTransparent,
            )
        } else {
            (
                BlendStateDesc::ADDITIVE,
                DepthStencilDesc::read_only(),
                RenderBin::Opaque,
                RenderBin::Opaque,
            )
        };
        let opacity = self.opacity.clone().unwrap_or_else(|| self.opacity_one.clone());

        for (kind, (definition, light_parameter)) in LIGHT_TYPES.into_iter().enumerate() {
            for lights in 1..=MAX_LIGHTS_PER_DRAW {
                let program = base
                    .clone()
                    .with_definition(definition)
                    .with_definition(format!("#define NUM_LIGHTS {lights}"))
                    .program(device, ctx)?;

                let mut desc = EffectPassDesc::new(program)
                    .blend(blend)
                    .depth_stencil(depth)
                    .uniform("projectionMatrix", "projectionMatrix")
                    .uniform("lightColorIntensity", "lightColorIntensity");
                desc = if kind == 0 {
                    desc.uniform("lightDirectionAmbient", light_parameter)
                } else {
                    desc.uniform("lightPositionRadius", light_parameter)
                };
                desc = desc
                    .uniform_param("materialDiffuseSpecular", Some(self.diffuse_specular.clone()))
                    .uniform_param("materialShininess", Some(self.shininess.clone()))
                    .uniform_param("normalMatrix", Some(self.transform.normal().clone()))
                    .uniform_param("worldViewMatrix", Some(self.transform.world_view().clone()))
                    .uniform_param("worldViewProjMatrix", Some(self.transform.world_view_proj().clone()))
                    .uniform_param("opacity", Some(opacity.clone()));
                if self.diffuse_specular_map.is_some() {
                    desc = desc.uniform_param("diffuseSpecularMap", self.diffuse_specular_map.clone());
                }
                let desc = self.transform.bone_uniforms(desc);

                let front = EffectPass::new(
                    device,
                    ctx,
                    desc.clone().rasterizer(RasterizerDesc::default()).bin(front_bin),
                );
                let back = EffectPass::new(
                    device,
                    ctx,
                    desc.rasterizer(RasterizerDesc::default().cull(Some(wgpu::Face::Front)))
                        .bin(back_bin),
                );
                self.passes[kind][lights - 1] = Some(LightPasses {
                    front: Arc::new(front),
                    back: Arc::new(back),
                });
            }
        }
        Ok(())
    }
}

impl Effect for LightingEffect {
    fn present(
        &mut self,
        device: &mut dyn Device,
        ctx: &mut RenderContext,
        group: RenderGroup,
        pass: RenderPass,
    ) -> PassList {
        self.refresh(device, ctx);

        if ctx.technique == RenderTechnique::FixedPipeline {
            return match &self.ffp {
                Some(ffp) if group == RenderGroup::MAIN && pass == RenderPass::OPAQUE => {
                    self.transform.update_matrices(ctx);
                    vec![Arc::clone(ffp)]
                }
                _ => PassList::new(),
            };
        }

        let Some(kind) = light_type(pass) else {
            return self.transform.present(device, ctx, group, pass);
        };

        let lights = ctx
            .parameters
            .parameter_of_type("lightCount", ParamType::Int)
            .and_then(|p| p.read().int(0))
            .unwrap_or(1)
            .clamp(1, MAX_LIGHTS_PER_DRAW as i32) as usize;
        let Some(LightPasses { front, back }) = self.passes[kind][lights - 1].clone() else {
            return PassList::new();
        };

        let passes = match (group == RenderGroup::REFLECT, self.is_transparent()) {
            (true, false) => vec![back],
            (true, true) => vec![back, front],
            (false, false) => vec![front],
            (false, true) => vec![front, back],
        };
        self.transform.update_matrices(ctx);
        passes
    }

    fn parameter(&self, name: &str) -> Option<ParamHandle> {
        match name {
            "opacity" => self.opacity.clone(),
            "materialDiffuseSpecular" => Some(self.diffuse_specular.clone()),
            "materialShininess" => Some(self.shininess.clone()),
            "diffuseSpecularMap" => self.diffuse_specular_map.clone(),
            _ => self.transform.parameter(name),
        }
    }

    fn bind_parameter(&mut self, name: &str, param: Option<ParamHandle>) -> bool {
        let fits = |ty: ParamType| param.as_ref().is_none_or(|p| p.ty() == ty);
        match name {
            "opacity" if fits(ParamType::Float) => self.opacity = param,
            "materialDiffuseSpecular" => match param {
                Some(p) if p.ty() == ParamType::Vec4 => self.diffuse_specular = p,
                _ => return false,
            },
            "materialShininess" => match param {
                Some(p) if p.ty() == ParamType::Float => self.shininess = p,
                _ => return false,
            },
            "diffuseSpecularMap" if param.as_ref().is_none_or(|p| p.ty().is_texture()) => {
                self.diffuse_specular_map = param;
            }
            "opacity" | "diffuseSpecularMap" => return false,
            _ => {
                if !self.transform.bind_parameter(name, param) {
                    return false;
                }
                if self.transform.state() == EffectState::Clean {
                    return true;
                }
            }
        }
        self.build.mark_dirty();
        true
    }

    fn query_attribute(&self, name: &str) -> Option<u32> {
        self.transform.query_attribute(name)
    }

    fn state(&self) -> EffectState {
        match (self.build.state(), self.transform.state()) {
            (EffectState::Clean, EffectState::Clean) => EffectState::Clean,
            _ => EffectState::Dirty,
        }
    }

    fn mark_dirty(&mut self) {
        self.build.mark_dirty();
        self.transform.mark_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DrawRecord, HeadlessDevice, StateDesc};

    fn draw(device: &mut HeadlessDevice, pass: &Arc<dyn Pass>) -> DrawRecord {
        pass.begin(device, 0);
        device.draw(0..36, 0..1);
        pass.end(device);
        device.draws.pop().unwrap()
    }

    fn cull(device: &HeadlessDevice, record: &DrawRecord) -> Option<wgpu::Face> {
        match record.states[2].and_then(|s| device.state_desc(s).copied()) {
            Some(StateDesc::Rasterizer(desc)) => desc.cull,
            other => panic!("unexpected rasterizer state {other:?}"),
        }
    }

    #[test]
    fn opaque_main_group_draws_front_faces_additively() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let mut effect = LightingEffect::new(&mut ctx, &LightingMaterial::default());

        let passes = effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::DIRECTIONAL_LIGHTING);
        assert_eq!(passes.len(), 1);
        assert!(passes[0].priority() < 1 << 32);

        let record = draw(&mut device, &passes[0]);
        assert_eq!(cull(&device, &record), Some(wgpu::Face::Back));
        assert_eq!(
            record.states[0].and_then(|s| device.state_desc(s).copied()),
            Some(StateDesc::Blend(BlendStateDesc::ADDITIVE))
        );
        assert_eq!(record.defines.get("NUM_LIGHTS").map(String::as_str), Some("1"));
        assert!(record.is_defined("DIRECTIONAL_LIGHTING"));
    }

    #[test]
    fn all_buckets_are_prebuilt() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let count = ctx.parameters.add_parameter("lightCount", 3i32, false).unwrap();
        let mut effect = LightingEffect::new(&mut ctx, &LightingMaterial::default());

        let passes = effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::POINT_LIGHTING);
        let links = device.links;
        let record = draw(&mut device, &passes[0]);
        assert_eq!(record.defines.get("NUM_LIGHTS").map(String::as_str), Some("3"));
        assert!(record.is_defined("POINT_LIGHTING"));

        count.write_values(2i32);
        let passes = effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::POINT_LIGHTING);
        let record = draw(&mut device, &passes[0]);
        assert_eq!(record.defines.get("NUM_LIGHTS").map(String::as_str), Some("2"));
        assert_eq!(device.links, links);
    }

    #[test]
    fn transparent_material_orders_front_and_back() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let mut effect = LightingEffect::new(&mut ctx, &LightingMaterial::default());
        assert!(effect.bind_parameter("opacity", Some(ParamHandle::anonymous(0.5f32, false))));
        assert_eq!(effect.state(), EffectState::Dirty);

        let main = effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::DIRECTIONAL_LIGHTING);
        assert_eq!(main.len(), 2);
        assert!(main[0].priority() >> 32 == RenderBin::FrontTransparent as u64);
        assert!(main[1].priority() >> 32 == RenderBin::BackTransparent as u64);
        let front = draw(&mut device, &main[0]);
        assert_eq!(cull(&device, &front), Some(wgpu::Face::Back));
        assert_eq!(front.uniform("opacity").unwrap().as_f32s(), [0.5]);

        let reflect = effect.present(&mut device, &mut ctx, RenderGroup::REFLECT, RenderPass::DIRECTIONAL_LIGHTING);
        let first = draw(&mut device, &reflect[0]);
        assert_eq!(cull(&device, &first), Some(wgpu::Face::Front));
    }

    #[test]
    fn opaque_reflection_uses_back_pass_only() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let mut effect = LightingEffect::new(&mut ctx, &LightingMaterial::default());

        let passes = effect.present(&mut device, &mut ctx, RenderGroup::REFLECT, RenderPass::DIRECTIONAL_LIGHTING);
        assert_eq!(passes.len(), 1);
        let record = draw(&mut device, &passes[0]);
        assert_eq!(cull(&device, &record), Some(wgpu::Face::Front));
    }

    #[test]
    fn non_lighting_passes_fall_back_to_transform() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let mut effect = LightingEffect::new(&mut ctx, &LightingMaterial::default());

        let depth = effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::DEPTH);
        assert_eq!(depth.len(), 1);
        assert!(draw(&mut device, &depth[0]).is_defined("DEPTH_ONLY"));
        assert!(effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::SPOT_LIGHTING).is_empty());
    }

    #[test]
    fn diffuse_map_enables_sampler() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let mut effect = LightingEffect::new(&mut ctx, &LightingMaterial::default());
        effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::DIRECTIONAL_LIGHTING);

        effect.set_material(&LightingMaterial {
            diffuse_specular_map: Some(TextureId(11)),
            ..LightingMaterial::default()
        });
        assert_eq!(effect.state(), EffectState::Dirty);

        let passes = effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::DIRECTIONAL_LIGHTING);
        passes[0].begin(&mut device, 2);
        device.draw(0..3, 0..1);
        let record = device.draws.pop().unwrap();
        assert!(record.is_defined("ENABLE_DIFFUSE_SPECULAR_MAP"));
        assert_eq!(record.textures.get(&2), Some(&TextureId(11)));
    }

    #[test]
    fn fixed_pipeline_uses_one_fixed_function_pass() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders().technique(RenderTechnique::FixedPipeline);
        let mut effect = LightingEffect::new(&mut ctx, &LightingMaterial::default());

        assert!(effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::DIRECTIONAL_LIGHTING).is_empty());
        let passes = effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::OPAQUE);
        assert_eq!(passes.len(), 1);
        assert_eq!(passes[0].priority(), 0);
        assert_eq!(device.links, 0);
    }

    #[test]
    fn deferred_contributes_nothing() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders().technique(RenderTechnique::DeferredShading);
        let mut effect = LightingEffect::new(&mut ctx, &LightingMaterial::default());

        for pass in [RenderPass::DEPTH, RenderPass::OPAQUE, RenderPass::DIRECTIONAL_LIGHTING] {
            assert!(effect.present(&mut device, &mut ctx, RenderGroup::MAIN, pass).is_empty());
        }
        assert_eq!(effect.state(), EffectState::Clean);
    }

    #[test]
    fn bone_binding_dirties_lighting_passes() {
        let mut device = HeadlessDevice::new();
        let mut ctx = RenderContext::with_builtin_shaders();
        let mut effect = LightingEffect::new(&mut ctx, &LightingMaterial::default());
        effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::DIRECTIONAL_LIGHTING);

        let bones = ParamHandle::anonymous(vec![glam::Mat4::IDENTITY; 2], false);
        assert!(effect.bind_parameter("boneMatrices", Some(bones)));
        assert_eq!(effect.state(), EffectState::Dirty);

        let passes = effect.present(&mut device, &mut ctx, RenderGroup::MAIN, RenderPass::DIRECTIONAL_LIGHTING);
        let record = draw(&mut device, &passes[0]);
        assert!(record.is_defined("USE_BONE_MATRICES"));
        assert_eq!(record.uniform("boneMatrices").map(|u| u.count), Some(2));
    }
}
