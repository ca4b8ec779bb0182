//! Passes: the unit of GPU state an effect hands to the renderer.
//!
//! A pass is immutable once built. It captures one compiled program, one state
//! object per category and the list of uniforms it feeds, each paired with
//! the parameter that supplies it. The renderer brackets every draw with
//! [`Pass::begin`] and [`Pass::end`].
//!
//! # Ordering
//!
//! Packets in a phase are stable-sorted by [`Pass::priority`]:
//!
//! ```text
//!  63          32 31           0
//! ┌──────────────┬──────────────┐
//! │  RenderBin   │  variant id  │
//! └──────────────┴──────────────┘
//! ```
//!
//! so opaque geometry draws before transparent geometry, back faces of
//! transparent geometry before front faces, and draws sharing a program
//! variant end up next to each other.
//!
//! # Example
//!
//! ```
//! use glam::{Mat4, Vec4};
//! use phalanx::{
//!     EffectPass, EffectPassDesc, EffectShaderProgram, HeadlessDevice, ParamHandle, RasterizerDesc,
//!     RenderContext,
//! };
//!
//! let mut device = HeadlessDevice::new();
//! let mut ctx = RenderContext::with_builtin_shaders();
//! let wvp = ParamHandle::anonymous(Mat4::IDENTITY, false);
//! let color = ParamHandle::anonymous(Vec4::new(0.0, 1.0, 0.0, 1.0), false);
//!
//! let program = EffectShaderProgram::new()
//!     .with_shader("debug.vert")
//!     .with_shader("debug.frag")
//!     .program(&mut device, &mut ctx)?;
//!
//! let pass = EffectPass::new(
//!     &mut device,
//!     &mut ctx,
//!     EffectPassDesc::new(program)
//!         .rasterizer(RasterizerDesc::default().cull(None))
//!         .uniform_param("worldViewProjMatrix", Some(wvp.clone()))
//!         .uniform_param("color", Some(color.clone())),
//! );
//! assert_eq!(pass.bound_uniforms(), 2);
//! # Ok::<(), phalanx::RenderError>(())
//! ```

use std::sync::Arc;

use log::warn;

use crate::device::{
    BlendStateDesc, DepthStencilDesc, Device, RasterizerDesc, StateCategory, StateDesc, StateId,
};
use crate::error::RenderError;
use crate::shader_program::CompiledProgram;
use crate::tables::{ParamHandle, RenderContext, SamplerBinder, UniformBinder};

/// GPU state bracketing the draws of one packet.
pub trait Pass: Send + Sync {
    /// Sort key within a phase. Lower draws first.
    fn priority(&self) -> u64;

    /// Binds program, uniforms and states. Textures go to consecutive stages
    /// starting at `first_stage`.
    fn begin(&self, device: &mut dyn Device, first_stage: u32);

    /// Releases what `begin` bound that must not leak into the next pass.
    fn end(&self, device: &mut dyn Device);
}

/// Passes an effect contributes to one phase.
pub type PassList = Vec<Arc<dyn Pass>>;

/// Most passes an effect returns from a single `present`.
pub const MAX_NUM_PASSES: usize = 5;

/// Coarse draw order class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum RenderBin {
    #[default]
    Opaque = 0,
    BackTransparent = 1,
    FrontTransparent = 2,
}

/// Packs a bin and a program variant into a sort key.
pub fn priority(bin: RenderBin, variant_id: u32) -> u64 {
    ((bin as u64) << 32) | u64::from(variant_id)
}

/// Where a uniform's value comes from.
#[derive(Clone, Debug)]
pub enum ParamSource {
    /// Looked up by name in the context's parameter table.
    Named(String),
    /// A handle owned by the effect. `None` means the effect has no value.
    Direct(Option<ParamHandle>),
}

/// A uniform and the parameter feeding it.
#[derive(Clone, Debug)]
pub struct UniformDesc {
    pub uniform: String,
    pub source: ParamSource,
}

/// Everything needed to build an [`EffectPass`].
///
/// States left as `None` use the shared defaults: blending off, depth test
/// `LessEqual` with writes, back-face culling with filled polygons.
#[derive(Clone, Debug)]
pub struct EffectPassDesc {
    pub program: Arc<CompiledProgram>,
    pub blend: Option<BlendStateDesc>,
    pub depth_stencil: Option<DepthStencilDesc>,
    pub rasterizer: Option<RasterizerDesc>,
    pub uniforms: Vec<UniformDesc>,
    pub bin: RenderBin,
}

impl EffectPassDesc {
    pub fn new(program: Arc<CompiledProgram>) -> Self {
        Self {
            program,
            blend: None,
            depth_stencil: None,
            rasterizer: None,
            uniforms: Vec::new(),
            bin: RenderBin::Opaque,
        }
    }

    pub fn blend(mut self, blend: BlendStateDesc) -> Self {
        self.blend = Some(blend);
        self
    }

    pub fn depth_stencil(mut self, depth_stencil: DepthStencilDesc) -> Self {
        self.depth_stencil = Some(depth_stencil);
        self
    }

    pub fn rasterizer(mut self, rasterizer: RasterizerDesc) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    /// Feeds `uniform` from the named scene parameter `parameter`.
    pub fn uniform(mut self, uniform: impl Into<String>, parameter: impl Into<String>) -> Self {
        self.uniforms.push(UniformDesc {
            uniform: uniform.into(),
            source: ParamSource::Named(parameter.into()),
        });
        self
    }

    /// Feeds `uniform` from a handle the caller owns.
    pub fn uniform_param(mut self, uniform: impl Into<String>, parameter: Option<ParamHandle>) -> Self {
        self.uniforms.push(UniformDesc {
            uniform: uniform.into(),
            source: ParamSource::Direct(parameter),
        });
        self
    }

    pub fn bin(mut self, bin: RenderBin) -> Self {
        self.bin = bin;
        self
    }
}

/// A shader-driven pass.
pub struct EffectPass {
    program: Arc<CompiledProgram>,
    states: [StateId; 3],
    uniforms: Vec<(Arc<UniformBinder>, ParamHandle)>,
    samplers: Vec<(Arc<SamplerBinder>, ParamHandle)>,
    priority: u64,
}

impl EffectPass {
    /// Resolves states and uniform bindings.
    ///
    /// A uniform that cannot be connected (not in the program, no parameter,
    /// unsupported or incompatible type) is logged as a
    /// [`RenderError::ParameterBindingMismatch`] warning and left unbound.
    pub fn new(device: &mut dyn Device, ctx: &mut RenderContext, desc: EffectPassDesc) -> Self {
        let program = desc.program;

        let states = [
            ctx.states.get(device, StateDesc::Blend(desc.blend.unwrap_or_default())),
            ctx.states.get(
                device,
                StateDesc::DepthStencil(desc.depth_stencil.unwrap_or_default()),
            ),
            ctx.states.get(
                device,
                StateDesc::Rasterizer(desc.rasterizer.unwrap_or_default()),
            ),
        ];

        let mut uniforms = Vec::new();
        let mut samplers = Vec::new();
        for UniformDesc { uniform, source } in desc.uniforms {
            let mismatch = |reason: &str| {
                warn!(
                    "{}",
                    RenderError::ParameterBindingMismatch {
                        uniform: uniform.clone(),
                        reason: reason.to_string(),
                    }
                );
            };

            let Some(info) = program.uniform(&uniform) else {
                mismatch("uniform was not loaded");
                continue;
            };
            let param = match source {
                ParamSource::Named(name) => ctx.parameters.parameter(&name),
                ParamSource::Direct(param) => param,
            };
            let Some(param) = param else {
                mismatch("parameter not specified");
                continue;
            };
            let Some(ty) = info.ty else {
                mismatch("unsupported type");
                continue;
            };
            if !param.ty().binds_to(ty) {
                mismatch("incompatible types");
                continue;
            }

            if ty.is_texture() {
                samplers.push((ctx.uniforms.sampler_binder(program.id(), info), param));
            } else {
                uniforms.push((ctx.uniforms.uniform_binder(program.id(), info), param));
            }
        }

        Self {
            priority: priority(desc.bin, program.variant_id()),
            program,
            states,
            uniforms,
            samplers,
        }
    }

    pub fn program(&self) -> &Arc<CompiledProgram> {
        &self.program
    }

    pub fn state(&self, category: StateCategory) -> StateId {
        self.states[category.index()]
    }

    /// Number of connected uniforms, samplers included.
    pub fn bound_uniforms(&self) -> usize {
        self.uniforms.len() + self.samplers.len()
    }
}

impl Pass for EffectPass {
    fn priority(&self) -> u64 {
        self.priority
    }

    fn begin(&self, device: &mut dyn Device, first_stage: u32) {
        if device.current_program() != Some(self.program.id()) {
            device.bind_program(self.program.id());
        }

        for (binder, param) in &self.uniforms {
            binder.bind(device, param);
        }
        for (stage, (binder, param)) in (first_stage..).zip(&self.samplers) {
            binder.bind(device, param, stage);
        }

        for category in StateCategory::ALL {
            let state = self.states[category.index()];
            if device.current_state(category) != Some(state) {
                device.bind_state(category, state);
            }
        }
    }

    fn end(&self, device: &mut dyn Device) {
        for (binder, _) in &self.samplers {
            binder.unbind(device);
        }
    }
}
