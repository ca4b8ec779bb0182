//! Fixed-function pass for the legacy technique.

use log::warn;

use glam::{Mat4, Vec4};

use crate::device::{
    BlendStateDesc, DepthStencilDesc, Device, FixedFunctionState, RasterizerDesc, StateCategory,
    StateDesc, StateId,
};
use crate::effect_pass::{ParamSource, Pass};
use crate::error::RenderError;
use crate::tables::{ParamHandle, ParamType, RenderContext};

/// Texture units a fixed-function pass can feed.
pub const MAX_FFP_TEXTURES: usize = 8;

const DEFAULT_SHININESS: f32 = 1.0;

/// Inputs of a [`FixedFunctionPass`].
///
/// `diffuse_specular` packs the diffuse color in `xyz` and a specular factor
/// in `w`; the specular color is `diffuse * w`.
#[derive(Clone, Debug)]
pub struct FixedFunctionPassDesc {
    pub blend: Option<BlendStateDesc>,
    pub depth_stencil: Option<DepthStencilDesc>,
    pub rasterizer: Option<RasterizerDesc>,
    pub projection: ParamSource,
    pub world_view: ParamSource,
    pub diffuse_specular: ParamSource,
    pub shininess: ParamSource,
    pub textures: [Option<ParamHandle>; MAX_FFP_TEXTURES],
}

impl Default for FixedFunctionPassDesc {
    fn default() -> Self {
        Self {
            blend: None,
            depth_stencil: None,
            rasterizer: None,
            projection: ParamSource::Named("projectionMatrix".to_string()),
            world_view: ParamSource::Direct(None),
            diffuse_specular: ParamSource::Direct(None),
            shininess: ParamSource::Direct(None),
            textures: Default::default(),
        }
    }
}

impl FixedFunctionPassDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rasterizer(mut self, rasterizer: RasterizerDesc) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn depth_stencil(mut self, depth_stencil: DepthStencilDesc) -> Self {
        self.depth_stencil = Some(depth_stencil);
        self
    }

    pub fn projection(mut self, source: ParamSource) -> Self {
        self.projection = source;
        self
    }

    pub fn world_view(mut self, param: Option<ParamHandle>) -> Self {
        self.world_view = ParamSource::Direct(param);
        self
    }

    pub fn diffuse_specular(mut self, param: Option<ParamHandle>) -> Self {
        self.diffuse_specular = ParamSource::Direct(param);
        self
    }

    pub fn shininess(mut self, param: Option<ParamHandle>) -> Self {
        self.shininess = ParamSource::Direct(param);
        self
    }

    /// Binds `param` to texture unit `unit`. Units past the last are ignored.
    pub fn texture(mut self, unit: usize, param: Option<ParamHandle>) -> Self {
        if let Some(slot) = self.textures.get_mut(unit) {
            *slot = param;
        }
        self
    }
}

/// Legacy transform/material state plus textures on fixed units.
pub struct FixedFunctionPass {
    states: [StateId; 3],
    projection: Option<ParamHandle>,
    world_view: Option<ParamHandle>,
    diffuse_specular: Option<ParamHandle>,
    shininess: Option<ParamHandle>,
    textures: [Option<ParamHandle>; MAX_FFP_TEXTURES],
}

impl FixedFunctionPass {
    pub fn new(device: &mut dyn Device, ctx: &mut RenderContext, desc: FixedFunctionPassDesc) -> Self {
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

        Self {
            states,
            projection: resolve(ctx, "projection", desc.projection, ParamType::Mat4),
            world_view: resolve(ctx, "world view", desc.world_view, ParamType::Mat4),
            diffuse_specular: resolve(ctx, "diffuse specular", desc.diffuse_specular, ParamType::Vec4),
            shininess: resolve(ctx, "shininess", desc.shininess, ParamType::Float),
            textures: desc.textures,
        }
    }

    /// The state uploaded by [`Pass::begin`].
    pub fn fixed_function_state(&self) -> FixedFunctionState {
        let mat4 = |param: &Option<ParamHandle>| {
            param
                .as_ref()
                .and_then(|p| p.read().mat4(0))
                .unwrap_or(Mat4::IDENTITY)
        };
        let diffuse_specular = self
            .diffuse_specular
            .as_ref()
            .and_then(|p| p.read().vec4(0));
        let (diffuse, specular) = match diffuse_specular {
            Some(ds) => {
                let diffuse = ds.truncate().extend(1.0);
                (diffuse, diffuse * ds.w)
            }
            None => (Vec4::ONE, Vec4::ZERO),
        };

        FixedFunctionState {
            projection: mat4(&self.projection),
            world_view: mat4(&self.world_view),
            diffuse,
            specular,
            shininess: self
                .shininess
                .as_ref()
                .and_then(|p| p.read().float(0))
                .unwrap_or(DEFAULT_SHININESS),
        }
    }
}

fn resolve(
    ctx: &RenderContext,
    what: &str,
    source: ParamSource,
    ty: ParamType,
) -> Option<ParamHandle> {
    let param = match source {
        ParamSource::Named(name) => ctx.parameters.parameter(&name),
        ParamSource::Direct(param) => param,
    }?;
    if param.ty() == ty {
        Some(param)
    } else {
        warn!(
            "{}",
            RenderError::ParameterBindingMismatch {
                uniform: what.to_string(),
                reason: "incompatible types".to_string(),
            }
        );
        None
    }
}

impl Pass for FixedFunctionPass {
    fn priority(&self) -> u64 {
        0
    }

    fn begin(&self, device: &mut dyn Device, _first_stage: u32) {
        device.set_fixed_function(&self.fixed_function_state());

        for (unit, param) in self.textures.iter().enumerate() {
            if let Some(texture) = param.as_ref().and_then(|p| p.read().texture()) {
                device.bind_texture(unit as u32, Some(texture));
            }
        }

        for category in StateCategory::ALL {
            let state = self.states[category.index()];
            if device.current_state(category) != Some(state) {
                device.bind_state(category, state);
            }
        }
    }

    fn end(&self, device: &mut dyn Device) {
        for (unit, param) in self.textures.iter().enumerate() {
            if param.as_ref().is_some_and(|p| p.read().texture().is_some()) {
                device.bind_texture(unit as u32, None);
            }
        }
    }
}
