//! # Phalanx
//!
//! **Effect/pass resolution and forward rendering that gets out of your way.**
//!
//! Objects carry an [`Effect`]. For every camera, phase and light bucket the
//! [`ForwardRenderer`] asks each visible effect which [`Pass`]es it
//! contributes, sorts them by priority and draws them. Effects talk to the
//! rest of the frame through named, typed parameters in a shared
//! [`ParameterTable`]; shader programs are assembled from GLSL sources plus
//! `#define` lines and cached per variant.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use glam::Vec3;
//! use parking_lot::RwLock;
//! use phalanx::{
//!     Camera, DirectionalLight, EcsWorld, ForwardRenderer, HeadlessDevice, LightingEffect,
//!     LightingMaterial, Primitive, RenderContext, RendererConfig, shared,
//! };
//!
//! let mut device = HeadlessDevice::new();
//! let mut ctx = RenderContext::with_builtin_shaders();
//! let mut renderer = ForwardRenderer::new(&mut device, &mut ctx, RendererConfig::new());
//!
//! let cube = shared(LightingEffect::new(&mut ctx, &LightingMaterial::default()));
//! let mut world = EcsWorld::new();
//! world.spawn_renderable(Arc::new(Primitive::new(cube, 0..36)), None);
//! world.spawn_light(DirectionalLight::new(Vec3::new(-1.0, -1.0, -1.0)));
//!
//! let camera = Camera::new().looking_at(Vec3::new(0.0, 2.0, 6.0), Vec3::ZERO, Vec3::Y);
//! renderer.render(&mut device, &mut ctx, &RwLock::new(world), &camera);
//! assert!(!device.draws.is_empty());
//! ```
//!
//! ## Layout
//!
//! - [`device`]: the backend seam. [`HeadlessDevice`] records everything.
//! - [`tables`]: attribute, parameter and uniform tables.
//! - [`effect`]: the [`Effect`] trait and the built-in effects.
//! - [`scene`]: what the renderer culls against.

mod camera;
mod config;
pub mod device;
pub mod effect;
mod effect_pass;
mod error;
mod ffp_pass;
mod forward_renderer;
mod hooks;
mod logging;
mod phase;
mod post_process;
pub mod scene;
mod shader_program;
mod shaders;
pub mod tables;

pub use camera::{Camera, CameraKind, Frustum, SharedCamera};
pub use config::{MAX_LIGHTS_PER_DRAW, RenderTechnique, RendererConfig};
pub use device::{
    BlendStateDesc, DepthStencilDesc, Device, DrawRecord, HeadlessDevice, ProgramId, RasterizerDesc,
    RenderTargetDesc, RenderTargetId, ShaderId, ShaderStage, StateCategory, StateDesc, StateId, TextureDesc,
    TextureId, Viewport,
};
pub use effect::{
    DebugEffect, DebugEffectDesc, Effect, EffectState, ExtrudeEffect, FftWaves, FlatWaves, LightingEffect,
    LightingMaterial, PhillipsSpectrum, ShadowLight, SharedEffect, SkyBoxEffect, TransformEffect, WaterEffect,
    WaveMapGenerator, shared,
};
pub use effect_pass::{
    EffectPass, EffectPassDesc, MAX_NUM_PASSES, ParamSource, Pass, PassList, RenderBin, UniformDesc,
};
pub use error::{RenderError, Result};
pub use ffp_pass::{FixedFunctionPass, FixedFunctionPassDesc, MAX_FFP_TEXTURES};
pub use forward_renderer::{ForwardRenderer, RenderPacket};
pub use hooks::{FrameHooks, HookToken};
pub use logging::{LoggingConfig, init_logging};
pub use phase::{RenderGroup, RenderPass};
pub use post_process::{FftFilter, FogFilter, FullscreenFilter, PostProcessFilter, PostProcessTarget};
pub use scene::{
    BoundingSphere, CullResults, CullVisitor, DirectionalLight, EcsWorld, Light, LightKind, PointLight,
    Primitive, Renderable, SceneWorld, SpotLight,
};
pub use shader_program::{EffectShaderProgram, ProgramVariantKey, ShaderVariantCache};
pub use shaders::{DirectoryLoader, ShaderLibrary, ShaderLoader};
pub use tables::{AttributeTable, ParamHandle, ParamType, ParamValue, ParameterTable, RenderContext, TextureKind};
