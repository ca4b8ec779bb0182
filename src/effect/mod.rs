//! Effects: materials that resolve into passes.
//!
//! An effect is asked once per (group, pass) and object which passes should
//! draw it. It owns its per-object parameters (world-view matrices, material
//! values) and a cached set of [`Pass`](crate::Pass)es built for the current
//! technique. The cache is rebuilt lazily: anything that changes the shape of
//! the passes marks the effect [`Dirty`](EffectState::Dirty), and the next
//! `present` rebuilds the whole set.
//!
//! | Effect | Passes it answers |
//! |---|---|
//! | [`TransformEffect`] | `Depth` |
//! | [`LightingEffect`] | `*Lighting`, `Opaque` (fixed-function), else as Transform |
//! | [`SkyBoxEffect`] | `Main` / `Opaque` |
//! | [`WaterEffect`] | `Main` / `Opaque` |
//! | [`ExtrudeEffect`] | `*ShadowVolume` |
//! | [`DebugEffect`] | `Debug` |

mod debug;
mod extrude;
mod lighting;
mod ocean;
mod skybox;
mod transform;
mod water;

pub use debug::{DebugEffect, DebugEffectDesc};
pub use extrude::{ExtrudeEffect, ShadowLight};
pub use lighting::{LightingEffect, LightingMaterial};
pub use ocean::{FftWaves, PhillipsSpectrum};
pub use skybox::SkyBoxEffect;
pub use transform::TransformEffect;
pub use water::{FlatWaves, WaterEffect, WaveMapGenerator};

use std::sync::Arc;

use log::{error, warn};
use parking_lot::Mutex;

use crate::config::RenderTechnique;
use crate::device::Device;
use crate::effect_pass::PassList;
use crate::error::RenderError;
use crate::phase::{RenderGroup, RenderPass};
use crate::tables::{AttributeSlot, AttributeTable, ParamHandle, RenderContext};

/// Whether an effect's cached passes match its inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EffectState {
    Clean,
    #[default]
    Dirty,
}

/// A material.
pub trait Effect: Send {
    /// Passes drawing the object in `pass` of `group`, at most
    /// [`MAX_NUM_PASSES`](crate::MAX_NUM_PASSES).
    ///
    /// Rebuilds the cached passes first if the effect is dirty or the
    /// context's technique changed since the last build.
    fn present(
        &mut self,
        device: &mut dyn Device,
        ctx: &mut RenderContext,
        group: RenderGroup,
        pass: RenderPass,
    ) -> PassList;

    /// A parameter the effect exposes by name.
    fn parameter(&self, _name: &str) -> Option<ParamHandle> {
        None
    }

    /// Connects (or with `None` disconnects) an input. Returns `false` if the
    /// name is unknown or the type does not fit.
    fn bind_parameter(&mut self, _name: &str, _param: Option<ParamHandle>) -> bool {
        false
    }

    /// Vertex attribute index the effect's programs read `name` from.
    fn query_attribute(&self, name: &str) -> Option<u32>;

    fn state(&self) -> EffectState;

    fn mark_dirty(&mut self);
}

/// An effect shared between renderables.
pub type SharedEffect = Arc<Mutex<dyn Effect>>;

/// Wraps an effect for sharing.
pub fn shared<E: Effect + 'static>(effect: E) -> SharedEffect {
    Arc::new(Mutex::new(effect))
}

/// Names of the vertex attributes every built-in effect understands.
pub const DEFAULT_ATTRIBUTES: [&str; 6] = ["position", "weights", "normal", "tangent", "binormal", "texcoord"];

/// Attribute slots an effect holds for its lifetime.
///
/// Holding the slots pins their indices, so mesh layouts built against
/// [`Effect::query_attribute`] stay valid while the effect lives.
#[derive(Debug, Default)]
pub struct DefaultAttributes {
    slots: Vec<Arc<AttributeSlot>>,
}

impl DefaultAttributes {
    pub fn acquire(table: &mut AttributeTable) -> Self {
        let slots = DEFAULT_ATTRIBUTES
            .iter()
            .filter_map(|name| match table.query_attribute(name) {
                Ok(slot) => Some(slot),
                Err(err) => {
                    warn!("attribute '{name}' unavailable: {err}");
                    None
                }
            })
            .collect();
        Self { slots }
    }

    pub fn index(&self, name: &str) -> Option<u32> {
        self.slots
            .iter()
            .find(|slot| slot.name() == name)
            .map(|slot| slot.index())
    }
}

/// Tracks which technique an effect's passes were built for.
#[derive(Debug, Default)]
pub(crate) struct BuildState {
    state: EffectState,
    built_for: Option<RenderTechnique>,
}

impl BuildState {
    pub fn needs_rebuild(&self, technique: RenderTechnique) -> bool {
        self.state == EffectState::Dirty || self.built_for != Some(technique)
    }

    pub fn built(&mut self, technique: RenderTechnique) {
        self.state = EffectState::Clean;
        self.built_for = Some(technique);
    }

    pub fn mark_dirty(&mut self) {
        self.state = EffectState::Dirty;
    }

    pub fn state(&self) -> EffectState {
        self.state
    }
}

/// Logs a failed rebuild. The effect contributes nothing until it is dirtied
/// again.
pub(crate) fn report_build_error(effect: &str, err: &RenderError) {
    match err {
        RenderError::UnsupportedTechnique {
            technique: RenderTechnique::DeferredShading,
            ..
        } => warn!("{err}"),
        _ => error!("Can't create {effect} effect: {err}"),
    }
}
