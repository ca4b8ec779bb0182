//! Interned render group and render pass names.
//!
//! A *group* says which camera a frame is drawn for (the main view or a
//! planar reflection); a *pass* names one phase of the frame. Effects match on
//! both when they [`present`](crate::Effect::present). Names are interned into
//! small integers so comparisons are cheap and new names can be added at
//! runtime:
//!
//! ```
//! use phalanx::RenderPass;
//!
//! let outline = RenderPass::intern("Outline");
//! assert_eq!(RenderPass::intern("Outline"), outline);
//! assert_eq!(outline.name(), "Outline");
//! assert_eq!(RenderPass::intern("Opaque"), RenderPass::OPAQUE);
//! ```

use std::fmt;
use std::sync::LazyLock;

use parking_lot::RwLock;

struct Interner {
    names: RwLock<Vec<&'static str>>,
}

impl Interner {
    fn new(builtin: &[&'static str]) -> Self {
        Self {
            names: RwLock::new(builtin.to_vec()),
        }
    }

    fn intern(&self, name: &str) -> u32 {
        if let Some(pos) = self.names.read().iter().position(|n| *n == name) {
            return pos as u32;
        }
        let mut names = self.names.write();
        // Another thread may have won the race between the two locks.
        if let Some(pos) = names.iter().position(|n| *n == name) {
            return pos as u32;
        }
        names.push(Box::leak(name.to_owned().into_boxed_str()));
        names.len() as u32 - 1
    }

    fn name(&self, id: u32) -> &'static str {
        self.names.read().get(id as usize).copied().unwrap_or("<unknown>")
    }
}

static GROUPS: LazyLock<Interner> = LazyLock::new(|| Interner::new(&["Main", "Reflect"]));

static PASSES: LazyLock<Interner> = LazyLock::new(|| {
    Interner::new(&[
        "Depth",
        "Opaque",
        "DirectionalLighting",
        "PointLighting",
        "SpotLighting",
        "Debug",
        "DirectionalShadowVolume",
        "PointShadowVolume",
    ])
});

/// The view a frame is rendered for.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderGroup(u32);

impl RenderGroup {
    pub const MAIN: Self = Self(0);
    pub const REFLECT: Self = Self(1);

    pub fn intern(name: &str) -> Self {
        Self(GROUPS.intern(name))
    }

    pub fn name(self) -> &'static str {
        GROUPS.name(self.0)
    }
}

impl fmt::Debug for RenderGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RenderGroup({})", self.name())
    }
}

/// A phase of the frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPass(u32);

impl RenderPass {
    pub const DEPTH: Self = Self(0);
    pub const OPAQUE: Self = Self(1);
    pub const DIRECTIONAL_LIGHTING: Self = Self(2);
    pub const POINT_LIGHTING: Self = Self(3);
    pub const SPOT_LIGHTING: Self = Self(4);
    pub const DEBUG: Self = Self(5);
    pub const DIRECTIONAL_SHADOW_VOLUME: Self = Self(6);
    pub const POINT_SHADOW_VOLUME: Self = Self(7);

    pub fn intern(name: &str) -> Self {
        Self(PASSES.intern(name))
    }

    pub fn name(self) -> &'static str {
        PASSES.name(self.0)
    }
}

impl fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RenderPass({})", self.name())
    }
}
