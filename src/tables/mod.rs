//! Shared binding tables and the context bundling them.
//!
//! ```text
//! RenderContext
//! ├── AttributeTable      name → vertex attribute index (pool of 16)
//! ├── ParameterTable      name → versioned value slot
//! ├── UniformTable        (program, location) → upload cache
//! ├── ShaderVariantCache  (definitions, files) → compiled program
//! └── StateCache          state descriptor → device state object
//! ```
//!
//! A context belongs to one device. Every effect, pass and renderer call takes
//! it by reference; nothing here is global, so independent contexts can coexist
//! (one per device, or one per test).

mod attribute;
mod parameter;
mod uniform;

pub use attribute::{AttributeSlot, AttributeTable, MAX_NUM_ATTRIBUTES};
pub use parameter::{ParamHandle, ParamType, ParamValue, ParameterTable, TextureKind};
pub use uniform::{SamplerBinder, UniformBinder, UniformTable};

use crate::config::RenderTechnique;
use crate::device::StateCache;
use crate::shader_program::ShaderVariantCache;
use crate::shaders::{ShaderLibrary, ShaderLoader};

/// Device-scoped binding state shared by effects, passes and the renderer.
pub struct RenderContext {
    pub attributes: AttributeTable,
    pub parameters: ParameterTable,
    pub uniforms: UniformTable,
    pub programs: ShaderVariantCache,
    pub states: StateCache,
    /// Technique effects build their passes for.
    pub technique: RenderTechnique,
}

impl RenderContext {
    /// Creates a context that loads shader sources through `loader`.
    pub fn new(loader: impl ShaderLoader + 'static) -> Self {
        Self {
            attributes: AttributeTable::new(),
            parameters: ParameterTable::new(),
            uniforms: UniformTable::new(),
            programs: ShaderVariantCache::new(loader),
            states: StateCache::new(),
            technique: RenderTechnique::default(),
        }
    }

    /// Creates a context backed by the built-in shader library.
    pub fn with_builtin_shaders() -> Self {
        Self::new(ShaderLibrary::builtin())
    }

    pub fn technique(mut self, technique: RenderTechnique) -> Self {
        self.technique = technique;
        self
    }
}
