//! Renderer configuration.

use glam::Vec4;

/// How effects realize their materials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderTechnique {
    /// Legacy fixed-function state, one pass per material.
    FixedPipeline,
    /// Multi-pass additive lighting with shader variants.
    #[default]
    ForwardRendering,
    /// Recognized but unsupported; effects contribute nothing.
    DeferredShading,
}

/// Largest number of lights a single forward lighting draw handles.
pub const MAX_LIGHTS_PER_DRAW: usize = 3;

/// Configuration for the [`ForwardRenderer`](crate::ForwardRenderer).
///
/// # Example
///
/// ```
/// use phalanx::{RenderTechnique, RendererConfig};
///
/// let config = RendererConfig::new()
///     .technique(RenderTechnique::ForwardRendering)
///     .depth_pass(true)
///     .debug_render(true);
/// assert!(config.use_depth_pass);
/// ```
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub technique: RenderTechnique,
    /// Publish the depth attachment as `depthMap` after the depth pass.
    pub make_depth_map: bool,
    /// Run a depth-only pre-pass before lighting.
    pub use_depth_pass: bool,
    /// Run the `Debug` pass after the opaque pass.
    pub use_debug_render: bool,
    /// Force every draw to wireframe with culling disabled.
    pub wireframe: bool,
    /// Lights per lighting draw, clamped to `1..=MAX_LIGHTS_PER_DRAW`.
    pub max_light_count: usize,
    pub clear_color: Vec4,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            technique: RenderTechnique::ForwardRendering,
            make_depth_map: false,
            use_depth_pass: true,
            use_debug_render: false,
            wireframe: false,
            max_light_count: MAX_LIGHTS_PER_DRAW,
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
        }
    }
}

impl RendererConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn technique(mut self, technique: RenderTechnique) -> Self {
        self.technique = technique;
        self
    }

    pub fn depth_map(mut self, enabled: bool) -> Self {
        self.make_depth_map = enabled;
        self
    }

    pub fn depth_pass(mut self, enabled: bool) -> Self {
        self.use_depth_pass = enabled;
        self
    }

    pub fn debug_render(mut self, enabled: bool) -> Self {
        self.use_debug_render = enabled;
        self
    }

    pub fn wireframe(mut self, enabled: bool) -> Self {
        self.wireframe = enabled;
        self
    }

    pub fn max_light_count(mut self, count: usize) -> Self {
        self.max_light_count = count.clamp(1, MAX_LIGHTS_PER_DRAW);
        self
    }

    pub fn clear_color(mut self, color: Vec4) -> Self {
        self.clear_color = color;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_light_count_is_clamped() {
        assert_eq!(RendererConfig::new().max_light_count(0).max_light_count, 1);
        assert_eq!(RendererConfig::new().max_light_count(8).max_light_count, 3);
        assert_eq!(RendererConfig::new().max_light_count(2).max_light_count, 2);
    }

    #[test]
    fn defaults_match_forward_rendering() {
        let config = RendererConfig::default();
        assert_eq!(config.technique, RenderTechnique::ForwardRendering);
        assert!(config.use_depth_pass);
        assert!(!config.make_depth_map);
    }
}
