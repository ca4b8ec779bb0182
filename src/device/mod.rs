//! The GPU seam consumed by passes, effects and the frame driver.
//!
//! Everything above this module talks to the GPU through [`Device`], a small
//! stateful API modelled on a classic program/texture/render-target/state-object
//! interface. Implementations track what is currently bound so callers can skip
//! redundant binds ("current X" dedup).
//!
//! The crate ships one implementation, [`HeadlessDevice`], which compiles GLSL
//! by reflection only and records every upload, bind and draw. It backs the
//! test-suite and the demo binary.
//!
//! # Render State Vocabulary
//!
//! State descriptors reuse wgpu's types ([`wgpu::BlendState`],
//! [`wgpu::CompareFunction`], [`wgpu::Face`], [`wgpu::PolygonMode`],
//! [`wgpu::ColorWrites`]) so a wgpu backend can map them one-to-one.

mod glsl;
mod headless;
mod state;

use std::ops::Range;

use glam::{Mat4, Vec4};

use crate::error::Result;
use crate::tables::{ParamType, TextureKind};

pub use headless::{DrawRecord, HeadlessDevice, UniformSnapshot, UniformUpload};
pub use state::{BlendStateDesc, DepthStencilDesc, RasterizerDesc, StateCache, StateCategory, StateDesc};

/// Handle to a compiled shader stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

/// Handle to a linked program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

/// Handle to a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Handle to a render target (a set of attachments).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderTargetId(pub u32);

/// Handle to an immutable render-state object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub u32);

/// Programmable pipeline stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
}

impl ShaderStage {
    /// Picks the stage from a shader file extension (`vert`, `frag`, `geom`).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "vert" => Some(Self::Vertex),
            "frag" => Some(Self::Fragment),
            "geom" => Some(Self::Geometry),
            _ => None,
        }
    }
}

/// An active uniform reported by a linked program.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformInfo {
    pub name: String,
    pub location: u32,
    /// `None` when the uniform's type has no parameter counterpart.
    pub ty: Option<ParamType>,
    /// Array length, 1 for scalars.
    pub size: usize,
}

/// An active vertex attribute reported by a linked program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeInfo {
    pub name: String,
    pub location: u32,
}

/// Texture creation parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub kind: TextureKind,
    pub mip_levels: u32,
}

impl TextureDesc {
    pub fn color(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: wgpu::TextureFormat::Rgba8Unorm,
            kind: TextureKind::D2,
            mip_levels: 1,
        }
    }

    /// Four 32-bit float channels, for data rather than color.
    pub fn float(width: u32, height: u32) -> Self {
        Self {
            format: wgpu::TextureFormat::Rgba32Float,
            ..Self::color(width, height)
        }
    }

    pub fn depth(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: wgpu::TextureFormat::Depth24Plus,
            kind: TextureKind::D2,
            mip_levels: 1,
        }
    }
}

/// Attachments making up a render target.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderTargetDesc {
    pub color: Vec<TextureId>,
    pub depth: Option<TextureId>,
}

/// Pixel rectangle drawn into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Legacy transform and material state used by the fixed-function technique.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedFunctionState {
    pub projection: Mat4,
    pub world_view: Mat4,
    pub diffuse: Vec4,
    pub specular: Vec4,
    pub shininess: f32,
}

/// A stateful GPU device.
///
/// Methods returning `std::result::Result<_, String>` carry the backend's
/// compiler or linker log in the error.
pub trait Device {
    /// Compiles one shader stage from complete source text.
    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        source: &str,
    ) -> std::result::Result<ShaderId, String>;

    /// Releases a shader object that is no longer needed.
    fn destroy_shader(&mut self, shader: ShaderId);

    /// Links compiled stages into a program.
    fn link_program(&mut self, shaders: &[ShaderId]) -> std::result::Result<ProgramId, String>;

    /// Re-links a program, applying pending attribute locations.
    fn relink_program(&mut self, program: ProgramId) -> std::result::Result<(), String>;

    /// Active vertex attributes of a linked program.
    fn program_attributes(&self, program: ProgramId) -> Vec<AttributeInfo>;

    /// Requests `name` to live at `location` after the next relink.
    fn bind_attribute_location(&mut self, program: ProgramId, name: &str, location: u32);

    /// Active uniforms of a linked program.
    fn program_uniforms(&self, program: ProgramId) -> Vec<UniformInfo>;

    fn bind_program(&mut self, program: ProgramId);

    fn current_program(&self) -> Option<ProgramId>;

    /// Uploads `count` elements of `uniform` from raw bytes.
    fn upload_uniform(&mut self, program: ProgramId, uniform: &UniformInfo, count: usize, data: &[u8]);

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId;

    fn destroy_texture(&mut self, texture: TextureId);

    /// Replaces the contents of mip level 0 with tightly packed texels.
    fn update_texture(&mut self, texture: TextureId, data: &[u8]);

    /// Binds `texture` to a sampler stage, or clears the stage with `None`.
    fn bind_texture(&mut self, stage: u32, texture: Option<TextureId>);

    fn generate_mipmaps(&mut self, texture: TextureId);

    fn create_render_target(&mut self, desc: &RenderTargetDesc) -> Result<RenderTargetId>;

    fn destroy_render_target(&mut self, target: RenderTargetId);

    /// Depth attachment of a render target, if it has one.
    fn render_target_depth(&self, target: RenderTargetId) -> Option<TextureId>;

    /// Color attachment `index` of a render target.
    fn render_target_color(&self, target: RenderTargetId, index: usize) -> Option<TextureId>;

    /// Binds a render target, or the default framebuffer with `None`.
    fn bind_render_target(&mut self, target: Option<RenderTargetId>) -> Result<()>;

    fn current_render_target(&self) -> Option<RenderTargetId>;

    /// Selects the color attachment of the bound target that draws write to.
    fn set_draw_buffer(&mut self, attachment: u32);

    /// Copies the bound target's contents into `texture` (sized to the viewport).
    fn copy_to_texture(&mut self, texture: TextureId);

    fn set_viewport(&mut self, viewport: Viewport);

    fn current_viewport(&self) -> Viewport;

    /// Clears the bound target. `None` leaves that buffer untouched.
    fn clear(&mut self, color: Option<Vec4>, depth: Option<f32>);

    fn create_state(&mut self, desc: &StateDesc) -> StateId;

    fn bind_state(&mut self, category: StateCategory, state: StateId);

    fn current_state(&self, category: StateCategory) -> Option<StateId>;

    /// Saves the current state of `category`.
    fn push_state(&mut self, category: StateCategory);

    /// Restores (and rebinds) the state saved by the matching push.
    fn pop_state(&mut self, category: StateCategory);

    fn set_fixed_function(&mut self, state: &FixedFunctionState);

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_from_extension() {
        assert_eq!(ShaderStage::from_extension("vert"), Some(ShaderStage::Vertex));
        assert_eq!(ShaderStage::from_extension("frag"), Some(ShaderStage::Fragment));
        assert_eq!(ShaderStage::from_extension("geom"), Some(ShaderStage::Geometry));
        assert_eq!(ShaderStage::from_extension("glsl"), None);
    }

    #[test]
    fn viewport_aspect_handles_zero_height() {
        assert_eq!(Viewport::new(800, 0).aspect(), 1.0);
        assert_eq!(Viewport::new(800, 400).aspect(), 2.0);
    }
}
