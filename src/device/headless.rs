//! A recording device that needs no GPU.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use glam::Vec4;
use log::debug;

use super::glsl::{self, Reflection};
use super::{
    AttributeInfo, Device, FixedFunctionState, ProgramId, RenderTargetDesc, RenderTargetId,
    ShaderId, ShaderStage, StateCategory, StateDesc, StateId, TextureDesc, TextureId, UniformInfo,
    Viewport,
};
use crate::error::{RenderError, Result};

/// Last value uploaded to a uniform.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformSnapshot {
    pub count: usize,
    pub data: Vec<u8>,
}

impl UniformSnapshot {
    /// Decodes float-based data (scalars, vectors, matrices).
    pub fn as_f32s(&self) -> Vec<f32> {
        bytemuck::pod_collect_to_vec(&self.data)
    }

    /// Decodes integer and boolean data.
    pub fn as_i32s(&self) -> Vec<i32> {
        bytemuck::pod_collect_to_vec(&self.data)
    }
}

/// One call to [`Device::upload_uniform`].
#[derive(Clone, Debug, PartialEq)]
pub struct UniformUpload {
    pub program: ProgramId,
    pub name: String,
    pub count: usize,
}

/// Everything bound at the moment of a draw call.
#[derive(Clone, Debug)]
pub struct DrawRecord {
    pub program: Option<ProgramId>,
    /// Definitions the bound program was compiled with.
    pub defines: BTreeMap<String, String>,
    pub uniforms: BTreeMap<String, UniformSnapshot>,
    pub textures: BTreeMap<u32, TextureId>,
    pub states: [Option<StateId>; 3],
    pub target: Option<RenderTargetId>,
    /// Color attachment written to, see [`Device::set_draw_buffer`].
    pub draw_buffer: u32,
    pub fixed_function: Option<FixedFunctionState>,
    pub vertices: Range<u32>,
}

impl DrawRecord {
    pub fn uniform(&self, name: &str) -> Option<&UniformSnapshot> {
        self.uniforms.get(name)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.defines.contains_key(name)
    }
}

struct CompiledShader {
    stage: ShaderStage,
    reflection: Reflection,
}

struct LinkedProgram {
    defines: BTreeMap<String, String>,
    uniforms: Vec<UniformInfo>,
    attributes: Vec<AttributeInfo>,
    pending_locations: HashMap<String, u32>,
    values: BTreeMap<String, UniformSnapshot>,
}

/// A [`Device`] that reflects GLSL instead of compiling it and records the
/// traffic it receives.
///
/// Shader "compilation" runs the preprocessor and collects uniform and
/// attribute declarations, so programs report the same interface a real
/// driver would. `#error` in an active block fails compilation.
///
/// # Example
///
/// ```
/// use phalanx::{Device, HeadlessDevice, ShaderStage};
///
/// let mut device = HeadlessDevice::new();
/// let vs = device
///     .compile_shader(ShaderStage::Vertex, "uniform mat4 worldViewProjMatrix;\nin vec3 position;\n")
///     .unwrap();
/// let program = device.link_program(&[vs]).unwrap();
/// assert_eq!(device.program_uniforms(program).len(), 1);
/// ```
#[derive(Default)]
pub struct HeadlessDevice {
    shaders: Vec<Option<CompiledShader>>,
    programs: Vec<LinkedProgram>,
    textures: Vec<Option<TextureDesc>>,
    targets: Vec<Option<RenderTargetDesc>>,
    states: Vec<StateDesc>,

    current_program: Option<ProgramId>,
    current_states: [Option<StateId>; 3],
    state_stacks: [Vec<Option<StateId>>; 3],
    current_target: Option<RenderTargetId>,
    viewport: Viewport,
    draw_buffer: u32,
    bound_textures: BTreeMap<u32, TextureId>,
    fixed_function: Option<FixedFunctionState>,

    /// Makes every [`Device::bind_render_target`] call fail.
    pub fail_target_binds: bool,

    pub uploads: Vec<UniformUpload>,
    pub draws: Vec<DrawRecord>,
    pub program_binds: usize,
    pub state_binds: usize,
    pub texture_binds: usize,
    pub links: usize,
    /// Every [`Device::compile_shader`] call, failed ones included.
    pub compiles: usize,
    pub shaders_destroyed: usize,
    pub textures_created: usize,
    pub targets_created: usize,
    pub mipmaps_generated: Vec<TextureId>,
    /// `(texture, byte count)` of every [`Device::update_texture`] call.
    pub texture_writes: Vec<(TextureId, usize)>,
    /// Textures filled by [`Device::copy_to_texture`], in call order.
    pub copies: Vec<TextureId>,
    pub clears: Vec<(Option<Vec4>, Option<f32>)>,
    pub viewports: Vec<Viewport>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the recorded traffic, keeping resources and bindings.
    pub fn reset_counters(&mut self) {
        self.uploads.clear();
        self.draws.clear();
        self.program_binds = 0;
        self.state_binds = 0;
        self.texture_binds = 0;
        self.links = 0;
        self.compiles = 0;
        self.shaders_destroyed = 0;
        self.textures_created = 0;
        self.targets_created = 0;
        self.mipmaps_generated.clear();
        self.texture_writes.clear();
        self.copies.clear();
        self.clears.clear();
        self.viewports.clear();
    }

    /// Number of uploads recorded for uniform `name`.
    pub fn uploads_of(&self, name: &str) -> usize {
        self.uploads.iter().filter(|u| u.name == name).count()
    }

    pub fn texture_desc(&self, texture: TextureId) -> Option<&TextureDesc> {
        self.textures.get(texture.0 as usize).and_then(Option::as_ref)
    }

    pub fn current_target(&self) -> Option<RenderTargetId> {
        self.current_target
    }

    /// Number of shader objects not yet destroyed.
    pub fn live_shaders(&self) -> usize {
        self.shaders.iter().flatten().count()
    }

    pub fn draw_buffer(&self) -> u32 {
        self.draw_buffer
    }

    pub fn bound_texture(&self, stage: u32) -> Option<TextureId> {
        self.bound_textures.get(&stage).copied()
    }

    pub fn state_desc(&self, state: StateId) -> Option<&StateDesc> {
        self.states.get(state.0 as usize)
    }

    fn program_mut(&mut self, program: ProgramId) -> Option<&mut LinkedProgram> {
        self.programs.get_mut(program.0 as usize)
    }
}

impl Device for HeadlessDevice {
    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        source: &str,
    ) -> std::result::Result<ShaderId, String> {
        self.compiles += 1;
        let reflection = glsl::reflect(stage, source)?;
        self.shaders.push(Some(CompiledShader { stage, reflection }));
        Ok(ShaderId(self.shaders.len() as u32 - 1))
    }

    fn destroy_shader(&mut self, shader: ShaderId) {
        if let Some(slot) = self.shaders.get_mut(shader.0 as usize).filter(|s| s.is_some()) {
            *slot = None;
            self.shaders_destroyed += 1;
        }
    }

    fn link_program(&mut self, shaders: &[ShaderId]) -> std::result::Result<ProgramId, String> {
        let mut defines = BTreeMap::new();
        let mut uniforms: Vec<UniformInfo> = Vec::new();
        let mut attributes = Vec::new();
        let mut has_vertex = false;

        for id in shaders {
            let shader = self
                .shaders
                .get(id.0 as usize)
                .and_then(Option::as_ref)
                .ok_or_else(|| format!("unknown shader object {}", id.0))?;
            has_vertex |= shader.stage == ShaderStage::Vertex;
            defines.extend(shader.reflection.defines.clone());

            for uniform in &shader.reflection.uniforms {
                match uniforms.iter().find(|u| u.name == uniform.name) {
                    Some(existing) if existing.ty != uniform.ty => {
                        return Err(format!(
                            "uniform '{}' declared with conflicting types",
                            uniform.name
                        ));
                    }
                    Some(_) => {}
                    None => uniforms.push(UniformInfo {
                        name: uniform.name.clone(),
                        location: uniforms.len() as u32,
                        ty: uniform.ty,
                        size: uniform.size,
                    }),
                }
            }
            for name in &shader.reflection.attributes {
                attributes.push(AttributeInfo {
                    name: name.clone(),
                    location: attributes.len() as u32,
                });
            }
        }

        if !has_vertex {
            return Err("no vertex shader attached".to_string());
        }

        self.links += 1;
        self.programs.push(LinkedProgram {
            defines,
            uniforms,
            attributes,
            pending_locations: HashMap::new(),
            values: BTreeMap::new(),
        });
        Ok(ProgramId(self.programs.len() as u32 - 1))
    }

    fn relink_program(&mut self, program: ProgramId) -> std::result::Result<(), String> {
        let linked = self
            .program_mut(program)
            .ok_or_else(|| format!("unknown program {}", program.0))?;
        for attribute in &mut linked.attributes {
            if let Some(&location) = linked.pending_locations.get(&attribute.name) {
                attribute.location = location;
            }
        }
        linked.values.clear();
        self.links += 1;
        Ok(())
    }

    fn program_attributes(&self, program: ProgramId) -> Vec<AttributeInfo> {
        self.programs
            .get(program.0 as usize)
            .map(|p| p.attributes.clone())
            .unwrap_or_default()
    }

    fn bind_attribute_location(&mut self, program: ProgramId, name: &str, location: u32) {
        if let Some(linked) = self.program_mut(program) {
            linked.pending_locations.insert(name.to_string(), location);
        }
    }

    fn program_uniforms(&self, program: ProgramId) -> Vec<UniformInfo> {
        self.programs
            .get(program.0 as usize)
            .map(|p| p.uniforms.clone())
            .unwrap_or_default()
    }

    fn bind_program(&mut self, program: ProgramId) {
        self.program_binds += 1;
        self.current_program = Some(program);
        self.fixed_function = None;
    }

    fn current_program(&self) -> Option<ProgramId> {
        self.current_program
    }

    fn upload_uniform(&mut self, program: ProgramId, uniform: &UniformInfo, count: usize, data: &[u8]) {
        self.uploads.push(UniformUpload {
            program,
            name: uniform.name.clone(),
            count,
        });
        if let Some(linked) = self.program_mut(program) {
            linked.values.insert(
                uniform.name.clone(),
                UniformSnapshot {
                    count,
                    data: data.to_vec(),
                },
            );
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId {
        self.textures_created += 1;
        self.textures.push(Some(*desc));
        TextureId(self.textures.len() as u32 - 1)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(slot) = self.textures.get_mut(texture.0 as usize) {
            *slot = None;
        }
    }

    fn update_texture(&mut self, texture: TextureId, data: &[u8]) {
        self.texture_writes.push((texture, data.len()));
    }

    fn bind_texture(&mut self, stage: u32, texture: Option<TextureId>) {
        self.texture_binds += 1;
        match texture {
            Some(texture) => self.bound_textures.insert(stage, texture),
            None => self.bound_textures.remove(&stage),
        };
    }

    fn generate_mipmaps(&mut self, texture: TextureId) {
        self.mipmaps_generated.push(texture);
    }

    fn create_render_target(&mut self, desc: &RenderTargetDesc) -> Result<RenderTargetId> {
        let missing = desc
            .color
            .iter()
            .chain(desc.depth.iter())
            .find(|t| self.texture_desc(**t).is_none());
        if let Some(texture) = missing {
            return Err(RenderError::RenderTarget(format!(
                "attachment {:?} does not exist",
                texture
            )));
        }
        self.targets_created += 1;
        self.targets.push(Some(desc.clone()));
        debug!("headless render target {} created", self.targets.len() - 1);
        Ok(RenderTargetId(self.targets.len() as u32 - 1))
    }

    fn destroy_render_target(&mut self, target: RenderTargetId) {
        if let Some(slot) = self.targets.get_mut(target.0 as usize) {
            *slot = None;
        }
        if self.current_target == Some(target) {
            self.current_target = None;
        }
    }

    fn render_target_depth(&self, target: RenderTargetId) -> Option<TextureId> {
        self.targets
            .get(target.0 as usize)
            .and_then(Option::as_ref)
            .and_then(|t| t.depth)
    }

    fn render_target_color(&self, target: RenderTargetId, index: usize) -> Option<TextureId> {
        self.targets
            .get(target.0 as usize)
            .and_then(Option::as_ref)
            .and_then(|t| t.color.get(index).copied())
    }

    fn bind_render_target(&mut self, target: Option<RenderTargetId>) -> Result<()> {
        if self.fail_target_binds {
            return Err(RenderError::RenderTarget("bind rejected by device".to_string()));
        }
        if let Some(id) = target {
            let exists = self.targets.get(id.0 as usize).is_some_and(Option::is_some);
            if !exists {
                return Err(RenderError::RenderTarget(format!("render target {} is not complete", id.0)));
            }
        }
        self.current_target = target;
        self.draw_buffer = 0;
        Ok(())
    }

    fn current_render_target(&self) -> Option<RenderTargetId> {
        self.current_target
    }

    fn set_draw_buffer(&mut self, attachment: u32) {
        self.draw_buffer = attachment;
    }

    fn copy_to_texture(&mut self, texture: TextureId) {
        self.copies.push(texture);
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.viewports.push(viewport);
    }

    fn current_viewport(&self) -> Viewport {
        self.viewport
    }

    fn clear(&mut self, color: Option<Vec4>, depth: Option<f32>) {
        self.clears.push((color, depth));
    }

    fn create_state(&mut self, desc: &StateDesc) -> StateId {
        self.states.push(*desc);
        StateId(self.states.len() as u32 - 1)
    }

    fn bind_state(&mut self, category: StateCategory, state: StateId) {
        self.state_binds += 1;
        self.current_states[category.index()] = Some(state);
    }

    fn current_state(&self, category: StateCategory) -> Option<StateId> {
        self.current_states[category.index()]
    }

    fn push_state(&mut self, category: StateCategory) {
        let current = self.current_states[category.index()];
        self.state_stacks[category.index()].push(current);
    }

    fn pop_state(&mut self, category: StateCategory) {
        if let Some(saved) = self.state_stacks[category.index()].pop() {
            self.current_states[category.index()] = saved;
        }
    }

    fn set_fixed_function(&mut self, state: &FixedFunctionState) {
        self.current_program = None;
        self.fixed_function = Some(*state);
    }

    fn draw(&mut self, vertices: Range<u32>, _instances: Range<u32>) {
        let (defines, uniforms) = self
            .current_program
            .and_then(|p| self.programs.get(p.0 as usize))
            .map(|p| (p.defines.clone(), p.values.clone()))
            .unwrap_or_default();

        self.draws.push(DrawRecord {
            program: self.current_program,
            defines,
            uniforms,
            textures: self.bound_textures.clone(),
            states: self.current_states,
            target: self.current_target,
            draw_buffer: self.draw_buffer,
            fixed_function: self.fixed_function,
            vertices,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERT: &str = "uniform mat4 worldViewProjMatrix;\nin vec3 position;\nin vec3 normal;\n";
    const FRAG: &str = "uniform vec4 color;\nuniform mat4 worldViewProjMatrix;\n";

    #[test]
    fn link_merges_stage_uniforms() {
        let mut device = HeadlessDevice::new();
        let vs = device.compile_shader(ShaderStage::Vertex, VERT).unwrap();
        let fs = device.compile_shader(ShaderStage::Fragment, FRAG).unwrap();
        let program = device.link_program(&[vs, fs]).unwrap();

        let names: Vec<_> = device
            .program_uniforms(program)
            .into_iter()
            .map(|u| u.name)
            .collect();
        assert_eq!(names, ["worldViewProjMatrix", "color"]);
    }

    #[test]
    fn link_without_vertex_stage_fails() {
        let mut device = HeadlessDevice::new();
        let fs = device.compile_shader(ShaderStage::Fragment, FRAG).unwrap();
        assert!(device.link_program(&[fs]).is_err());
    }

    #[test]
    fn relink_applies_attribute_locations() {
        let mut device = HeadlessDevice::new();
        let vs = device.compile_shader(ShaderStage::Vertex, VERT).unwrap();
        let program = device.link_program(&[vs]).unwrap();

        device.bind_attribute_location(program, "normal", 7);
        device.relink_program(program).unwrap();

        let normal = device
            .program_attributes(program)
            .into_iter()
            .find(|a| a.name == "normal")
            .unwrap();
        assert_eq!(normal.location, 7);
    }

    #[test]
    fn push_pop_restores_state() {
        let mut device = HeadlessDevice::new();
        let a = device.create_state(&StateDesc::default_for(StateCategory::Blend));
        let b = device.create_state(&StateDesc::Blend(crate::device::BlendStateDesc::ADDITIVE));

        device.bind_state(StateCategory::Blend, a);
        device.push_state(StateCategory::Blend);
        device.bind_state(StateCategory::Blend, b);
        device.pop_state(StateCategory::Blend);

        assert_eq!(device.current_state(StateCategory::Blend), Some(a));
    }

    #[test]
    fn failing_target_bind_reports_error() {
        let mut device = HeadlessDevice::new();
        device.fail_target_binds = true;
        assert!(matches!(
            device.bind_render_target(None),
            Err(RenderError::RenderTarget(_))
        ));
    }
}
