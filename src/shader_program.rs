//! Shader program variants.
//!
//! An effect describes its program as a set of shader files plus a set of
//! preprocessor definitions. The same pair, in any insertion order, always
//! resolves to the same compiled program:
//!
//! ```text
//! EffectShaderProgram { definitions, shaders }
//!         │ key()   (sorted, deduplicated)
//!         ▼
//! ProgramVariantKey ──► ShaderVariantCache ──► Arc<CompiledProgram>
//!                            │ miss
//!                            ▼
//!                 load ─► prepend definitions ─► compile ─► link
//!                            ─► bind attribute slots ─► relink
//! ```
//!
//! Compiled programs are never evicted. Each one holds the attribute slots it
//! was linked against, so every hit sees the same vertex input layout.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, error};

use crate::device::{Device, ProgramId, ShaderId, ShaderStage, UniformInfo};
use crate::error::{RenderError, Result};
use crate::shaders::ShaderLoader;
use crate::tables::{AttributeSlot, AttributeTable, RenderContext};

/// Canonical identity of a program variant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProgramVariantKey {
    definitions: Vec<String>,
    files: Vec<String>,
}

impl ProgramVariantKey {
    pub fn new<D, F>(definitions: D, files: F) -> Self
    where
        D: IntoIterator,
        D::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            definitions: canonical(definitions),
            files: canonical(files),
        }
    }

    pub fn definitions(&self) -> &[String] {
        &self.definitions
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }
}

impl fmt::Display for ProgramVariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.files.join(", "))?;
        for definition in &self.definitions {
            write!(f, " {definition}")?;
        }
        Ok(())
    }
}

fn canonical<I>(items: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    let mut items: Vec<String> = items.into_iter().map(Into::into).collect();
    items.sort();
    items.dedup();
    items
}

/// A linked program variant.
#[derive(Debug)]
pub struct CompiledProgram {
    id: ProgramId,
    variant_id: u32,
    key: ProgramVariantKey,
    uniforms: Vec<UniformInfo>,
    attributes: Vec<Arc<AttributeSlot>>,
}

impl CompiledProgram {
    pub fn id(&self) -> ProgramId {
        self.id
    }

    /// Monotonic per-cache number, used to group draws by program.
    pub fn variant_id(&self) -> u32 {
        self.variant_id
    }

    pub fn key(&self) -> &ProgramVariantKey {
        &self.key
    }

    pub fn uniforms(&self) -> &[UniformInfo] {
        &self.uniforms
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformInfo> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    /// Attribute index the program reads `name` from.
    pub fn attribute(&self, name: &str) -> Option<u32> {
        self.attributes
            .iter()
            .find(|slot| slot.name() == name)
            .map(|slot| slot.index())
    }
}

/// Compiles and caches program variants.
pub struct ShaderVariantCache {
    loader: Box<dyn ShaderLoader>,
    programs: HashMap<ProgramVariantKey, Arc<CompiledProgram>>,
    next_variant: u32,
}

impl ShaderVariantCache {
    pub fn new(loader: impl ShaderLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            programs: HashMap::new(),
            next_variant: 0,
        }
    }

    /// Returns the cached program for `key`, building it on a miss.
    ///
    /// # Errors
    ///
    /// - [`RenderError::ShaderSource`] when a file cannot be loaded.
    /// - [`RenderError::ShaderCompilation`] when a file has no known stage
    ///   extension, fails to compile, or the program fails to link.
    /// - [`RenderError::ResourceExhausted`] when the program needs more vertex
    ///   attributes than the table has free.
    pub fn get_or_compile(
        &mut self,
        device: &mut dyn Device,
        attributes: &mut AttributeTable,
        key: &ProgramVariantKey,
    ) -> Result<Arc<CompiledProgram>> {
        if let Some(program) = self.programs.get(key) {
            return Ok(Arc::clone(program));
        }

        let program = Arc::new(self.compile(device, attributes, key)?);
        debug!("compiled program variant {}: {}", program.variant_id, key);
        self.programs.insert(key.clone(), Arc::clone(&program));
        Ok(program)
    }

    fn compile(
        &mut self,
        device: &mut dyn Device,
        attributes: &mut AttributeTable,
        key: &ProgramVariantKey,
    ) -> Result<CompiledProgram> {
        let header = key.definitions.join("\n");

        let mut shaders = Vec::with_capacity(key.files.len());
        let linked = self
            .compile_stages(device, key, &header, &mut shaders)
            .and_then(|()| device.link_program(&shaders).map_err(|log| link_error(key, log)));
        // Stage objects are released whether or not the program linked.
        for shader in shaders {
            device.destroy_shader(shader);
        }
        let id = linked?;

        let mut slots = Vec::new();
        let mut rebound = false;
        for attribute in device.program_attributes(id) {
            let slot = attributes.query_attribute(&attribute.name)?;
            if slot.index() != attribute.location {
                device.bind_attribute_location(id, &attribute.name, slot.index());
                rebound = true;
            }
            slots.push(slot);
        }
        if rebound {
            device.relink_program(id).map_err(|log| link_error(key, log))?;
        }

        let variant_id = self.next_variant;
        self.next_variant += 1;

        Ok(CompiledProgram {
            id,
            variant_id,
            key: key.clone(),
            uniforms: device.program_uniforms(id),
            attributes: slots,
        })
    }

    fn compile_stages(
        &self,
        device: &mut dyn Device,
        key: &ProgramVariantKey,
        header: &str,
        shaders: &mut Vec<ShaderId>,
    ) -> Result<()> {
        for file in &key.files {
            let stage = file
                .rsplit_once('.')
                .and_then(|(_, ext)| ShaderStage::from_extension(ext))
                .ok_or_else(|| RenderError::ShaderCompilation {
                    file: file.clone(),
                    log: "can't determine shader stage from file extension".to_string(),
                })?;

            let source = self
                .loader
                .load(file)
                .map_err(|source| RenderError::ShaderSource {
                    file: file.clone(),
                    source,
                })?;

            let shader = device
                .compile_shader(stage, &with_definitions(&source, header))
                .map_err(|log| {
                    error!("shader '{file}' failed to compile:\n{log}");
                    RenderError::ShaderCompilation {
                        file: file.clone(),
                        log,
                    }
                })?;
            shaders.push(shader);
        }
        Ok(())
    }

    /// Number of cached variants.
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

fn link_error(key: &ProgramVariantKey, log: String) -> RenderError {
    RenderError::ShaderCompilation {
        file: key.files.join(", "),
        log,
    }
}

/// Inserts the definition block after a leading `#version` line, or at the top.
fn with_definitions(source: &str, header: &str) -> String {
    if header.is_empty() {
        return source.to_string();
    }
    let body = source.trim_start();
    if body.starts_with("#version") {
        let (version, rest) = body.split_once('\n').unwrap_or((body, ""));
        format!("{version}\n{header}\n{rest}")
    } else {
        format!("{header}\n{source}")
    }
}

/// A mutable program description owned by an effect.
///
/// Edits only mark the description dirty; the program is resolved through
/// the variant cache on the next [`program`](Self::program) call.
///
/// # Example
///
/// ```
/// use phalanx::{EffectShaderProgram, HeadlessDevice, RenderContext};
///
/// let mut device = HeadlessDevice::new();
/// let mut ctx = RenderContext::with_builtin_shaders();
///
/// let mut program = EffectShaderProgram::new()
///     .with_shader("rigid.vert")
///     .with_shader("fill.frag")
///     .with_definition("#define DEPTH_ONLY");
/// let compiled = program.program(&mut device, &mut ctx).unwrap();
/// assert!(compiled.uniform("worldViewProjMatrix").is_some());
/// ```
#[derive(Clone, Debug, Default)]
pub struct EffectShaderProgram {
    definitions: Vec<String>,
    shaders: Vec<String>,
    program: Option<Arc<CompiledProgram>>,
    dirty: bool,
}

impl EffectShaderProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shader(mut self, file: impl Into<String>) -> Self {
        self.add_shader(file);
        self
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.add_definition(definition);
        self
    }

    /// Adds a definition line. Returns `false` if it was already present.
    pub fn add_definition(&mut self, definition: impl Into<String>) -> bool {
        insert_unique(&mut self.definitions, definition.into(), &mut self.dirty)
    }

    pub fn remove_definition(&mut self, definition: &str) -> bool {
        remove_present(&mut self.definitions, definition, &mut self.dirty)
    }

    /// Adds a shader file. Returns `false` if it was already present.
    pub fn add_shader(&mut self, file: impl Into<String>) -> bool {
        insert_unique(&mut self.shaders, file.into(), &mut self.dirty)
    }

    pub fn remove_shader(&mut self, file: &str) -> bool {
        remove_present(&mut self.shaders, file, &mut self.dirty)
    }

    pub fn definitions(&self) -> &[String] {
        &self.definitions
    }

    pub fn shaders(&self) -> &[String] {
        &self.shaders
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty || self.program.is_none()
    }

    pub fn key(&self) -> ProgramVariantKey {
        ProgramVariantKey::new(self.definitions.iter().cloned(), self.shaders.iter().cloned())
    }

    /// Resolves the current description through the variant cache.
    pub fn construct_program(
        &mut self,
        device: &mut dyn Device,
        ctx: &mut RenderContext,
    ) -> Result<Arc<CompiledProgram>> {
        let program = ctx
            .programs
            .get_or_compile(device, &mut ctx.attributes, &self.key())?;
        self.program = Some(Arc::clone(&program));
        self.dirty = false;
        Ok(program)
    }

    /// The compiled program, rebuilt only if the description changed.
    pub fn program(
        &mut self,
        device: &mut dyn Device,
        ctx: &mut RenderContext,
    ) -> Result<Arc<CompiledProgram>> {
        match &self.program {
            Some(program) if !self.dirty => Ok(Arc::clone(program)),
            _ => self.construct_program(device, ctx),
        }
    }
}

fn insert_unique(items: &mut Vec<String>, item: String, dirty: &mut bool) -> bool {
    if items.contains(&item) {
        return false;
    }
    items.push(item);
    *dirty = true;
    true
}

fn remove_present(items: &mut Vec<String>, item: &str, dirty: &mut bool) -> bool {
    let Some(pos) = items.iter().position(|i| i == item) else {
        return false;
    };
    items.remove(pos);
    *dirty = true;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;
    use crate::shaders::ShaderLibrary;

    const VERT: &str = "#version 130\n\
        uniform mat4 worldViewProjMatrix;\n\
        #ifdef SKINNED\n\
        uniform vec4 boneRotations[4];\n\
        in vec4 weights;\n\
        #endif\n\
        in vec3 position;\n\
        in vec3 normal;\n";
    const FRAG: &str = "uniform vec4 color;\n";

    fn context() -> RenderContext {
        RenderContext::new(
            ShaderLibrary::new()
                .with("test.vert", VERT)
                .with("test.frag", FRAG)
                .with("broken.frag", "#error not today\n")
                .with("test.comp", "void main() {}\n"),
        )
    }

    #[test]
    fn insertion_order_does_not_change_the_variant() {
        let mut device = HeadlessDevice::new();
        let mut ctx = context();

        let mut a = EffectShaderProgram::new()
            .with_shader("test.vert")
            .with_shader("test.frag")
            .with_definition("#define SKINNED")
            .with_definition("#define NUM_LIGHTS 2");
        let mut b = EffectShaderProgram::new()
            .with_definition("#define NUM_LIGHTS 2")
            .with_shader("test.frag")
            .with_definition("#define SKINNED")
            .with_shader("test.vert");

        let pa = a.program(&mut device, &mut ctx).unwrap();
        let pb = b.program(&mut device, &mut ctx).unwrap();
        assert!(Arc::ptr_eq(&pa, &pb));
        assert_eq!(device.links, 1);
        assert_eq!(ctx.programs.len(), 1);
    }

    #[test]
    fn changing_a_definition_selects_another_variant() {
        let mut device = HeadlessDevice::new();
        let mut ctx = context();
        let mut program = EffectShaderProgram::new()
            .with_shader("test.vert")
            .with_shader("test.frag");

        let plain = program.program(&mut device, &mut ctx).unwrap();
        assert!(plain.uniform("boneRotations").is_none());

        program.add_definition("#define SKINNED");
        assert!(program.is_dirty());
        let skinned = program.program(&mut device, &mut ctx).unwrap();
        assert_ne!(plain.id(), skinned.id());
        assert!(skinned.variant_id() > plain.variant_id());
        assert_eq!(skinned.uniform("boneRotations").map(|u| u.size), Some(4));

        program.remove_definition("#define SKINNED");
        let again = program.program(&mut device, &mut ctx).unwrap();
        assert!(Arc::ptr_eq(&plain, &again));
    }

    #[test]
    fn clean_program_is_not_rebuilt() {
        let mut device = HeadlessDevice::new();
        let mut ctx = context();
        let mut program = EffectShaderProgram::new().with_shader("test.vert");

        program.program(&mut device, &mut ctx).unwrap();
        let links = device.links;
        program.program(&mut device, &mut ctx).unwrap();
        assert_eq!(device.links, links);
        assert!(!program.add_shader("test.vert"));
        assert!(!program.is_dirty());
    }

    #[test]
    fn attributes_follow_the_shared_table() {
        let mut device = HeadlessDevice::new();
        let mut ctx = context();
        let normal = ctx.attributes.query_attribute("normal").unwrap();

        let mut program = EffectShaderProgram::new().with_shader("test.vert");
        let compiled = program.program(&mut device, &mut ctx).unwrap();

        assert_eq!(compiled.attribute("normal"), Some(normal.index()));
        let reported: HashMap<_, _> = device
            .program_attributes(compiled.id())
            .into_iter()
            .map(|a| (a.name, a.location))
            .collect();
        assert_eq!(reported["normal"], normal.index());
        assert_eq!(Some(reported["position"]), compiled.attribute("position"));
        assert_eq!(ctx.attributes.len(), 2);
    }

    #[test]
    fn compile_errors_name_the_file() {
        let mut device = HeadlessDevice::new();
        let mut ctx = context();
        let mut program = EffectShaderProgram::new()
            .with_shader("test.vert")
            .with_shader("broken.frag");

        match program.program(&mut device, &mut ctx) {
            Err(RenderError::ShaderCompilation { file, log }) => {
                assert_eq!(file, "broken.frag");
                assert!(log.contains("not today"));
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(ctx.programs.is_empty());
    }

    #[test]
    fn stage_objects_are_released_after_linking() {
        let mut device = HeadlessDevice::new();
        let mut ctx = context();

        let mut fragment_only = EffectShaderProgram::new().with_shader("test.frag");
        assert!(fragment_only.program(&mut device, &mut ctx).is_err());
        assert_eq!(device.compiles, 1);
        assert_eq!(device.shaders_destroyed, 1);

        let mut complete = EffectShaderProgram::new()
            .with_shader("test.vert")
            .with_shader("test.frag");
        complete.program(&mut device, &mut ctx).unwrap();
        assert_eq!(device.shaders_destroyed, 3);
        assert_eq!(device.live_shaders(), 0);
    }

    #[test]
    fn unknown_extension_and_missing_file_fail() {
        let mut device = HeadlessDevice::new();
        let mut ctx = context();

        let mut compute = EffectShaderProgram::new().with_shader("test.comp");
        assert!(matches!(
            compute.program(&mut device, &mut ctx),
            Err(RenderError::ShaderCompilation { .. })
        ));

        let mut missing = EffectShaderProgram::new().with_shader("missing.vert");
        assert!(matches!(
            missing.program(&mut device, &mut ctx),
            Err(RenderError::ShaderSource { .. })
        ));
    }

    #[test]
    fn definitions_land_after_the_version_line() {
        let source = with_definitions("#version 130\nuniform float a;\n", "#define X\n#define Y 2");
        assert_eq!(source, "#version 130\n#define X\n#define Y 2\nuniform float a;\n");
        assert_eq!(with_definitions("uniform float a;\n", "#define X"), "#define X\nuniform float a;\n");
    }
}
