//! Shader source loading.
//!
//! Programs name their stages by relative file path (`"Forward/lighting.frag"`).
//! A [`ShaderLoader`] turns such a path into source text. Two loaders ship with
//! the crate:
//!
//! - [`DirectoryLoader`] reads files under a root directory, for projects that
//!   keep shaders on disk and want to edit them without rebuilding.
//! - [`ShaderLibrary`] serves sources from memory. [`ShaderLibrary::builtin`]
//!   embeds the GLSL the built-in effects use.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Resolves shader file names to source text.
pub trait ShaderLoader: Send + Sync {
    fn load(&self, file: &str) -> io::Result<String>;
}

/// Loads shaders from files below a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
}

impl DirectoryLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ShaderLoader for DirectoryLoader {
    fn load(&self, file: &str) -> io::Result<String> {
        fs::read_to_string(self.root.join(file))
    }
}

/// In-memory shader sources keyed by file name.
#[derive(Debug, Clone, Default)]
pub struct ShaderLibrary {
    sources: HashMap<String, Cow<'static, str>>,
}

macro_rules! builtin_shaders {
    ($($name:literal),* $(,)?) => {
        &[$(($name, include_str!(concat!("../shaders/", $name)))),*]
    };
}

/// Sources of the built-in effects, compiled into the binary.
const BUILTIN: &[(&str, &str)] = builtin_shaders![
    "rigid.vert",
    "skinned.vert",
    "fill.frag",
    "depth.frag",
    "Forward/normal.frag",
    "Forward/lighting.frag",
    "skybox.vert",
    "skybox.frag",
    "debug.vert",
    "debug.frag",
    "Water/Ocean.vert",
    "Water/Ocean.frag",
    "Water/Frequencies.frag",
    "Water/OceanMaps.frag",
    "Extrude/extrude.vert",
    "Post/fullscreen.vert",
    "Post/copy.frag",
    "Post/fog.frag",
    "Post/FFT.frag",
];

impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// A library holding every shader the built-in effects reference.
    pub fn builtin() -> Self {
        let mut library = Self::new();
        for (name, source) in BUILTIN {
            library.sources.insert((*name).to_string(), Cow::Borrowed(*source));
        }
        library
    }

    /// Adds or replaces a source.
    pub fn insert(&mut self, file: impl Into<String>, source: impl Into<Cow<'static, str>>) {
        self.sources.insert(file.into(), source.into());
    }

    pub fn with(mut self, file: impl Into<String>, source: impl Into<Cow<'static, str>>) -> Self {
        self.insert(file, source);
        self
    }

    pub fn contains(&self, file: &str) -> bool {
        self.sources.contains_key(file)
    }
}

impl ShaderLoader for ShaderLibrary {
    fn load(&self, file: &str) -> io::Result<String> {
        self.sources
            .get(file)
            .map(|s| s.to_string())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no shader named '{file}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_library_has_every_effect_shader() {
        let library = ShaderLibrary::builtin();
        for (name, _) in BUILTIN {
            assert!(library.load(name).is_ok(), "{name} missing");
        }
        assert!(library.load("nope.frag").is_err());
    }

    #[test]
    fn directory_loader_reads_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Forward")).unwrap();
        fs::write(dir.path().join("Forward/test.frag"), "uniform float opacity;\n").unwrap();

        let loader = DirectoryLoader::new(dir.path());
        assert_eq!(loader.load("Forward/test.frag").unwrap(), "uniform float opacity;\n");
        assert_eq!(
            loader.load("Forward/missing.frag").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn inserted_sources_override_builtins() {
        let library = ShaderLibrary::builtin().with("fill.frag", "#error replaced\n");
        assert_eq!(library.load("fill.frag").unwrap(), "#error replaced\n");
    }
}
