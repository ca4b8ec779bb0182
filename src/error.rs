//! Error taxonomy for the effect and frame pipeline.
//!
//! Most of these never escape the frame loop. Shader and technique failures are
//! caught at the effect boundary and logged, render target failures abort only
//! the current camera, and parameter mismatches are warnings.

use thiserror::Error;

/// Errors produced while resolving effects into passes and driving a frame.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A bounded resource pool (vertex attribute slots) is full.
    #[error("Resource exhausted: no free {resource} slot (capacity {capacity})")]
    ResourceExhausted {
        resource: &'static str,
        capacity: usize,
    },

    /// A shader stage failed to compile, or the program failed to link.
    #[error("Shader compilation failed for '{file}': {log}")]
    ShaderCompilation { file: String, log: String },

    /// A shader source file could not be loaded.
    #[error("Failed to load shader source '{file}': {source}")]
    ShaderSource {
        file: String,
        #[source]
        source: std::io::Error,
    },

    /// Binding or (re)building a render target failed.
    #[error("Render target error: {0}")]
    RenderTarget(String),

    /// The active render technique is not supported by an effect.
    #[error("{effect} does not support the {technique:?} technique")]
    UnsupportedTechnique {
        effect: &'static str,
        technique: crate::config::RenderTechnique,
    },

    /// A named uniform could not be connected to a parameter.
    #[error("Parameter binding mismatch for uniform '{uniform}': {reason}")]
    ParameterBindingMismatch { uniform: String, reason: String },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_error_names_file_and_log() {
        let err = RenderError::ShaderCompilation {
            file: "Forward/lighting.frag".into(),
            log: "0:12: undeclared identifier".into(),
        };
        let text = err.to_string();
        assert!(text.contains("Forward/lighting.frag"));
        assert!(text.contains("undeclared identifier"));
    }

    #[test]
    fn shader_source_error_exposes_io_source() {
        use std::error::Error as _;

        let err = RenderError::ShaderSource {
            file: "missing.vert".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.source().is_some());
    }
}
