//! Minimal GLSL preprocessing and interface reflection for the headless device.
//!
//! Handles `#define`/`#undef`, `#ifdef`/`#ifndef`/`#else`/`#endif` and
//! `#error`, then scans active lines for `uniform` declarations and, in vertex
//! shaders, `in`/`attribute` inputs. No expression evaluation.

use std::collections::BTreeMap;

use crate::device::ShaderStage;
use crate::tables::{ParamType, TextureKind};

/// A reflected uniform declaration.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ReflectedUniform {
    pub name: String,
    pub ty: Option<ParamType>,
    pub size: usize,
}

/// Interface of one compiled stage.
#[derive(Clone, Debug, Default)]
pub(crate) struct Reflection {
    pub defines: BTreeMap<String, String>,
    pub uniforms: Vec<ReflectedUniform>,
    pub attributes: Vec<String>,
}

const PRECISION: [&str; 3] = ["lowp", "mediump", "highp"];

pub(crate) fn reflect(stage: ShaderStage, source: &str) -> Result<Reflection, String> {
    let mut out = Reflection::default();
    // One entry per open conditional: (branch active, parent active, else seen).
    let mut stack: Vec<(bool, bool, bool)> = Vec::new();

    for (line_no, raw) in source.lines().enumerate() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        let active = stack.last().is_none_or(|&(branch, _, _)| branch);

        if let Some(directive) = line.strip_prefix('#') {
            let mut parts = directive.trim().splitn(2, char::is_whitespace);
            let keyword = parts.next().unwrap_or_default();
            let rest = parts.next().unwrap_or_default().trim();

            match keyword {
                "ifdef" | "ifndef" => {
                    let defined = out.defines.contains_key(rest);
                    let cond = if keyword == "ifdef" { defined } else { !defined };
                    stack.push((active && cond, active, false));
                }
                "else" => {
                    let Some(top) = stack.last_mut() else {
                        return Err(format!("0:{}: #else without #if", line_no + 1));
                    };
                    if top.2 {
                        return Err(format!("0:{}: duplicate #else", line_no + 1));
                    }
                    *top = (top.1 && !top.0, top.1, true);
                }
                "endif" => {
                    if stack.pop().is_none() {
                        return Err(format!("0:{}: #endif without #if", line_no + 1));
                    }
                }
                _ if !active => {}
                "define" => {
                    let mut def = rest.splitn(2, char::is_whitespace);
                    let name = def.next().unwrap_or_default();
                    if name.is_empty() {
                        return Err(format!("0:{}: #define without a name", line_no + 1));
                    }
                    let value = def.next().unwrap_or_default().trim();
                    out.defines.insert(name.to_string(), value.to_string());
                }
                "undef" => {
                    out.defines.remove(rest);
                }
                "error" => return Err(format!("0:{}: #error {}", line_no + 1, rest)),
                _ => {}
            }
            continue;
        }

        if !active {
            continue;
        }

        for statement in line.split(';') {
            scan_declaration(stage, statement, &mut out, line_no)?;
        }
    }

    if !stack.is_empty() {
        return Err("0:0: unterminated conditional block".to_string());
    }
    Ok(out)
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn scan_declaration(
    stage: ShaderStage,
    statement: &str,
    out: &mut Reflection,
    line_no: usize,
) -> Result<(), String> {
    let mut tokens = statement.split_whitespace().peekable();
    let Some(&qualifier) = tokens.peek() else {
        return Ok(());
    };
    let is_uniform = qualifier == "uniform";
    let is_input =
        stage == ShaderStage::Vertex && (qualifier == "in" || qualifier == "attribute");
    if !is_uniform && !is_input {
        return Ok(());
    }
    tokens.next();

    let mut ty = tokens.next().unwrap_or_default();
    while PRECISION.contains(&ty) {
        ty = tokens.next().unwrap_or_default();
    }
    let declarator: String = tokens.collect();
    if ty.is_empty() || declarator.is_empty() {
        return Err(format!("0:{}: malformed declaration '{}'", line_no + 1, statement.trim()));
    }

    let (name, size) = match declarator.split_once('[') {
        Some((name, dim)) => {
            let dim = dim.trim_end_matches(']').trim();
            (name.to_string(), array_size(dim, &out.defines, line_no)?)
        }
        None => (declarator, 1),
    };

    if is_uniform {
        if !out.uniforms.iter().any(|u| u.name == name) {
            out.uniforms.push(ReflectedUniform {
                name,
                ty: glsl_type(ty),
                size,
            });
        }
    } else if !out.attributes.contains(&name) {
        out.attributes.push(name);
    }
    Ok(())
}

fn array_size(dim: &str, defines: &BTreeMap<String, String>, line_no: usize) -> Result<usize, String> {
    let resolved = defines.get(dim).map(String::as_str).unwrap_or(dim);
    resolved
        .parse::<usize>()
        .ok()
        .filter(|&n| n > 0)
        .ok_or_else(|| format!("0:{}: array size '{}' is not a positive constant", line_no + 1, dim))
}

/// Maps a GLSL type name to the parameter type it accepts.
pub(crate) fn glsl_type(name: &str) -> Option<ParamType> {
    let ty = match name {
        "float" => ParamType::Float,
        "int" => ParamType::Int,
        "bool" => ParamType::Bool,
        "vec2" => ParamType::Vec2,
        "vec3" => ParamType::Vec3,
        "vec4" => ParamType::Vec4,
        "ivec2" => ParamType::IVec2,
        "ivec3" => ParamType::IVec3,
        "ivec4" => ParamType::IVec4,
        "mat2" => ParamType::Mat2,
        "mat3" => ParamType::Mat3,
        "mat4" => ParamType::Mat4,
        "sampler2D" | "sampler2DShadow" => ParamType::Texture(TextureKind::D2),
        "sampler3D" => ParamType::Texture(TextureKind::D3),
        "samplerCube" => ParamType::Texture(TextureKind::Cube),
        _ => return None,
    };
    Some(ty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditional_blocks_select_declarations() {
        let source = "\
#define NUM_LIGHTS 2
#ifdef SKINNED
uniform vec4 boneRotations[64];
#else
uniform mat4 worldViewMatrix;
#endif
uniform vec4 lightColorIntensity[NUM_LIGHTS];
in vec3 position;
";
        let reflection = reflect(ShaderStage::Vertex, source).unwrap();
        let names: Vec<_> = reflection.uniforms.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["worldViewMatrix", "lightColorIntensity"]);
        assert_eq!(reflection.uniforms[1].size, 2);
        assert_eq!(reflection.attributes, ["position"]);
    }

    #[test]
    fn error_directive_fails_compilation() {
        let err = reflect(ShaderStage::Fragment, "#error broken\n").unwrap_err();
        assert!(err.contains("broken"));
    }

    #[test]
    fn inactive_error_directive_is_ignored() {
        let source = "#ifdef NEVER\n#error unreachable\n#endif\nuniform float opacity;\n";
        let reflection = reflect(ShaderStage::Fragment, source).unwrap();
        assert_eq!(reflection.uniforms.len(), 1);
    }

    #[test]
    fn fragment_inputs_are_not_attributes() {
        let reflection = reflect(ShaderStage::Fragment, "in vec3 normal;\n").unwrap();
        assert!(reflection.attributes.is_empty());
    }

    #[test]
    fn unknown_types_reflect_as_unsupported() {
        let reflection = reflect(ShaderStage::Fragment, "uniform image2D target;\n").unwrap();
        assert_eq!(reflection.uniforms[0].ty, None);
    }
}
