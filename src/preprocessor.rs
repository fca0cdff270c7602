//! Shader Preprocessor
//!
//! Splits one source file into per-stage text blobs using
//! `#pragma stage : <token>` delimiters, expands includes, and harvests the
//! acknowledged macros the renderer needs to know about.
//!
//! The two source languages take different expansion routes:
//!
//! | Language | Expansion | Conditionals evaluated |
//! |----------|-----------|------------------------|
//! | GLSL     | backend preprocessor (shaderc) with our include callback | at preprocess time |
//! | HLSL     | crate-side include expansion ([`IncludeHandler`])        | at compile time (dxc `-D`) |
//!
//! Either way, the *pre-expansion* stage text is what gets hashed into
//! [`StageData`] — header edits are tracked through the per-header hashes,
//! not by rehashing the expanded blob.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::defines::{harvest_special_macros, ShaderMacros};
use crate::errors::{Result, ShaderError};
use crate::hash;
use crate::includes::{FileFinder, IncludeHandler, IncludeKind};
use crate::registry::StageData;
use crate::stage::{ShaderStage, SourceLang};

/// The result of preprocessing one shader source file.
#[derive(Debug, Default)]
pub struct PreprocessedShader {
    /// Fully expanded per-stage source, ready for the compiler backend.
    pub sources: BTreeMap<ShaderStage, String>,
    /// Per-stage cache identity (pre-expansion hash + header records).
    pub metadata: BTreeMap<ShaderStage, StageData>,
    /// Special macros this shader (or its headers) conditions on.
    pub acknowledged_macros: BTreeSet<String>,
}

/// Preprocesses a whole shader source file.
///
/// `macros` must be the renderer's global macros merged with the shader's
/// own predefines; the same set is handed to the compiler backend so that
/// reflected bindings match what runs at draw time.
pub fn preprocess_shader(
    source: &str,
    source_path: &Path,
    lang: SourceLang,
    include_dirs: &[PathBuf],
    macros: &ShaderMacros,
) -> Result<PreprocessedShader> {
    let stage_sources = split_stages(source, source_path)?;

    let mut result = PreprocessedShader::default();
    for (stage, stage_source) in stage_sources {
        harvest_special_macros(&stage_source, &mut result.acknowledged_macros);

        let finder = FileFinder::new(include_dirs.to_vec());
        let (expanded, data, header_macros) = match lang {
            SourceLang::Glsl => {
                preprocess_glsl_stage(&stage_source, source_path, stage, finder, macros)?
            }
            SourceLang::Hlsl => preprocess_hlsl_stage(&stage_source, source_path, stage, finder)?,
        };

        result.acknowledged_macros.extend(header_macros);
        result.metadata.insert(stage, data);
        result.sources.insert(stage, expanded);
    }

    Ok(result)
}

/// Splits the source into per-stage text on `#pragma stage : <token>`
/// delimiters. Text above the first delimiter is shared and prepended to
/// every stage block.
pub fn split_stages(source: &str, source_path: &Path) -> Result<BTreeMap<ShaderStage, String>> {
    let mut preamble = String::new();
    let mut stages: BTreeMap<ShaderStage, String> = BTreeMap::new();
    let mut current: Option<ShaderStage> = None;

    for line in source.lines() {
        if let Some(token) = parse_stage_pragma(line) {
            let stage = ShaderStage::from_pragma_token(token)?;
            stages.entry(stage).or_default();
            current = Some(stage);
            continue;
        }
        match current {
            Some(stage) => {
                let block = stages.get_mut(&stage).expect("stage block exists");
                block.push_str(line);
                block.push('\n');
            }
            None => {
                preamble.push_str(line);
                preamble.push('\n');
            }
        }
    }

    if stages.is_empty() {
        return Err(ShaderError::NoStages(source_path.to_path_buf()));
    }

    if !preamble.trim().is_empty() {
        for block in stages.values_mut() {
            let body = std::mem::take(block);
            *block = format!("{preamble}{body}");
        }
    }

    Ok(stages)
}

fn parse_stage_pragma(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("#pragma")?.trim_start();
    let rest = rest.strip_prefix("stage")?.trim_start();
    let token = rest.strip_prefix(':')?.trim();
    (!token.is_empty()).then_some(token)
}

// ─── GLSL ─────────────────────────────────────────────────────────────────────

fn preprocess_glsl_stage(
    stage_source: &str,
    source_path: &Path,
    stage: ShaderStage,
    finder: FileFinder,
    macros: &ShaderMacros,
) -> Result<(String, StageData, BTreeSet<String>)> {
    let compiler = shaderc::Compiler::new().ok_or_else(|| ShaderError::ToolchainSpawn {
        tool: "shaderc".to_string(),
        message: "failed to initialize the GLSL compiler".to_string(),
    })?;
    let mut options =
        shaderc::CompileOptions::new().ok_or_else(|| ShaderError::ToolchainSpawn {
            tool: "shaderc".to_string(),
            message: "failed to allocate compile options".to_string(),
        })?;

    options.add_macro_definition(SourceLang::Glsl.lang_macro(), None);
    options.add_macro_definition(stage.stage_macro(), None);
    for (name, value) in macros.iter() {
        let value = (!value.is_empty()).then_some(value);
        options.add_macro_definition(name, value);
    }

    let handler = Arc::new(Mutex::new(IncludeHandler::new(finder)));
    let callback_handler = Arc::clone(&handler);
    options.set_include_callback(move |name, include_type, requester, depth| {
        let kind = match include_type {
            shaderc::IncludeType::Relative => IncludeKind::Relative,
            shaderc::IncludeType::Standard => IncludeKind::Standard,
        };
        callback_handler
            .lock()
            .resolve(name, kind, Path::new(requester), depth)
            .map(|resolved| shaderc::ResolvedInclude {
                resolved_name: resolved.path.to_string_lossy().into_owned(),
                content: resolved.content,
            })
            .map_err(|err| err.to_string())
    });

    let artifact = compiler
        .preprocess(
            stage_source,
            &source_path.to_string_lossy(),
            "main",
            Some(&options),
        )
        .map_err(|err| {
            log::error!(
                "Failed to pre-process {} stage of {}:\n{}",
                stage,
                source_path.display(),
                stage_source
            );
            ShaderError::Preprocess {
                path: source_path.to_path_buf(),
                stage,
                message: err.to_string(),
            }
        })?;
    let expanded = artifact.as_text();

    let mut handler = handler.lock();
    let data = StageData {
        hash: hash::fnv1a(stage_source),
        headers: handler.take_records(),
    };
    let header_macros = handler.take_special_macros();

    Ok((expanded, data, header_macros))
}

// ─── HLSL ─────────────────────────────────────────────────────────────────────

/// HLSL include expansion happens crate-side: the offline compiler runs out
/// of process, so the resolver cannot be hooked into it the way the shaderc
/// callback can. Conditionals are left intact and resolved by dxc `-D`s.
fn preprocess_hlsl_stage(
    stage_source: &str,
    source_path: &Path,
    stage: ShaderStage,
    finder: FileFinder,
) -> Result<(String, StageData, BTreeSet<String>)> {
    let mut handler = IncludeHandler::new(finder);
    let expanded =
        expand_includes(stage_source, source_path, &mut handler, 1).inspect_err(|_| {
            log::error!(
                "Failed to pre-process {} stage of {}:\n{}",
                stage,
                source_path.display(),
                stage_source
            );
        })?;

    let data = StageData {
        hash: hash::fnv1a(stage_source),
        headers: handler.take_records(),
    };
    let header_macros = handler.take_special_macros();

    Ok((expanded, data, header_macros))
}

fn expand_includes(
    text: &str,
    current_file: &Path,
    handler: &mut IncludeHandler,
    depth: usize,
) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let Some((name, kind)) = parse_include_directive(line) else {
            out.push_str(line);
            out.push('\n');
            continue;
        };
        let resolved = handler.resolve(name, kind, current_file, depth)?;
        if !resolved.content.is_empty() {
            let nested = expand_includes(&resolved.content, &resolved.path, handler, depth + 1)?;
            out.push_str(&nested);
        }
    }
    Ok(out)
}

fn parse_include_directive(line: &str) -> Option<(&str, IncludeKind)> {
    let rest = line.trim().strip_prefix('#')?.trim_start();
    let rest = rest.strip_prefix("include")?.trim_start();
    if let Some(inner) = rest.strip_prefix('"') {
        let (name, _) = inner.split_once('"')?;
        Some((name, IncludeKind::Relative))
    } else if let Some(inner) = rest.strip_prefix('<') {
        let (name, _) = inner.split_once('>')?;
        Some((name, IncludeKind::Standard))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_two_stage_source() {
        let source = "\
#version 450\n\
#pragma stage : vert\n\
void main() { gl_Position = vec4(0.0); }\n\
#pragma stage : frag\n\
layout(location = 0) out vec4 o_Color;\n\
void main() { o_Color = vec4(1.0); }\n";
        let stages = split_stages(source, Path::new("test.glsl")).unwrap();
        assert_eq!(stages.len(), 2);
        let vert = &stages[&ShaderStage::Vertex];
        let frag = &stages[&ShaderStage::Fragment];
        // Shared preamble lands in both stages.
        assert!(vert.starts_with("#version 450"));
        assert!(frag.starts_with("#version 450"));
        assert!(vert.contains("gl_Position"));
        assert!(!vert.contains("o_Color"));
        assert!(frag.contains("o_Color"));
    }

    #[test]
    fn pragma_spacing_is_tolerated() {
        assert_eq!(parse_stage_pragma("#pragma stage : vert"), Some("vert"));
        assert_eq!(parse_stage_pragma("  #pragma stage:frag"), Some("frag"));
        assert_eq!(parse_stage_pragma("#pragma stage :comp"), Some("comp"));
        assert_eq!(parse_stage_pragma("#pragma once"), None);
        assert_eq!(parse_stage_pragma("#pragma stage :"), None);
    }

    #[test]
    fn unknown_stage_token_is_an_error() {
        let source = "#pragma stage : geom\nvoid main() {}\n";
        assert!(matches!(
            split_stages(source, Path::new("test.glsl")),
            Err(ShaderError::UnknownStage(_))
        ));
    }

    #[test]
    fn stage_free_source_is_an_error() {
        assert!(matches!(
            split_stages("void main() {}\n", Path::new("test.glsl")),
            Err(ShaderError::NoStages(_))
        ));
    }

    #[test]
    fn include_directives_parse_both_forms() {
        assert_eq!(
            parse_include_directive("#include \"common.hlslh\""),
            Some(("common.hlslh", IncludeKind::Relative))
        );
        assert_eq!(
            parse_include_directive("# include <lighting.hlslh>"),
            Some(("lighting.hlslh", IncludeKind::Standard))
        );
        assert_eq!(parse_include_directive("float4 color;"), None);
    }
}
