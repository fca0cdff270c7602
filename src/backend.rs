//! Compiler Backend Adapter
//!
//! Invokes the language-specific offline compiler for one stage's
//! preprocessed text and yields SPIR-V words. The backend is a closed
//! dispatch selected once per shader from its source language — GLSL goes
//! through shaderc in-process, HLSL through the `dxc` executable.
//!
//! Every stage is compiled twice per pass: a debug variant (debug info on,
//! optimization off) that only reflection ever reads, and an execution
//! variant built with the caller's settings. Aggressive optimization can
//! strip the named bindings reflection depends on, which is why the two
//! variants must not be collapsed into one.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::binary_cache::{artifact_stem, words_from_bytes};
use crate::defines::ShaderMacros;
use crate::errors::{Result, ShaderError};
use crate::stage::{ShaderStage, SourceLang};

/// Per-invocation compile settings.
#[derive(Debug, Clone, Copy)]
pub struct CompilationOptions {
    pub generate_debug_info: bool,
    pub optimize: bool,
}

/// One stage's compile request.
#[derive(Debug)]
pub struct CompileRequest<'a> {
    pub source_path: &'a Path,
    pub stage: ShaderStage,
    pub stage_source: &'a str,
    pub entry_point: &'a str,
    pub macros: &'a ShaderMacros,
    pub options: CompilationOptions,
}

/// The language-selected compiler backend.
#[derive(Debug)]
pub enum ShaderBackend {
    Glsl,
    Hlsl { dxc_path: PathBuf },
}

impl ShaderBackend {
    /// Selects the backend for a source language.
    ///
    /// For HLSL, the dxc binary is taken from `dxc_override`, then
    /// `$VULKAN_SDK/bin/dxc`, then `dxc` on `PATH`.
    #[must_use]
    pub fn for_language(lang: SourceLang, dxc_override: Option<&Path>) -> Self {
        match lang {
            SourceLang::Glsl => ShaderBackend::Glsl,
            SourceLang::Hlsl => {
                let dxc_path = dxc_override.map_or_else(
                    || {
                        env::var_os("VULKAN_SDK").map_or_else(
                            || PathBuf::from("dxc"),
                            |sdk| Path::new(&sdk).join("bin").join("dxc"),
                        )
                    },
                    Path::to_path_buf,
                );
                ShaderBackend::Hlsl { dxc_path }
            }
        }
    }

    /// Compiles one stage to SPIR-V words.
    pub fn compile(&self, request: &CompileRequest<'_>) -> Result<Vec<u32>> {
        match self {
            ShaderBackend::Glsl => compile_glsl(request),
            ShaderBackend::Hlsl { dxc_path } => compile_hlsl(request, dxc_path),
        }
    }
}

// ─── GLSL (shaderc) ───────────────────────────────────────────────────────────

fn compile_glsl(request: &CompileRequest<'_>) -> Result<Vec<u32>> {
    let compiler = shaderc::Compiler::new().ok_or_else(|| ShaderError::ToolchainSpawn {
        tool: "shaderc".to_string(),
        message: "failed to initialize the GLSL compiler".to_string(),
    })?;
    let mut options =
        shaderc::CompileOptions::new().ok_or_else(|| ShaderError::ToolchainSpawn {
            tool: "shaderc".to_string(),
            message: "failed to allocate compile options".to_string(),
        })?;

    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_2 as u32,
    );
    options.set_target_spirv(shaderc::SpirvVersion::V1_5);
    options.set_warnings_as_errors();
    if request.options.generate_debug_info {
        options.set_generate_debug_info();
    }
    if request.options.optimize {
        options.set_optimization_level(shaderc::OptimizationLevel::Performance);
    }

    options.add_macro_definition(SourceLang::Glsl.lang_macro(), None);
    options.add_macro_definition(request.stage.stage_macro(), None);
    for (name, value) in request.macros.iter() {
        let value = (!value.is_empty()).then_some(value);
        options.add_macro_definition(name, value);
    }

    let artifact = compiler
        .compile_into_spirv(
            request.stage_source,
            request.stage.shaderc_kind(),
            &request.source_path.to_string_lossy(),
            request.entry_point,
            Some(&options),
        )
        .map_err(|err| ShaderError::Compile {
            path: request.source_path.to_path_buf(),
            stage: request.stage,
            message: err.to_string(),
        })?;

    Ok(artifact.as_binary().to_vec())
}

// ─── HLSL (dxc) ───────────────────────────────────────────────────────────────

fn compile_hlsl(request: &CompileRequest<'_>, dxc_path: &Path) -> Result<Vec<u32>> {
    // Stage text is already include-expanded; macros still arrive via -D
    // because conditionals are evaluated here, not during expansion.
    let scratch = env::temp_dir();
    let base = format!(
        "ember-{}-{}{}{}",
        std::process::id(),
        artifact_stem(request.source_path, request.entry_point),
        request.stage.cached_file_extension(request.options.generate_debug_info),
        ".tmp"
    );
    let input = scratch.join(format!("{base}.hlsl"));
    let output = scratch.join(format!("{base}.spv"));
    fs::write(&input, request.stage_source)?;

    let mut cmd = Command::new(dxc_path);
    cmd.arg(&input)
        .args(["-E", request.entry_point])
        .args(["-T", request.stage.hlsl_profile()])
        .args(["-spirv", "-fspv-target-env=vulkan1.2", "-Zpc", "-WX"]);

    cmd.arg("-D").arg(SourceLang::Hlsl.lang_macro());
    cmd.arg("-D").arg(request.stage.stage_macro());
    for (name, value) in request.macros.iter() {
        let define = if value.is_empty() {
            name.to_string()
        } else {
            format!("{name}={value}")
        };
        cmd.arg("-D").arg(define);
    }

    if request.options.generate_debug_info {
        cmd.args(["-Qembed_debug", "-Zi"]);
    }
    if !request.options.optimize {
        cmd.arg("-Od");
    }
    if request.stage.is_vertex_pipeline() {
        cmd.arg("-fvk-invert-y");
    }
    cmd.arg("-Fo").arg(&output);

    let result = cmd.output();
    let _ = fs::remove_file(&input);

    let out = result.map_err(|err| ShaderError::ToolchainSpawn {
        tool: dxc_path.display().to_string(),
        message: err.to_string(),
    })?;

    if !out.status.success() {
        let _ = fs::remove_file(&output);
        let mut message = String::from_utf8_lossy(&out.stderr).into_owned();
        if message.trim().is_empty() {
            message = String::from_utf8_lossy(&out.stdout).into_owned();
        }
        return Err(ShaderError::Compile {
            path: request.source_path.to_path_buf(),
            stage: request.stage,
            message,
        });
    }

    let bytes = fs::read(&output)?;
    let _ = fs::remove_file(&output);
    Ok(words_from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_selection_is_language_driven() {
        assert!(matches!(
            ShaderBackend::for_language(SourceLang::Glsl, None),
            ShaderBackend::Glsl
        ));
        let hlsl = ShaderBackend::for_language(SourceLang::Hlsl, Some(Path::new("/opt/dxc")));
        match hlsl {
            ShaderBackend::Hlsl { dxc_path } => assert_eq!(dxc_path, Path::new("/opt/dxc")),
            ShaderBackend::Glsl => panic!("expected the HLSL backend"),
        }
    }

    #[test]
    fn missing_dxc_surfaces_a_spawn_error() {
        let backend = ShaderBackend::Hlsl {
            dxc_path: PathBuf::from("/nonexistent/dxc-binary"),
        };
        let macros = ShaderMacros::new();
        let request = CompileRequest {
            source_path: Path::new("shaders/rt.hlsl"),
            stage: ShaderStage::RayGen,
            stage_source: "void main() {}",
            entry_point: "main",
            macros: &macros,
            options: CompilationOptions {
                generate_debug_info: false,
                optimize: true,
            },
        };
        assert!(matches!(
            backend.compile(&request),
            Err(ShaderError::ToolchainSpawn { .. })
        ));
    }
}
