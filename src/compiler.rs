//! Shader Compiler Orchestration
//!
//! Ties the pipeline together: preprocess → registry change query → per
//! stage compile-or-cache (debug + execution variants) → reflection refresh
//! → reflection cache write.
//!
//! A reload blocks for the duration of disk I/O and backend-compiler
//! invocations; run it off any latency-sensitive thread. Distinct shaders
//! may reload concurrently from different threads — per-shader cache files
//! never contend, and the registry serializes its own critical section —
//! but one `ShaderCompiler` instance must not be reloaded from two threads
//! at once.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::{CompilationOptions, CompileRequest, ShaderBackend};
use crate::binary_cache::BinaryCache;
use crate::defines::ShaderMacros;
use crate::errors::{Result, ShaderError};
use crate::includes::read_source;
use crate::preprocessor::preprocess_shader;
use crate::reflection::{
    read_cached, reflect_stages, reflection_cache_path, write_cached, ReflectionData,
};
use crate::registry::{ShaderRegistry, StageData};
use crate::stage::{ShaderStage, SourceLang, StageFlags};

/// Pipeline-wide settings, owned by the renderer and handed to every
/// [`ShaderCompiler`].
#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    /// Directory holding the registry, binary cache and reflection cache.
    pub cache_dir: PathBuf,
    /// Include search directories for GLSL sources.
    pub glsl_include_dirs: Vec<PathBuf>,
    /// Include search directories for HLSL sources.
    pub hlsl_include_dirs: Vec<PathBuf>,
    /// Global macros the renderer defines for every shader. These are used
    /// identically for preprocessing and compilation so reflected bindings
    /// match runtime variant selection.
    pub global_macros: ShaderMacros,
    /// Explicit dxc binary; falls back to `$VULKAN_SDK/bin/dxc`, then PATH.
    pub dxc_path: Option<PathBuf>,
}

impl CompilerConfig {
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }
}

/// Per-shader compile request.
#[derive(Debug, Clone)]
pub struct ShaderDescriptor {
    pub source_path: PathBuf,
    /// Entry point; `main` unless overridden (HLSL libraries use named
    /// entries).
    pub entry_point: String,
    /// Shader-specific predefined macros, layered over the global set.
    pub predefines: ShaderMacros,
    /// Skip backend optimization for the execution variant.
    pub disable_optimization: bool,
}

impl ShaderDescriptor {
    #[must_use]
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            entry_point: "main".to_string(),
            predefines: ShaderMacros::new(),
            disable_optimization: false,
        }
    }

    #[must_use]
    pub fn with_entry_point(mut self, entry_point: &str) -> Self {
        self.entry_point = entry_point.to_string();
        self
    }

    #[must_use]
    pub fn with_predefines(mut self, predefines: ShaderMacros) -> Self {
        self.predefines = predefines;
        self
    }

    #[must_use]
    pub fn with_disable_optimization(mut self, disable: bool) -> Self {
        self.disable_optimization = disable;
        self
    }
}

/// The renderer-facing bundle produced by a successful compile.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub name: String,
    pub stages: StageFlags,
    /// Execution binaries, per stage (what the GPU pipeline loads).
    pub spirv: BTreeMap<ShaderStage, Vec<u32>>,
    /// Debug binaries, per stage (what reflection reads).
    pub spirv_debug: BTreeMap<ShaderStage, Vec<u32>>,
    pub reflection: ReflectionData,
    pub acknowledged_macros: BTreeSet<String>,
}

/// Drives one shader program through the compilation pipeline.
pub struct ShaderCompiler {
    config: CompilerConfig,
    descriptor: ShaderDescriptor,
    language: SourceLang,
    backend: ShaderBackend,
    name: String,
    macros: ShaderMacros,

    sources: BTreeMap<ShaderStage, String>,
    stages_metadata: BTreeMap<ShaderStage, StageData>,
    spirv_debug: BTreeMap<ShaderStage, Vec<u32>>,
    spirv: BTreeMap<ShaderStage, Vec<u32>>,
    reflection: ReflectionData,
    acknowledged_macros: BTreeSet<String>,
}

impl ShaderCompiler {
    pub fn new(config: CompilerConfig, descriptor: ShaderDescriptor) -> Result<Self> {
        let language = SourceLang::from_path(&descriptor.source_path)?;
        let backend = ShaderBackend::for_language(language, config.dxc_path.as_deref());
        let name = descriptor
            .source_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("shader")
            .to_string();

        let mut macros = config.global_macros.clone();
        macros.merge(&descriptor.predefines);

        Ok(Self {
            config,
            descriptor,
            language,
            backend,
            name,
            macros,
            sources: BTreeMap::new(),
            stages_metadata: BTreeMap::new(),
            spirv_debug: BTreeMap::new(),
            spirv: BTreeMap::new(),
            reflection: ReflectionData::default(),
            acknowledged_macros: BTreeSet::new(),
        })
    }

    /// Runs the full pipeline for this shader.
    ///
    /// On failure the previous caches and the caller's previously loaded
    /// binaries are untouched; a compile failure first tries the binary
    /// cache before giving up.
    pub fn reload(&mut self, force_compile: bool) -> Result<()> {
        self.sources.clear();
        self.stages_metadata.clear();
        self.spirv_debug.clear();
        self.spirv.clear();
        self.reflection = ReflectionData::default();
        self.acknowledged_macros.clear();

        fs::create_dir_all(&self.config.cache_dir)?;

        let path = self.descriptor.source_path.clone();
        let source = read_source(&path)
            .map_err(|_| ShaderError::SourceLoadFailed(path.clone()))?;
        if source.trim().is_empty() {
            return Err(ShaderError::SourceLoadFailed(path.clone()));
        }

        log::debug!("Compiling shader: {}", path.display());

        let include_dirs = match self.language {
            SourceLang::Glsl => &self.config.glsl_include_dirs,
            SourceLang::Hlsl => &self.config.hlsl_include_dirs,
        };
        let preprocessed =
            preprocess_shader(&source, &path, self.language, include_dirs, &self.macros)?;
        self.sources = preprocessed.sources;
        self.stages_metadata = preprocessed.metadata;
        self.acknowledged_macros = preprocessed.acknowledged_macros;

        let registry = ShaderRegistry::new(&self.config.cache_dir);
        let changed_stages = registry.has_changed(&path, &self.stages_metadata)?;

        self.compile_or_get_binaries(changed_stages, force_compile)?;

        let reflection_path =
            reflection_cache_path(&self.config.cache_dir, &path, &self.descriptor.entry_point);
        let reuse_cached = !force_compile
            && changed_stages.is_empty()
            && self.try_read_cached_reflection(&reflection_path);
        if !reuse_cached {
            self.reflect_all_stages()?;
            write_cached(&reflection_path, &self.reflection)?;
        }

        Ok(())
    }

    /// Stage mask of the stages this shader declares (valid after reload).
    #[must_use]
    pub fn stages(&self) -> StageFlags {
        self.spirv
            .keys()
            .fold(StageFlags::empty(), |mask, stage| mask | (*stage).into())
    }

    /// Execution binaries, per stage.
    #[must_use]
    pub fn spirv_data(&self) -> &BTreeMap<ShaderStage, Vec<u32>> {
        &self.spirv
    }

    /// Debug binaries, per stage.
    #[must_use]
    pub fn spirv_debug_data(&self) -> &BTreeMap<ShaderStage, Vec<u32>> {
        &self.spirv_debug
    }

    #[must_use]
    pub fn reflection_data(&self) -> &ReflectionData {
        &self.reflection
    }

    #[must_use]
    pub fn acknowledged_macros(&self) -> &BTreeSet<String> {
        &self.acknowledged_macros
    }

    /// Consumes the compiler into the renderer-facing bundle.
    #[must_use]
    pub fn into_compiled(self) -> CompiledShader {
        let stages = self
            .spirv
            .keys()
            .fold(StageFlags::empty(), |mask, stage| mask | (*stage).into());
        CompiledShader {
            name: self.name,
            stages,
            spirv: self.spirv,
            spirv_debug: self.spirv_debug,
            reflection: self.reflection,
            acknowledged_macros: self.acknowledged_macros,
        }
    }

    fn compile_or_get_binaries(
        &mut self,
        changed_stages: StageFlags,
        force_compile: bool,
    ) -> Result<()> {
        let stages: Vec<ShaderStage> = self.sources.keys().copied().collect();
        for stage in stages {
            let debug_words = self.compile_or_get_binary(stage, true, changed_stages, force_compile)?;
            self.spirv_debug.insert(stage, debug_words);
            let words = self.compile_or_get_binary(stage, false, changed_stages, force_compile)?;
            self.spirv.insert(stage, words);
        }
        Ok(())
    }

    /// Returns the stage's words, from cache when the stage is unchanged, or
    /// by invoking the backend. A failed compile falls back to the cache; a
    /// failed compile with an empty cache fails the reload.
    fn compile_or_get_binary(
        &self,
        stage: ShaderStage,
        debug: bool,
        changed_stages: StageFlags,
        force_compile: bool,
    ) -> Result<Vec<u32>> {
        let cache = BinaryCache::new(&self.config.cache_dir);
        let path = &self.descriptor.source_path;
        let entry_point = self.descriptor.entry_point.as_str();

        if !force_compile && !changed_stages.contains(stage.into()) {
            if let Some(words) = cache.read(path, entry_point, stage, debug) {
                return Ok(words);
            }
        }

        // The execution variant keeps debug info too; only reflection
        // depends on it, but stripping it buys nothing at runtime.
        let options = if debug {
            CompilationOptions {
                generate_debug_info: true,
                optimize: false,
            }
        } else {
            CompilationOptions {
                generate_debug_info: true,
                optimize: !self.descriptor.disable_optimization,
            }
        };

        let request = CompileRequest {
            source_path: path,
            stage,
            stage_source: self.sources.get(&stage).map_or("", String::as_str),
            entry_point,
            macros: &self.macros,
            options,
        };

        match self.backend.compile(&request) {
            Ok(words) => {
                cache.write(path, entry_point, stage, debug, &words)?;
                Ok(words)
            }
            Err(err) => {
                log::error!("{err}");
                if let Some(words) = cache.read(path, entry_point, stage, debug) {
                    log::error!(
                        "Failed to compile {}:{stage} so a cached version was loaded instead.",
                        path.display()
                    );
                    Ok(words)
                } else {
                    log::error!("Failed to compile shader and couldn't find a cached version.");
                    Err(err)
                }
            }
        }
    }

    fn try_read_cached_reflection(&mut self, reflection_path: &Path) -> bool {
        match read_cached(reflection_path) {
            Some(data) => {
                self.reflection = data;
                true
            }
            None => false,
        }
    }

    /// Re-enumerates every stage's debug binary through one fresh merge
    /// context. Reflection is wiped first, so merging only ever happens
    /// within this single pass.
    fn reflect_all_stages(&mut self) -> Result<()> {
        self.reflection = reflect_stages(
            self.spirv_debug
                .iter()
                .map(|(stage, words)| (*stage, words.as_slice())),
        )?;
        Ok(())
    }
}

/// Compiles a shader in one call and hands back the renderer-facing bundle.
pub fn compile_shader(
    config: CompilerConfig,
    descriptor: ShaderDescriptor,
    force_compile: bool,
) -> Result<CompiledShader> {
    let mut compiler = ShaderCompiler::new(config, descriptor)?;
    compiler.reload(force_compile)?;
    Ok(compiler.into_compiled())
}
