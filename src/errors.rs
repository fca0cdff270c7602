//! Error Types
//!
//! This module defines the error types used throughout the shader pipeline.
//!
//! # Overview
//!
//! The main error type [`ShaderError`] covers all failure modes including:
//! - Source loading and preprocessing failures
//! - Include resolution failures
//! - Backend compilation failures (with cache-fallback exhaustion)
//! - Cache/registry (de)serialization errors
//! - SPIR-V reflection errors
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, ShaderError>`.
//!
//! A failed [`reload`](crate::compiler::ShaderCompiler::reload) is reported
//! through this type; the caller is expected to keep the previously loaded
//! binaries live rather than tearing down its pipeline state.

use std::path::PathBuf;

use thiserror::Error;

use crate::reflection::ResourceKind;
use crate::stage::ShaderStage;

/// The main error type for the shader compilation pipeline.
#[derive(Error, Debug)]
pub enum ShaderError {
    // ========================================================================
    // Source & Preprocessing Errors
    // ========================================================================
    /// The shader source file could not be read or was empty.
    #[error("Failed to load shader source: {}", .0.display())]
    SourceLoadFailed(PathBuf),

    /// The source file extension does not map to a known source language.
    #[error("Unknown shader source extension: {0}")]
    UnknownExtension(String),

    /// A stage-delimiter pragma named an unknown stage.
    #[error("Unknown shader stage token: {0}")]
    UnknownStage(String),

    /// The source file declares no stage blocks at all.
    #[error("Shader source declares no stages: {}", .0.display())]
    NoStages(PathBuf),

    /// The backend preprocessor rejected a stage's source.
    #[error("Failed to pre-process \"{}\" {stage} shader.\nError: {message}", .path.display())]
    Preprocess {
        path: PathBuf,
        stage: ShaderStage,
        message: String,
    },

    // ========================================================================
    // Include Resolution Errors
    // ========================================================================
    /// No search directory resolved the include.
    #[error("Could not resolve include \"{name}\" (requested from {})", .requester.display())]
    IncludeNotFound { name: String, requester: PathBuf },

    /// Include recursion exceeded the depth guard (header cycle?).
    #[error("Include depth limit exceeded at \"{}\" (depth {depth})", .path.display())]
    IncludeDepthExceeded { path: PathBuf, depth: usize },

    // ========================================================================
    // Compilation Errors
    // ========================================================================
    /// The backend compiler rejected a stage, and no cached binary existed
    /// to fall back on.
    #[error("{message}\nWhile compiling shader file: {}\nAt stage: {stage}", .path.display())]
    Compile {
        path: PathBuf,
        stage: ShaderStage,
        message: String,
    },

    /// The offline compiler executable could not be spawned.
    #[error("Could not execute `{tool}` for shader compilation: {message}")]
    ToolchainSpawn { tool: String, message: String },

    // ========================================================================
    // Cache & Registry Errors
    // ========================================================================
    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The on-disk shader registry could not be parsed.
    #[error("Shader registry is invalid: {0}")]
    RegistryParse(#[from] serde_json::Error),

    // ========================================================================
    // Reflection Errors
    // ========================================================================
    /// A compiled binary could not be parsed as SPIR-V.
    #[error("Failed to parse SPIR-V for stage {stage}: {message}")]
    SpirvParse { stage: ShaderStage, message: String },

    /// Reflection data could not be encoded for the reflection cache.
    #[error("Failed to serialize reflection data: {0}")]
    ReflectionSerialize(String),

    /// Two different resource kinds claimed the same (set, binding) slot.
    #[error(
        "Descriptor binding collision in set {set}, binding {binding}: \
         {existing:?} vs {incoming:?} ({name})"
    )]
    BindingCollision {
        set: u32,
        binding: u32,
        existing: ResourceKind,
        incoming: ResourceKind,
        name: String,
    },
}

/// Alias for `Result<T, ShaderError>`.
pub type Result<T> = std::result::Result<T, ShaderError>;
