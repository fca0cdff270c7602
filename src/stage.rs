//! Shader Stage Model
//!
//! Pipeline stage enumeration, the stage bitmask used for change tracking
//! and reflection stage-masks, and the per-stage conversion tables (pragma
//! tokens, injected stage macros, cache-file extensions, backend targets).

use std::fmt;
use std::path::Path;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, ShaderError};

/// One programmable pipeline stage.
///
/// Ordering matters: stages are kept in `BTreeMap`s so that compilation,
/// registry entries and push-constant packing are deterministic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
    RayGen,
    AnyHit,
    ClosestHit,
    Miss,
    Intersection,
    Callable,
}

bitflags! {
    /// Bitmask over [`ShaderStage`], mirroring `VkShaderStageFlagBits`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct StageFlags: u32 {
        const VERTEX       = 1 << 0;
        const FRAGMENT     = 1 << 1;
        const COMPUTE      = 1 << 2;
        const RAY_GEN      = 1 << 3;
        const ANY_HIT      = 1 << 4;
        const CLOSEST_HIT  = 1 << 5;
        const MISS         = 1 << 6;
        const INTERSECTION = 1 << 7;
        const CALLABLE     = 1 << 8;
    }
}

impl From<ShaderStage> for StageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => StageFlags::VERTEX,
            ShaderStage::Fragment => StageFlags::FRAGMENT,
            ShaderStage::Compute => StageFlags::COMPUTE,
            ShaderStage::RayGen => StageFlags::RAY_GEN,
            ShaderStage::AnyHit => StageFlags::ANY_HIT,
            ShaderStage::ClosestHit => StageFlags::CLOSEST_HIT,
            ShaderStage::Miss => StageFlags::MISS,
            ShaderStage::Intersection => StageFlags::INTERSECTION,
            ShaderStage::Callable => StageFlags::CALLABLE,
        }
    }
}

impl ShaderStage {
    /// All stages, in compilation order.
    pub const ALL: [ShaderStage; 9] = [
        ShaderStage::Vertex,
        ShaderStage::Fragment,
        ShaderStage::Compute,
        ShaderStage::RayGen,
        ShaderStage::AnyHit,
        ShaderStage::ClosestHit,
        ShaderStage::Miss,
        ShaderStage::Intersection,
        ShaderStage::Callable,
    ];

    /// Parses a `#pragma stage : <token>` token.
    ///
    /// Accepts `rint` as an alias for the intersection stage.
    pub fn from_pragma_token(token: &str) -> Result<Self> {
        match token {
            "vert" => Ok(ShaderStage::Vertex),
            "frag" => Ok(ShaderStage::Fragment),
            "comp" => Ok(ShaderStage::Compute),
            "rgen" => Ok(ShaderStage::RayGen),
            "ahit" => Ok(ShaderStage::AnyHit),
            "chit" => Ok(ShaderStage::ClosestHit),
            "miss" => Ok(ShaderStage::Miss),
            "sect" | "rint" => Ok(ShaderStage::Intersection),
            "call" => Ok(ShaderStage::Callable),
            other => Err(ShaderError::UnknownStage(other.to_string())),
        }
    }

    /// The short stage token used in pragmas, logs and the registry file.
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Fragment => "frag",
            ShaderStage::Compute => "comp",
            ShaderStage::RayGen => "rgen",
            ShaderStage::AnyHit => "ahit",
            ShaderStage::ClosestHit => "chit",
            ShaderStage::Miss => "miss",
            ShaderStage::Intersection => "sect",
            ShaderStage::Callable => "call",
        }
    }

    /// The stage marker macro injected while preprocessing this stage's text.
    #[must_use]
    pub fn stage_macro(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "__VERTEX_STAGE__",
            ShaderStage::Fragment => "__FRAGMENT_STAGE__",
            ShaderStage::Compute => "__COMPUTE_STAGE__",
            ShaderStage::RayGen => "__RAYGEN_STAGE__",
            ShaderStage::AnyHit => "__ANY_HIT_STAGE__",
            ShaderStage::ClosestHit => "__CLOSEST_HIT_STAGE__",
            ShaderStage::Miss => "__MISS_STAGE__",
            ShaderStage::Intersection => "__INTERSECTION_STAGE__",
            ShaderStage::Callable => "__CALLABLE_STAGE__",
        }
    }

    /// File extension suffix for binary-cache files of this stage.
    #[must_use]
    pub fn cached_file_extension(self, debug: bool) -> String {
        if debug {
            format!(".cached_vulkan_debug.{}", self.token())
        } else {
            format!(".cached_vulkan.{}", self.token())
        }
    }

    /// Backend shader kind for the GLSL compiler.
    #[must_use]
    pub fn shaderc_kind(self) -> shaderc::ShaderKind {
        match self {
            ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
            ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
            ShaderStage::Compute => shaderc::ShaderKind::Compute,
            ShaderStage::RayGen => shaderc::ShaderKind::RayGeneration,
            ShaderStage::AnyHit => shaderc::ShaderKind::AnyHit,
            ShaderStage::ClosestHit => shaderc::ShaderKind::ClosestHit,
            ShaderStage::Miss => shaderc::ShaderKind::Miss,
            ShaderStage::Intersection => shaderc::ShaderKind::Intersection,
            ShaderStage::Callable => shaderc::ShaderKind::Callable,
        }
    }

    /// HLSL target profile for the offline compiler.
    ///
    /// Ray-tracing substages escalate to the library profile, which is the
    /// only profile that can hold them.
    #[must_use]
    pub fn hlsl_profile(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs_6_0",
            ShaderStage::Fragment => "ps_6_0",
            ShaderStage::Compute => "cs_6_0",
            ShaderStage::RayGen
            | ShaderStage::AnyHit
            | ShaderStage::ClosestHit
            | ShaderStage::Miss
            | ShaderStage::Intersection
            | ShaderStage::Callable => "lib_6_3",
        }
    }

    /// Whether this stage runs in the vertex-processing part of the pipeline
    /// (these get the clip-space Y flip under the HLSL backend).
    #[must_use]
    pub fn is_vertex_pipeline(self) -> bool {
        matches!(self, ShaderStage::Vertex)
    }

    /// Whether this stage is a ray-tracing substage.
    #[must_use]
    pub fn is_ray_tracing(self) -> bool {
        matches!(
            self,
            ShaderStage::RayGen
                | ShaderStage::AnyHit
                | ShaderStage::ClosestHit
                | ShaderStage::Miss
                | ShaderStage::Intersection
                | ShaderStage::Callable
        )
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Source language of a shader file, inferred from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLang {
    Glsl,
    Hlsl,
}

impl SourceLang {
    /// Infers the language from a source path's extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        match ext {
            "glsl" => Ok(SourceLang::Glsl),
            "hlsl" => Ok(SourceLang::Hlsl),
            other => Err(ShaderError::UnknownExtension(other.to_string())),
        }
    }

    /// The language marker macro injected during preprocessing.
    #[must_use]
    pub fn lang_macro(self) -> &'static str {
        match self {
            SourceLang::Glsl => "__GLSL__",
            SourceLang::Hlsl => "__HLSL__",
        }
    }
}
