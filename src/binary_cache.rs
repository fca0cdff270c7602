//! Binary Cache
//!
//! On-disk store for compiled SPIR-V, one file per (source stem, entry
//! point, source extension, stage extension, debug flag). Writes overwrite
//! unconditionally; reads treat a missing or empty file as absent. There is
//! no integrity checksum beyond existence — the trust boundary is the local
//! filesystem.

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::Result;
use crate::stage::ShaderStage;

/// `<stem>__<entry><src_ext>` — the shared artifact prefix used by both the
/// binary cache and the reflection cache.
pub(crate) fn artifact_stem(source_path: &Path, entry_point: &str) -> String {
    let stem = source_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("shader");
    let src_ext = source_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    format!("{stem}__{entry_point}{src_ext}")
}

/// Handle to the per-stage SPIR-V blob store of one cache directory.
#[derive(Debug)]
pub struct BinaryCache {
    cache_dir: PathBuf,
}

impl BinaryCache {
    #[must_use]
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
        }
    }

    fn file_path(
        &self,
        source_path: &Path,
        entry_point: &str,
        stage: ShaderStage,
        debug: bool,
    ) -> PathBuf {
        let name = format!(
            "{}{}",
            artifact_stem(source_path, entry_point),
            stage.cached_file_extension(debug)
        );
        self.cache_dir.join(name)
    }

    /// Reads cached words, or `None` when the file is missing or empty.
    #[must_use]
    pub fn read(
        &self,
        source_path: &Path,
        entry_point: &str,
        stage: ShaderStage,
        debug: bool,
    ) -> Option<Vec<u32>> {
        let path = self.file_path(source_path, entry_point, stage, debug);
        let bytes = fs::read(path).ok()?;
        if bytes.len() < 4 {
            return None;
        }
        Some(words_from_bytes(&bytes))
    }

    /// Writes words, overwriting any previous artifact wholesale.
    pub fn write(
        &self,
        source_path: &Path,
        entry_point: &str,
        stage: ShaderStage,
        debug: bool,
        words: &[u32],
    ) -> Result<()> {
        let path = self.file_path(source_path, entry_point, stage, debug);
        fs::write(path, bytes_from_words(words))?;
        Ok(())
    }
}

pub(crate) fn words_from_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub(crate) fn bytes_from_words(words: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_stem_encodes_entry_and_extension() {
        assert_eq!(
            artifact_stem(Path::new("Resources/Shaders/PBR.glsl"), "main"),
            "PBR__main.glsl"
        );
        assert_eq!(
            artifact_stem(Path::new("Pathtracing.hlsl"), "RayGenMain"),
            "Pathtracing__RayGenMain.hlsl"
        );
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BinaryCache::new(dir.path());
        let source = Path::new("shaders/grid.glsl");
        let words = vec![0x0723_0203, 0x0001_0500, 42];

        cache
            .write(source, "main", ShaderStage::Vertex, false, &words)
            .unwrap();
        assert_eq!(
            cache.read(source, "main", ShaderStage::Vertex, false),
            Some(words)
        );
    }

    #[test]
    fn debug_and_release_variants_are_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BinaryCache::new(dir.path());
        let source = Path::new("shaders/grid.glsl");

        cache
            .write(source, "main", ShaderStage::Fragment, true, &[1])
            .unwrap();
        assert!(cache.read(source, "main", ShaderStage::Fragment, false).is_none());
        assert_eq!(
            cache.read(source, "main", ShaderStage::Fragment, true),
            Some(vec![1])
        );
    }

    #[test]
    fn missing_and_empty_files_read_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BinaryCache::new(dir.path());
        let source = Path::new("shaders/grid.glsl");

        assert!(cache.read(source, "main", ShaderStage::Compute, false).is_none());

        let path = dir.path().join("grid__main.glsl.cached_vulkan.comp");
        fs::write(path, []).unwrap();
        assert!(cache.read(source, "main", ShaderStage::Compute, false).is_none());
    }
}
