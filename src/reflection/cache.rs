//! Reflection Cache
//!
//! One file per shader program: a 4-byte magic header followed by the
//! bincode-encoded [`ReflectionData`]. A wrong magic or an undecodable
//! payload is a cache miss, never an error — the caller re-reflects from
//! the binaries it already has. Changing the magic is the sanctioned way to
//! invalidate every reflection cache across incompatible tool versions.

use std::fs;
use std::path::{Path, PathBuf};

use crate::binary_cache::artifact_stem;
use crate::errors::{Result, ShaderError};

use super::ReflectionData;

const REFLECTION_MAGIC: [u8; 4] = *b"EBSR";

pub(crate) fn reflection_cache_path(
    cache_dir: &Path,
    source_path: &Path,
    entry_point: &str,
) -> PathBuf {
    cache_dir.join(format!(
        "{}.cached_vulkan.refl",
        artifact_stem(source_path, entry_point)
    ))
}

/// Reads cached reflection data, or `None` on any miss or mismatch.
pub fn read_cached(path: &Path) -> Option<ReflectionData> {
    let bytes = fs::read(path).ok()?;
    if bytes.len() < REFLECTION_MAGIC.len() || bytes[..4] != REFLECTION_MAGIC {
        log::warn!(
            "Reflection cache {} has a bad magic header, re-reflecting",
            path.display()
        );
        return None;
    }
    match bincode::serde::decode_from_slice(&bytes[4..], bincode::config::standard()) {
        Ok((data, _)) => Some(data),
        Err(err) => {
            log::warn!(
                "Reflection cache {} is undecodable ({err}), re-reflecting",
                path.display()
            );
            None
        }
    }
}

/// Writes reflection data, overwriting any previous cache file.
pub fn write_cached(path: &Path, data: &ReflectionData) -> Result<()> {
    let payload = bincode::serde::encode_to_vec(data, bincode::config::standard())
        .map_err(|err| ShaderError::ReflectionSerialize(err.to_string()))?;
    let mut bytes = Vec::with_capacity(REFLECTION_MAGIC.len() + payload.len());
    bytes.extend_from_slice(&REFLECTION_MAGIC);
    bytes.extend_from_slice(&payload);
    fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_magic_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid__main.glsl.cached_vulkan.refl");
        fs::write(&path, b"NOPE....").unwrap();
        assert!(read_cached(&path).is_none());
    }

    #[test]
    fn truncated_payload_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid__main.glsl.cached_vulkan.refl");
        fs::write(&path, b"EB").unwrap();
        assert!(read_cached(&path).is_none());
    }

    #[test]
    fn write_then_read_round_trips_empty_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid__main.glsl.cached_vulkan.refl");
        let data = ReflectionData::default();
        write_cached(&path, &data).unwrap();
        assert_eq!(read_cached(&path), Some(data));
    }

    #[test]
    fn cache_path_is_keyed_by_stem_entry_and_extension() {
        let path = reflection_cache_path(
            Path::new("cache"),
            Path::new("Resources/Shaders/PBR.glsl"),
            "main",
        );
        assert_eq!(
            path,
            Path::new("cache").join("PBR__main.glsl.cached_vulkan.refl")
        );
    }
}
