//! Shader Registry
//!
//! The persisted mapping from shader source path to per-stage cache identity
//! (content hash + header set). This file is the single source of truth for
//! "does this stage need the expensive backend compiler", kept separate from
//! the binary cache so a header-only edit is detected purely from hashes.
//!
//! The registry is read fully, mutated, and rewritten fully — that cycle is
//! a critical section: concurrent reloads racing on the file would silently
//! lose each other's stage updates, so the whole read-modify-write runs
//! under a process-wide mutex and the rewrite goes through a temp file plus
//! atomic rename.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::includes::HeaderRecord;
use crate::stage::{ShaderStage, StageFlags};

/// Registry file name inside the cache directory.
const REGISTRY_FILE: &str = "ShaderRegistry.cache";

/// Bump to invalidate every cached stage across tool versions.
const REGISTRY_VERSION: u32 = 1;

static REGISTRY_LOCK: Mutex<()> = Mutex::new(());

/// One stage's cache identity.
///
/// Structural equality (hash + header-set equality) decides whether the
/// stage needs recompilation. Entries are overwritten wholesale on change,
/// never partially mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageData {
    pub hash: u32,
    pub headers: std::collections::BTreeSet<HeaderRecord>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDoc {
    version: u32,
    /// source path → stage token → stage identity
    shaders: BTreeMap<String, BTreeMap<String, StageData>>,
}

/// Handle to the on-disk registry of one cache directory.
#[derive(Debug)]
pub struct ShaderRegistry {
    path: PathBuf,
}

impl ShaderRegistry {
    #[must_use]
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            path: cache_dir.join(REGISTRY_FILE),
        }
    }

    /// Compares `current` against the stored entry for `source_path` and
    /// returns the mask of stages needing recompilation. A path the registry
    /// has never seen reports every stage as changed. The registry is
    /// rewritten (path node replaced wholesale) whenever anything changed,
    /// which also drops entries for stages deleted from the file.
    pub fn has_changed(
        &self,
        source_path: &Path,
        current: &BTreeMap<ShaderStage, StageData>,
    ) -> Result<StageFlags> {
        let _guard = REGISTRY_LOCK.lock();

        let mut doc = self.load();
        let key = source_path.to_string_lossy().into_owned();
        let known = doc.shaders.get(&key);

        let mut changed = StageFlags::empty();
        for (stage, data) in current {
            let prior = known.and_then(|stages| stages.get(stage.token()));
            if prior != Some(data) {
                changed |= StageFlags::from(*stage);
            }
        }

        if !changed.is_empty() {
            let entry = current
                .iter()
                .map(|(stage, data)| (stage.token().to_string(), data.clone()))
                .collect();
            doc.shaders.insert(key, entry);
            self.store(&doc)?;
        }

        Ok(changed)
    }

    /// Loads the registry document; missing, unreadable, corrupt or
    /// version-mismatched files degrade to an empty registry (every stage
    /// then reads as changed, which is the safe direction).
    fn load(&self) -> RegistryDoc {
        let Ok(text) = fs::read_to_string(&self.path) else {
            return RegistryDoc {
                version: REGISTRY_VERSION,
                ..RegistryDoc::default()
            };
        };
        match serde_json::from_str::<RegistryDoc>(&text) {
            Ok(doc) if doc.version == REGISTRY_VERSION => doc,
            Ok(doc) => {
                log::warn!(
                    "Shader registry version {} != {}, discarding cached stage data",
                    doc.version,
                    REGISTRY_VERSION
                );
                RegistryDoc {
                    version: REGISTRY_VERSION,
                    ..RegistryDoc::default()
                }
            }
            Err(err) => {
                log::error!("Shader registry is invalid ({err}), discarding");
                RegistryDoc {
                    version: REGISTRY_VERSION,
                    ..RegistryDoc::default()
                }
            }
        }
    }

    fn store(&self, doc: &RegistryDoc) -> Result<()> {
        let text = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("cache.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
