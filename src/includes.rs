//! Header / Include Resolver
//!
//! Resolves `#include` directives on behalf of the active compiler backend,
//! tracks include-once guards, and records per-header metadata for cache
//! invalidation.
//!
//! One [`IncludeHandler`] exists per stage translation unit: guard semantics
//! are about avoiding duplicate textual inclusion *within one translation*,
//! so guard-tracking state must never be shared across stages or across
//! concurrently reloading shaders.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::defines::harvest_special_macros;
use crate::errors::{Result, ShaderError};
use crate::hash;

/// Hard cap on include recursion; a header cycle would otherwise recurse
/// without bound since guards are content conventions, not guarantees.
pub const MAX_INCLUDE_DEPTH: usize = 64;

/// How an include was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeKind {
    /// `#include "file"` — resolved against the requesting file first.
    Relative,
    /// `#include <file>` — resolved against the search directories only.
    Standard,
}

/// Per-header metadata persisted into the shader registry.
///
/// Identity is the (path, hash) combination; depth and relativity are
/// informational and do not participate in equality, so a guarded header
/// seen from several include sites still yields a single record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderRecord {
    pub path: PathBuf,
    pub include_depth: u32,
    pub is_relative: bool,
    pub is_guarded: bool,
    pub hash: u32,
}

impl PartialEq for HeaderRecord {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.hash == other.hash
    }
}

impl Eq for HeaderRecord {}

impl PartialOrd for HeaderRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeaderRecord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.path, self.hash).cmp(&(&other.path, other.hash))
    }
}

/// Reads a source file, skipping a UTF-8 BOM if present.
pub(crate) fn read_source(path: &Path) -> io::Result<String> {
    let text = fs::read_to_string(path)?;
    Ok(match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}

/// Ordered include search paths, probed in sequence.
#[derive(Debug, Clone, Default)]
pub struct FileFinder {
    search_dirs: Vec<PathBuf>,
}

impl FileFinder {
    #[must_use]
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    /// Resolves an include name to an existing file, or `None` if no
    /// directory holds it. Relative includes probe the requester's own
    /// directory before the search paths.
    #[must_use]
    pub fn find(&self, name: &str, kind: IncludeKind, requester: &Path) -> Option<PathBuf> {
        if kind == IncludeKind::Relative {
            if let Some(parent) = requester.parent() {
                let candidate = parent.join(name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        self.search_dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
    }
}

/// Header content handed back to the backend, plus the path it resolved to.
#[derive(Debug)]
pub struct ResolvedHeader {
    pub path: PathBuf,
    /// Empty when the header is guarded and was already consumed in this
    /// translation unit (the physical include becomes a no-op).
    pub content: String,
}

struct CachedHeader {
    content: String,
    hash: u32,
    is_guarded: bool,
}

/// Per-translation-unit include state.
///
/// Owns the header cache (resolved path → content/hash/guard state), the
/// [`HeaderRecord`] set that ends up in the stage's registry entry, and the
/// special macros harvested from header text.
pub struct IncludeHandler {
    finder: FileFinder,
    header_cache: FxHashMap<PathBuf, CachedHeader>,
    records: BTreeSet<HeaderRecord>,
    special_macros: BTreeSet<String>,
}

impl IncludeHandler {
    #[must_use]
    pub fn new(finder: FileFinder) -> Self {
        Self {
            finder,
            header_cache: FxHashMap::default(),
            records: BTreeSet::new(),
            special_macros: BTreeSet::new(),
        }
    }

    /// Resolves one include directive.
    ///
    /// First encounter of a resolved path reads and preprocesses the header
    /// (guard detection, special-macro harvest). Later encounters of a
    /// guarded header return empty content while still emitting a record,
    /// so cache invalidation keeps seeing the dependency.
    pub fn resolve(
        &mut self,
        name: &str,
        kind: IncludeKind,
        requester: &Path,
        depth: usize,
    ) -> Result<ResolvedHeader> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(ShaderError::IncludeDepthExceeded {
                path: requester.to_path_buf(),
                depth,
            });
        }

        let Some(path) = self.finder.find(name, kind, requester) else {
            return Err(ShaderError::IncludeNotFound {
                name: name.to_string(),
                requester: requester.to_path_buf(),
            });
        };

        let (content, hash, is_guarded) = match self.header_cache.get(&path) {
            Some(header) => {
                let content = if header.is_guarded {
                    String::new()
                } else {
                    header.content.clone()
                };
                (content, header.hash, header.is_guarded)
            }
            None => {
                let source = read_source(&path)?;
                let source_hash = hash::fnv1a(&source);
                let (content, is_guarded) = strip_include_guard(&source);
                harvest_special_macros(&content, &mut self.special_macros);
                self.header_cache.insert(
                    path.clone(),
                    CachedHeader {
                        content: content.clone(),
                        hash: source_hash,
                        is_guarded,
                    },
                );
                (content, source_hash, is_guarded)
            }
        };

        self.records.insert(HeaderRecord {
            path: path.clone(),
            include_depth: depth as u32,
            is_relative: kind == IncludeKind::Relative,
            is_guarded,
            hash,
        });

        Ok(ResolvedHeader { path, content })
    }

    /// Drains the header records accumulated for this translation unit.
    pub fn take_records(&mut self) -> BTreeSet<HeaderRecord> {
        std::mem::take(&mut self.records)
    }

    /// Drains the special macros harvested from headers.
    pub fn take_special_macros(&mut self) -> BTreeSet<String> {
        std::mem::take(&mut self.special_macros)
    }
}

/// Detects a `#pragma once` guard and strips it from the text (the offline
/// compilers do not understand it; guard handling lives in the resolver).
fn strip_include_guard(source: &str) -> (String, bool) {
    let mut guarded = false;
    let mut out = String::with_capacity(source.len());
    for line in source.lines() {
        if line.trim() == "#pragma once" {
            guarded = true;
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    (out, guarded)
}
