//! Shader Macro Definition Set
//!
//! An ordered name→value macro set used for the renderer's global macros and
//! per-shader predefines. Kept sorted so that identical macro sets always
//! produce identical preprocessed text and therefore identical stage hashes.

/// Prefix that marks a macro as renderer-acknowledged.
///
/// Any conditional-compilation symbol starting with this prefix that the
/// preprocessor encounters is harvested into the shader's acknowledged-macro
/// set, so the renderer knows which global toggles select real variants of
/// this shader.
pub const SPECIAL_MACRO_PREFIX: &str = "__EMBER_";

/// A collection of shader macro definitions.
///
/// Internally an ordered `Vec<(String, String)>`; insertion keeps the set
/// sorted by name. An empty value means the macro is defined without a value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderMacros {
    defines: Vec<(String, String)>,
}

impl ShaderMacros {
    /// Create an empty macro set.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self { defines: Vec::new() }
    }

    /// Set a macro (maintains sorted order).
    ///
    /// If the name exists, updates its value; otherwise inserts a new entry.
    pub fn set(&mut self, name: &str, value: &str) {
        match self
            .defines
            .binary_search_by(|(k, _)| k.as_str().cmp(name))
        {
            Ok(idx) => self.defines[idx].1 = value.to_string(),
            Err(idx) => self
                .defines
                .insert(idx, (name.to_string(), value.to_string())),
        }
    }

    /// Get a macro's value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.defines
            .binary_search_by(|(k, _)| k.as_str().cmp(name))
            .ok()
            .map(|idx| self.defines[idx].1.as_str())
    }

    /// Check whether a macro is defined.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.defines
            .binary_search_by(|(k, _)| k.as_str().cmp(name))
            .is_ok()
    }

    /// Number of macros in the set.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.defines.len()
    }

    /// Check if empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }

    /// Iterate all macros in sorted order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defines.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge another set into this one; `other` wins on conflicts.
    pub fn merge(&mut self, other: &ShaderMacros) {
        for (name, value) in other.iter() {
            self.set(name, value);
        }
    }
}

/// Collects renderer-acknowledged macros from conditional-compilation lines.
///
/// Scans `#if` / `#ifdef` / `#ifndef` / `#elif` directives for identifiers
/// carrying [`SPECIAL_MACRO_PREFIX`] and inserts them into `out`.
pub fn harvest_special_macros(source: &str, out: &mut std::collections::BTreeSet<String>) {
    for line in source.lines() {
        let trimmed = line.trim_start();
        let Some(directive) = trimmed.strip_prefix('#') else {
            continue;
        };
        let directive = directive.trim_start();
        if !(directive.starts_with("if") || directive.starts_with("elif")) {
            continue;
        }
        let mut rest = directive;
        while let Some(start) = rest.find(SPECIAL_MACRO_PREFIX) {
            let candidate = &rest[start..];
            let end = candidate
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(candidate.len());
            out.insert(candidate[..end].to_string());
            rest = &candidate[end..];
        }
    }
}

impl From<&[(&str, &str)]> for ShaderMacros {
    fn from(defines: &[(&str, &str)]) -> Self {
        let mut result = Self::new();
        for (k, v) in defines {
            result.set(k, v);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut macros = ShaderMacros::new();
        macros.set("__EMBER_GPU_CULLING", "1");
        macros.set("MAX_POINT_LIGHTS", "16");

        assert!(macros.contains("__EMBER_GPU_CULLING"));
        assert_eq!(macros.get("MAX_POINT_LIGHTS"), Some("16"));
        assert_eq!(macros.get("UNDEFINED"), None);
    }

    #[test]
    fn insertion_keeps_sorted_order() {
        let mut macros = ShaderMacros::new();
        macros.set("B", "1");
        macros.set("A", "1");
        macros.set("C", "1");

        let names: Vec<_> = macros.iter().map(|(k, _)| k).collect();
        assert_eq!(names, ["A", "B", "C"]);
    }

    #[test]
    fn harvest_finds_prefixed_macros_in_directives() {
        let source = "\
#ifdef __EMBER_GPU_CULLING\n\
void cull() {}\n\
#elif defined(__EMBER_BINDLESS) || defined(__EMBER_RAY_QUERY)\n\
#endif\n\
// __EMBER_IN_COMMENT is not a directive\n";
        let mut out = std::collections::BTreeSet::new();
        harvest_special_macros(source, &mut out);
        let names: Vec<_> = out.iter().map(String::as_str).collect();
        assert_eq!(
            names,
            ["__EMBER_BINDLESS", "__EMBER_GPU_CULLING", "__EMBER_RAY_QUERY"]
        );
    }

    #[test]
    fn merge_overrides() {
        let mut a = ShaderMacros::from(&[("A", "1"), ("B", "2")][..]);
        let b = ShaderMacros::from(&[("B", "3"), ("C", "4")][..]);
        a.merge(&b);

        assert_eq!(a.get("A"), Some("1"));
        assert_eq!(a.get("B"), Some("3"));
        assert_eq!(a.get("C"), Some("4"));
    }
}
