//! Preprocessor & Include Resolver Tests
//!
//! Tests for:
//! - HLSL include expansion through the crate-side resolver
//! - Include-once guards: single body, single header record
//! - Header records: depth, relativity, nested includes
//! - Special-macro harvesting from sources and headers
//! - Recursion depth guard on cyclic headers

use std::fs;
use std::path::Path;

use ember_shaders::defines::ShaderMacros;
use ember_shaders::errors::ShaderError;
use ember_shaders::preprocessor::preprocess_shader;
use ember_shaders::stage::{ShaderStage, SourceLang};

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

fn preprocess_hlsl(dir: &Path, file: &str) -> ember_shaders::preprocessor::PreprocessedShader {
    let source = fs::read_to_string(dir.join(file)).unwrap();
    preprocess_shader(
        &source,
        &dir.join(file),
        SourceLang::Hlsl,
        &[dir.to_path_buf()],
        &ShaderMacros::new(),
    )
    .unwrap()
}

// ============================================================================
// Guard Semantics
// ============================================================================

#[test]
fn guarded_header_included_twice_expands_once() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "common.hlslh",
        "#pragma once\nfloat4 SharedColor() { return float4(1, 1, 1, 1); }\n",
    );
    write(
        dir.path(),
        "lit.hlsl",
        "#pragma stage : vert\n\
         #include \"common.hlslh\"\n\
         #include \"common.hlslh\"\n\
         float4 main() : SV_Position { return SharedColor(); }\n",
    );

    let result = preprocess_hlsl(dir.path(), "lit.hlsl");
    let vert = &result.sources[&ShaderStage::Vertex];
    assert_eq!(vert.matches("SharedColor() {").count(), 1);

    // Exactly one header record despite two include sites.
    let headers = &result.metadata[&ShaderStage::Vertex].headers;
    assert_eq!(headers.len(), 1);
    let record = headers.iter().next().unwrap();
    assert!(record.is_guarded);
    assert!(record.is_relative);
    assert_eq!(record.include_depth, 1);
}

#[test]
fn unguarded_header_included_twice_expands_twice() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "inc.hlslh", "static const float kPi = 3.14159;\n");
    write(
        dir.path(),
        "twice.hlsl",
        "#pragma stage : comp\n\
         #include \"inc.hlslh\"\n\
         #include \"inc.hlslh\"\n\
         [numthreads(8, 8, 1)] void main() {}\n",
    );

    let result = preprocess_hlsl(dir.path(), "twice.hlsl");
    let comp = &result.sources[&ShaderStage::Compute];
    assert_eq!(comp.matches("kPi").count(), 2);
    // Still one record: identity is path + hash.
    assert_eq!(result.metadata[&ShaderStage::Compute].headers.len(), 1);
}

// ============================================================================
// Nested Includes & Depth
// ============================================================================

#[test]
fn nested_includes_record_their_depth() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "leaf.hlslh", "float Leaf() { return 1.0; }\n");
    write(
        dir.path(),
        "mid.hlslh",
        "#include <leaf.hlslh>\nfloat Mid() { return Leaf(); }\n",
    );
    write(
        dir.path(),
        "deep.hlsl",
        "#pragma stage : frag\n\
         #include \"mid.hlslh\"\n\
         float4 main() : SV_Target { return float4(Mid().xxxx); }\n",
    );

    let result = preprocess_hlsl(dir.path(), "deep.hlsl");
    let frag = &result.sources[&ShaderStage::Fragment];
    assert!(frag.contains("float Leaf()"));
    assert!(frag.contains("float Mid()"));

    let headers = &result.metadata[&ShaderStage::Fragment].headers;
    assert_eq!(headers.len(), 2);
    let leaf = headers
        .iter()
        .find(|h| h.path.ends_with("leaf.hlslh"))
        .unwrap();
    let mid = headers
        .iter()
        .find(|h| h.path.ends_with("mid.hlslh"))
        .unwrap();
    assert_eq!(mid.include_depth, 1);
    assert_eq!(leaf.include_depth, 2);
    assert!(mid.is_relative);
    assert!(!leaf.is_relative);
}

#[test]
fn cyclic_headers_hit_the_depth_guard() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.hlslh", "#include \"b.hlslh\"\n");
    write(dir.path(), "b.hlslh", "#include \"a.hlslh\"\n");
    write(
        dir.path(),
        "cycle.hlsl",
        "#pragma stage : vert\n#include \"a.hlslh\"\nvoid main() {}\n",
    );

    let source = fs::read_to_string(dir.path().join("cycle.hlsl")).unwrap();
    let err = preprocess_shader(
        &source,
        &dir.path().join("cycle.hlsl"),
        SourceLang::Hlsl,
        &[dir.path().to_path_buf()],
        &ShaderMacros::new(),
    )
    .unwrap_err();
    assert!(matches!(err, ShaderError::IncludeDepthExceeded { .. }));
}

#[test]
fn unresolvable_include_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "missing.hlsl",
        "#pragma stage : vert\n#include \"nowhere.hlslh\"\nvoid main() {}\n",
    );

    let source = fs::read_to_string(dir.path().join("missing.hlsl")).unwrap();
    let err = preprocess_shader(
        &source,
        &dir.path().join("missing.hlsl"),
        SourceLang::Hlsl,
        &[dir.path().to_path_buf()],
        &ShaderMacros::new(),
    )
    .unwrap_err();
    match err {
        ShaderError::IncludeNotFound { name, .. } => assert_eq!(name, "nowhere.hlslh"),
        other => panic!("expected IncludeNotFound, got {other:?}"),
    }
}

// ============================================================================
// Acknowledged Macros
// ============================================================================

#[test]
fn special_macros_are_harvested_from_source_and_headers() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "skinning.hlslh",
        "#ifdef __EMBER_SKINNING\nfloat4x4 BoneTransform();\n#endif\n",
    );
    write(
        dir.path(),
        "mesh.hlsl",
        "#pragma stage : vert\n\
         #include \"skinning.hlslh\"\n\
         #if defined(__EMBER_MOTION_VECTORS)\n\
         float2 motion;\n\
         #endif\n\
         void main() {}\n",
    );

    let result = preprocess_hlsl(dir.path(), "mesh.hlsl");
    assert!(result.acknowledged_macros.contains("__EMBER_SKINNING"));
    assert!(result.acknowledged_macros.contains("__EMBER_MOTION_VECTORS"));
    // Non-prefixed conditionals are not acknowledged.
    assert_eq!(result.acknowledged_macros.len(), 2);
}

// ============================================================================
// Stage Hashing
// ============================================================================

#[test]
fn stage_hash_tracks_stage_text_not_header_text() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "inc.hlslh", "float A() { return 1.0; }\n");
    write(
        dir.path(),
        "hashed.hlsl",
        "#pragma stage : vert\n#include \"inc.hlslh\"\nvoid main() {}\n",
    );

    let first = preprocess_hlsl(dir.path(), "hashed.hlsl");

    // Header edit: stage hash stays put, header record hash moves.
    write(dir.path(), "inc.hlslh", "float A() { return 2.0; }\n");
    let second = preprocess_hlsl(dir.path(), "hashed.hlsl");

    let meta_a = &first.metadata[&ShaderStage::Vertex];
    let meta_b = &second.metadata[&ShaderStage::Vertex];
    assert_eq!(meta_a.hash, meta_b.hash);
    assert_ne!(
        meta_a.headers.iter().next().unwrap().hash,
        meta_b.headers.iter().next().unwrap().hash
    );
    assert_ne!(meta_a, meta_b);
}
