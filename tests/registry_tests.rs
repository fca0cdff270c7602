//! Shader Registry Tests
//!
//! Tests for:
//! - No false negative: identical source + headers ⇒ empty change mask
//! - Invalidation propagation: editing a depth-2 header flags the stage
//! - Stage addition and per-stage change isolation

use std::fs;
use std::path::Path;

use ember_shaders::defines::ShaderMacros;
use ember_shaders::preprocessor::preprocess_shader;
use ember_shaders::registry::ShaderRegistry;
use ember_shaders::stage::{SourceLang, StageFlags};

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

fn stage_metadata(
    dir: &Path,
    file: &str,
) -> std::collections::BTreeMap<ember_shaders::ShaderStage, ember_shaders::registry::StageData> {
    let source = fs::read_to_string(dir.join(file)).unwrap();
    preprocess_shader(
        &source,
        &dir.join(file),
        SourceLang::Hlsl,
        &[dir.to_path_buf()],
        &ShaderMacros::new(),
    )
    .unwrap()
    .metadata
}

#[test]
fn identical_inputs_report_no_change() {
    let shaders = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write(shaders.path(), "inc.hlslh", "float A() { return 1.0; }\n");
    write(
        shaders.path(),
        "stable.hlsl",
        "#pragma stage : vert\n#include \"inc.hlslh\"\nvoid main() {}\n",
    );

    let registry = ShaderRegistry::new(cache.path());
    let source_path = shaders.path().join("stable.hlsl");

    let meta = stage_metadata(shaders.path(), "stable.hlsl");
    let first = registry.has_changed(&source_path, &meta).unwrap();
    assert_eq!(first, StageFlags::VERTEX);

    // Re-preprocess byte-identical inputs: nothing changed, nothing rewritten.
    let registry_file = cache.path().join("ShaderRegistry.cache");
    let before = fs::read_to_string(&registry_file).unwrap();
    let meta = stage_metadata(shaders.path(), "stable.hlsl");
    let second = registry.has_changed(&source_path, &meta).unwrap();
    assert!(second.is_empty());
    assert_eq!(fs::read_to_string(&registry_file).unwrap(), before);
}

#[test]
fn editing_a_deeply_nested_header_invalidates_the_stage() {
    let shaders = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write(shaders.path(), "level2.hlslh", "float Deep() { return 1.0; }\n");
    write(shaders.path(), "level1.hlslh", "#include \"level2.hlslh\"\n");
    write(
        shaders.path(),
        "top.hlsl",
        "#pragma stage : frag\n\
         #include \"level1.hlslh\"\n\
         float4 main() : SV_Target { return float4(Deep().xxxx); }\n",
    );

    let registry = ShaderRegistry::new(cache.path());
    let source_path = shaders.path().join("top.hlsl");

    let meta = stage_metadata(shaders.path(), "top.hlsl");
    registry.has_changed(&source_path, &meta).unwrap();

    // Only the depth-2 header changes; the top-level source is untouched.
    write(shaders.path(), "level2.hlslh", "float Deep() { return 2.0; }\n");
    let meta = stage_metadata(shaders.path(), "top.hlsl");
    let changed = registry.has_changed(&source_path, &meta).unwrap();
    assert_eq!(changed, StageFlags::FRAGMENT);

    // And it settles again afterwards.
    let meta = stage_metadata(shaders.path(), "top.hlsl");
    assert!(registry.has_changed(&source_path, &meta).unwrap().is_empty());
}

#[test]
fn adding_a_stage_flags_only_the_new_stage() {
    let shaders = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write(
        shaders.path(),
        "grow.hlsl",
        "#pragma stage : vert\nvoid main() {}\n",
    );

    let registry = ShaderRegistry::new(cache.path());
    let source_path = shaders.path().join("grow.hlsl");
    let meta = stage_metadata(shaders.path(), "grow.hlsl");
    registry.has_changed(&source_path, &meta).unwrap();

    write(
        shaders.path(),
        "grow.hlsl",
        "#pragma stage : vert\nvoid main() {}\n\
         #pragma stage : frag\nfloat4 main() : SV_Target { return 1.0.xxxx; }\n",
    );
    let meta = stage_metadata(shaders.path(), "grow.hlsl");
    let changed = registry.has_changed(&source_path, &meta).unwrap();
    assert_eq!(changed, StageFlags::FRAGMENT);
}
