//! Shader Reflection
//!
//! The resource-binding model recovered from compiled SPIR-V: descriptor
//! sets with their typed binding maps, name-keyed resource declarations,
//! push-constant-backed buffers, and push-constant ranges. The renderer
//! consumes this to build descriptor-set layouts and write templates.
//!
//! Reflection for a program is rebuilt in full whenever any of its stages
//! recompiles: [`ReflectionData`] is cleared, every stage's debug binary is
//! re-enumerated through one [`ReflectContext`], and the merged result is
//! serialized to the reflection cache. Merging therefore only ever happens
//! within one reload.

mod cache;
mod extract;

pub use cache::{read_cached, write_cached};
pub(crate) use cache::reflection_cache_path;
pub(crate) use extract::reflect_stage;

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, ShaderError};
use crate::stage::StageFlags;

/// Which family of resource owns a binding slot. Used for the collision
/// diagnostic: within one descriptor set a binding number belongs to exactly
/// one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    UniformBuffer,
    StorageBuffer,
    ImageSampler,
    StorageImage,
    SeparateTexture,
    SeparateSampler,
    AccelerationStructure,
}

/// Renderer-facing category of a reflected resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    ImageSampler1D,
    ImageSampler2D,
    ImageSampler3D,
    StorageImage1D,
    StorageImage2D,
    StorageImage3D,
    AccelerationStructure,
}

/// Vulkan-style descriptor type for write-template construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptorType {
    UniformBuffer,
    StorageBuffer,
    CombinedImageSampler,
    SampledImage,
    Sampler,
    StorageImage,
    AccelerationStructure,
}

/// Scalar/vector/matrix classification of a push-constant member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShaderUniformType {
    Bool,
    Int,
    IVec2,
    IVec3,
    IVec4,
    UInt,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
    Struct,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniformBuffer {
    pub binding: u32,
    pub descriptor_set: u32,
    /// Declared struct size; across stages the maximum wins (stages may see
    /// different trailing-member visibility of the same buffer).
    pub size: u32,
    pub array_size: u32,
    pub name: String,
    pub stage_flags: StageFlags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageBuffer {
    pub binding: u32,
    pub descriptor_set: u32,
    pub size: u32,
    pub array_size: u32,
    pub name: String,
    pub stage_flags: StageFlags,
}

/// Shared record for every image-ish binding (combined samplers, separate
/// textures, separate samplers, storage images).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSampler {
    pub binding: u32,
    pub descriptor_set: u32,
    /// 1, 2 or 3, from the image dimension.
    pub dimension: u32,
    pub array_size: u32,
    pub name: String,
    pub stage_flags: StageFlags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccelerationStructure {
    pub binding: u32,
    pub descriptor_set: u32,
    pub array_size: u32,
    pub name: String,
    pub stage_flags: StageFlags,
}

/// One stage's push-constant block, offset-packed against the blocks of the
/// other stages of the same program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushConstantRange {
    pub stage_flags: StageFlags,
    pub offset: u32,
    pub size: u32,
}

/// A named member of a push-constant block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderUniform {
    pub name: String,
    pub ty: ShaderUniformType,
    pub size: u32,
    pub offset: u32,
}

/// A push-constant-backed buffer with its member table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderBuffer {
    pub name: String,
    pub size: u32,
    pub uniforms: BTreeMap<String, ShaderUniform>,
}

/// Name-keyed declaration of a bindable resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderResourceDeclaration {
    pub name: String,
    pub ty: ResourceType,
    pub set: u32,
    pub register: u32,
    pub count: u32,
}

/// Descriptor-write template metadata for one named resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorWrite {
    pub descriptor_type: DescriptorType,
    pub binding: u32,
    pub count: u32,
}

/// All bindings of one descriptor set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderDescriptorSet {
    pub uniform_buffers: BTreeMap<u32, UniformBuffer>,
    pub storage_buffers: BTreeMap<u32, StorageBuffer>,
    pub image_samplers: BTreeMap<u32, ImageSampler>,
    pub storage_images: BTreeMap<u32, ImageSampler>,
    pub separate_textures: BTreeMap<u32, ImageSampler>,
    pub separate_samplers: BTreeMap<u32, ImageSampler>,
    pub acceleration_structures: BTreeMap<u32, AccelerationStructure>,
    pub write_descriptors: BTreeMap<String, DescriptorWrite>,
    pub bindings: BTreeSet<u32>,
}

impl ShaderDescriptorSet {
    /// Whether the set holds any binding at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.uniform_buffers.is_empty()
            && self.storage_buffers.is_empty()
            && self.image_samplers.is_empty()
            && self.storage_images.is_empty()
            && self.separate_textures.is_empty()
            && self.separate_samplers.is_empty()
            && self.acceleration_structures.is_empty()
    }
}

/// The merged, program-wide reflection result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReflectionData {
    /// Indexed by descriptor-set number; grown, never shrunk.
    pub descriptor_sets: Vec<ShaderDescriptorSet>,
    pub resources: BTreeMap<String, ShaderResourceDeclaration>,
    pub constant_buffers: BTreeMap<String, ShaderBuffer>,
    pub push_constant_ranges: Vec<PushConstantRange>,
}

impl ReflectionData {
    /// Grows `descriptor_sets` to cover `set` and returns it mutably.
    pub(crate) fn set_mut(&mut self, set: u32) -> &mut ShaderDescriptorSet {
        let index = set as usize;
        if index >= self.descriptor_sets.len() {
            self.descriptor_sets.resize_with(index + 1, ShaderDescriptorSet::default);
        }
        &mut self.descriptor_sets[index]
    }
}

/// Per-reload merge state for reflection.
///
/// Buffers declared by several stages of one program are deduplicated here
/// (max size, OR'd stage mask). Created fresh per program reload and
/// discarded at the end — never shared across concurrently reflecting
/// programs.
#[derive(Debug, Default)]
pub struct ReflectContext {
    pub(crate) uniform_buffers: FxHashMap<(u32, u32), UniformBuffer>,
    pub(crate) storage_buffers: FxHashMap<(u32, u32), StorageBuffer>,
    pub(crate) acceleration_structures: FxHashMap<(u32, u32), AccelerationStructure>,
    binding_owners: FxHashMap<(u32, u32), ResourceKind>,
}

impl ReflectContext {
    /// Registers `kind` as the owner of (set, binding). A second kind
    /// claiming the same slot is a content error, surfaced as a structured
    /// diagnostic rather than a crash.
    pub(crate) fn claim(
        &mut self,
        set: u32,
        binding: u32,
        kind: ResourceKind,
        name: &str,
    ) -> Result<()> {
        match self.binding_owners.insert((set, binding), kind) {
            Some(existing) if existing != kind => Err(ShaderError::BindingCollision {
                set,
                binding,
                existing,
                incoming: kind,
                name: name.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Reflects a set of stage binaries into one merged [`ReflectionData`],
/// through a single fresh merge context.
pub fn reflect_stages<'a, I>(stages: I) -> Result<ReflectionData>
where
    I: IntoIterator<Item = (crate::stage::ShaderStage, &'a [u32])>,
{
    let mut data = ReflectionData::default();
    let mut ctx = ReflectContext::default();
    for (stage, words) in stages {
        reflect_stage(&mut data, &mut ctx, stage, words)?;
    }
    Ok(data)
}

pub(crate) fn resource_type_from_dimension(dimension: u32, sampled: bool) -> ResourceType {
    match (sampled, dimension) {
        (true, 1) => ResourceType::ImageSampler1D,
        (true, 3) => ResourceType::ImageSampler3D,
        (true, _) => ResourceType::ImageSampler2D,
        (false, 1) => ResourceType::StorageImage1D,
        (false, 3) => ResourceType::StorageImage3D,
        (false, _) => ResourceType::StorageImage2D,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_sets_grow_never_shrink() {
        let mut data = ReflectionData::default();
        data.set_mut(2).bindings.insert(0);
        assert_eq!(data.descriptor_sets.len(), 3);
        data.set_mut(0).bindings.insert(1);
        assert_eq!(data.descriptor_sets.len(), 3);
    }

    #[test]
    fn claim_detects_kind_collisions() {
        let mut ctx = ReflectContext::default();
        ctx.claim(0, 4, ResourceKind::UniformBuffer, "u_Camera").unwrap();
        // Same kind re-claim is a merge, not a collision.
        ctx.claim(0, 4, ResourceKind::UniformBuffer, "u_Camera").unwrap();
        let err = ctx
            .claim(0, 4, ResourceKind::StorageBuffer, "s_Lights")
            .unwrap_err();
        assert!(matches!(err, ShaderError::BindingCollision { set: 0, binding: 4, .. }));
    }
}
