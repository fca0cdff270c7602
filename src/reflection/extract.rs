//! SPIR-V Reflection Extractor
//!
//! Statically analyzes one stage's debug binary and merges its resources
//! into the program-wide [`ReflectionData`]. Uniform buffers with no live
//! reference in the stage are skipped — headers routinely pull in buffer
//! declarations a given stage never touches, and those must not pollute the
//! descriptor layout. Raw byte-address buffers are exempt from that
//! analysis: they are accessed through pointer arithmetic the reference
//! scan cannot see.

use rustc_hash::{FxHashMap, FxHashSet};

use rspirv::dr::{self, Instruction, Module, Operand};
use rspirv::spirv::{Decoration, Dim, Op, StorageClass, Word};

use crate::errors::{Result, ShaderError};
use crate::stage::{ShaderStage, StageFlags};

use super::{
    resource_type_from_dimension, AccelerationStructure, DescriptorType, DescriptorWrite,
    PushConstantRange, ReflectContext, ReflectionData, ResourceKind, ResourceType,
    ShaderResourceDeclaration, ShaderUniform, ShaderUniformType, StorageBuffer, UniformBuffer,
};

/// Storage buffers with this name bypass the live-reference analysis.
const BYTE_ADDRESS_BUFFER_NAME: &str = "ByteAddrBuffer";

/// Renderer-internal push-constant block, excluded from the uniform tables.
const RENDERER_PUSH_CONSTANT_BLOCK: &str = "u_Renderer";

fn align16(value: u32) -> u32 {
    ((value + 15) / 16) * 16
}

/// Reflects one stage's binary into `data`, merging through `ctx`.
pub(crate) fn reflect_stage(
    data: &mut ReflectionData,
    ctx: &mut ReflectContext,
    stage: ShaderStage,
    words: &[u32],
) -> Result<()> {
    let module = dr::load_words(words).map_err(|err| ShaderError::SpirvParse {
        stage,
        message: format!("{err:?}"),
    })?;
    let info = ModuleInfo::new(&module);
    let stage_flag = StageFlags::from(stage);

    log::trace!("Shader reflection, stage: {stage}");

    for inst in &module.types_global_values {
        if inst.class.opcode != Op::Variable {
            continue;
        }
        let Some(var_id) = inst.result_id else { continue };
        let Some(ptr_ty) = inst.result_type else { continue };
        let Some((storage_class, pointee)) = info.pointee(ptr_ty) else {
            continue;
        };

        match storage_class {
            StorageClass::Uniform => {
                let (base, _) = info.strip_arrays(pointee);
                // Pre-1.3 modules mark storage buffers as Uniform+BufferBlock.
                if info.buffer_blocks.contains(&base) {
                    reflect_storage_buffer(data, ctx, &info, stage_flag, var_id, pointee)?;
                } else {
                    reflect_uniform_buffer(data, ctx, &info, stage_flag, var_id, pointee)?;
                }
            }
            StorageClass::StorageBuffer => {
                reflect_storage_buffer(data, ctx, &info, stage_flag, var_id, pointee)?;
            }
            StorageClass::PushConstant => {
                reflect_push_constant(data, &info, stage_flag, var_id, pointee);
            }
            StorageClass::UniformConstant => {
                reflect_opaque_resource(data, ctx, &info, stage_flag, var_id, pointee)?;
            }
            _ => {}
        }
    }

    Ok(())
}

// ─── Buffers ──────────────────────────────────────────────────────────────────

fn reflect_uniform_buffer(
    data: &mut ReflectionData,
    ctx: &mut ReflectContext,
    info: &ModuleInfo<'_>,
    stage_flag: StageFlags,
    var_id: Word,
    pointee: Word,
) -> Result<()> {
    let (base, array_size) = info.strip_arrays(pointee);
    // Discard buffers pulled in from headers but never referenced.
    if !info.live.contains(&var_id) {
        return Ok(());
    }

    let name = info.resource_name(var_id, base);
    let binding = info.binding(var_id);
    let set = info.descriptor_set(var_id);
    let size = info.type_size(base);

    let entry = ctx
        .uniform_buffers
        .entry((set, binding))
        .or_insert_with(|| UniformBuffer {
            binding,
            descriptor_set: set,
            size,
            array_size: array_size.max(1),
            name: name.clone(),
            stage_flags: StageFlags::empty(),
        });
    if size > entry.size {
        entry.size = size;
    }
    entry.stage_flags |= stage_flag;
    let entry = entry.clone();

    ctx.claim(set, binding, ResourceKind::UniformBuffer, &name)?;
    let set_data = data.set_mut(set);
    set_data.bindings.insert(binding);
    set_data.write_descriptors.insert(
        name.clone(),
        DescriptorWrite {
            descriptor_type: DescriptorType::UniformBuffer,
            binding,
            count: entry.array_size,
        },
    );
    log::trace!("  uniform buffer {name} ({set}, {binding}), size {size}");
    set_data.uniform_buffers.insert(binding, entry);
    Ok(())
}

fn reflect_storage_buffer(
    data: &mut ReflectionData,
    ctx: &mut ReflectContext,
    info: &ModuleInfo<'_>,
    stage_flag: StageFlags,
    var_id: Word,
    pointee: Word,
) -> Result<()> {
    let (base, array_size) = info.strip_arrays(pointee);
    let name = info.resource_name(var_id, base);
    // Byte-address buffers are read through pointer arithmetic that the
    // reference scan cannot attribute, so they always count as live.
    if name != BYTE_ADDRESS_BUFFER_NAME && !info.live.contains(&var_id) {
        return Ok(());
    }

    let binding = info.binding(var_id);
    let set = info.descriptor_set(var_id);
    let size = info.type_size(base);

    let entry = ctx
        .storage_buffers
        .entry((set, binding))
        .or_insert_with(|| StorageBuffer {
            binding,
            descriptor_set: set,
            size,
            array_size: array_size.max(1),
            name: name.clone(),
            stage_flags: StageFlags::empty(),
        });
    if size > entry.size {
        entry.size = size;
    }
    entry.stage_flags |= stage_flag;
    let entry = entry.clone();

    ctx.claim(set, binding, ResourceKind::StorageBuffer, &name)?;
    let set_data = data.set_mut(set);
    set_data.bindings.insert(binding);
    set_data.write_descriptors.insert(
        name.clone(),
        DescriptorWrite {
            descriptor_type: DescriptorType::StorageBuffer,
            binding,
            count: entry.array_size,
        },
    );
    log::trace!("  storage buffer {name} ({set}, {binding}), size {size}");
    set_data.storage_buffers.insert(binding, entry);
    Ok(())
}

// ─── Push constants ───────────────────────────────────────────────────────────

fn reflect_push_constant(
    data: &mut ReflectionData,
    info: &ModuleInfo<'_>,
    stage_flag: StageFlags,
    var_id: Word,
    pointee: Word,
) {
    let name = info.resource_name(var_id, pointee);
    let buffer_size = align16(info.type_size(pointee));

    // Blocks shared between stages keep their original base offset; new
    // blocks pack after the 16-byte-aligned end of the previous range.
    let already_reflected = data.constant_buffers.contains_key(&name);
    let mut buffer_offset = 0;
    if let Some(last) = data.push_constant_ranges.last() {
        if !already_reflected {
            buffer_offset = last.offset + last.size;
        }
    }

    data.push_constant_ranges.push(PushConstantRange {
        stage_flags: stage_flag,
        offset: buffer_offset,
        size: buffer_size.saturating_sub(buffer_offset),
    });

    // The renderer-only block never enters the uniform tables.
    if name.is_empty() || name == RENDERER_PUSH_CONSTANT_BLOCK {
        return;
    }

    let buffer = data.constant_buffers.entry(name.clone()).or_default();
    buffer.name = name.clone();
    buffer.size = buffer_size.saturating_sub(buffer_offset);

    for (index, member_ty) in info.struct_members(pointee).iter().enumerate() {
        let index = index as u32;
        let member_name = info
            .member_names
            .get(&(pointee, index))
            .cloned()
            .unwrap_or_default();
        let qualified = format!("{name}.{member_name}");
        let offset = info
            .member_offsets
            .get(&(pointee, index))
            .copied()
            .unwrap_or(0)
            .saturating_sub(buffer_offset);
        buffer.uniforms.insert(
            qualified.clone(),
            ShaderUniform {
                name: qualified,
                ty: info.uniform_type(*member_ty),
                size: info.type_size(*member_ty),
                offset,
            },
        );
    }
    log::trace!("  push constants {name}, size {}", buffer.size);
}

// ─── Opaque resources (images, samplers, acceleration structures) ─────────────

fn reflect_opaque_resource(
    data: &mut ReflectionData,
    ctx: &mut ReflectContext,
    info: &ModuleInfo<'_>,
    stage_flag: StageFlags,
    var_id: Word,
    pointee: Word,
) -> Result<()> {
    let (base, array_size) = info.strip_arrays(pointee);
    let array_size = array_size.max(1);
    let Some(base_inst) = info.types.get(&base) else {
        return Ok(());
    };

    match base_inst.class.opcode {
        Op::TypeSampledImage => {
            let image_ty = operand_id(&base_inst.operands[0]).unwrap_or(0);
            let dimension = info.image_dimension(image_ty);
            reflect_image(
                data,
                ctx,
                info,
                stage_flag,
                var_id,
                ImageClass::Combined,
                dimension,
                array_size,
            )
        }
        Op::TypeImage => {
            let dimension = info.image_dimension(base);
            let class = if info.image_is_sampled(base) {
                ImageClass::SeparateTexture
            } else {
                ImageClass::Storage
            };
            reflect_image(data, ctx, info, stage_flag, var_id, class, dimension, array_size)
        }
        Op::TypeSampler => reflect_image(
            data,
            ctx,
            info,
            stage_flag,
            var_id,
            ImageClass::SeparateSampler,
            2,
            array_size,
        ),
        Op::TypeAccelerationStructureKHR => {
            reflect_acceleration_structure(data, ctx, info, stage_flag, var_id, array_size)
        }
        _ => Ok(()),
    }
}

#[derive(Clone, Copy)]
enum ImageClass {
    Combined,
    SeparateTexture,
    SeparateSampler,
    Storage,
}

#[allow(clippy::too_many_arguments)]
fn reflect_image(
    data: &mut ReflectionData,
    ctx: &mut ReflectContext,
    info: &ModuleInfo<'_>,
    stage_flag: StageFlags,
    var_id: Word,
    class: ImageClass,
    dimension: u32,
    array_size: u32,
) -> Result<()> {
    let name = info.resource_name(var_id, var_id);
    let binding = info.binding(var_id);
    let set = info.descriptor_set(var_id);

    let (kind, descriptor_type, resource_type) = match class {
        ImageClass::Combined => (
            ResourceKind::ImageSampler,
            DescriptorType::CombinedImageSampler,
            resource_type_from_dimension(dimension, true),
        ),
        ImageClass::SeparateTexture => (
            ResourceKind::SeparateTexture,
            DescriptorType::SampledImage,
            resource_type_from_dimension(dimension, true),
        ),
        ImageClass::SeparateSampler => (
            ResourceKind::SeparateSampler,
            DescriptorType::Sampler,
            resource_type_from_dimension(dimension, true),
        ),
        ImageClass::Storage => (
            ResourceKind::StorageImage,
            DescriptorType::StorageImage,
            resource_type_from_dimension(dimension, false),
        ),
    };

    ctx.claim(set, binding, kind, &name)?;
    let set_data = data.set_mut(set);
    let map = match class {
        ImageClass::Combined => &mut set_data.image_samplers,
        ImageClass::SeparateTexture => &mut set_data.separate_textures,
        ImageClass::SeparateSampler => &mut set_data.separate_samplers,
        ImageClass::Storage => &mut set_data.storage_images,
    };
    let entry = map.entry(binding).or_default();
    entry.binding = binding;
    entry.descriptor_set = set;
    entry.dimension = dimension;
    entry.array_size = array_size;
    entry.name = name.clone();
    entry.stage_flags |= stage_flag;

    set_data.bindings.insert(binding);
    set_data.write_descriptors.insert(
        name.clone(),
        DescriptorWrite {
            descriptor_type,
            binding,
            count: array_size,
        },
    );

    data.resources.insert(
        name.clone(),
        ShaderResourceDeclaration {
            name: name.clone(),
            ty: resource_type,
            set,
            register: binding,
            count: array_size,
        },
    );
    log::trace!("  image resource {name} ({set}, {binding})");
    Ok(())
}

fn reflect_acceleration_structure(
    data: &mut ReflectionData,
    ctx: &mut ReflectContext,
    info: &ModuleInfo<'_>,
    stage_flag: StageFlags,
    var_id: Word,
    array_size: u32,
) -> Result<()> {
    let name = info.resource_name(var_id, var_id);
    let binding = info.binding(var_id);
    let set = info.descriptor_set(var_id);

    let entry = ctx
        .acceleration_structures
        .entry((set, binding))
        .or_insert_with(|| AccelerationStructure {
            binding,
            descriptor_set: set,
            array_size,
            name: name.clone(),
            stage_flags: StageFlags::empty(),
        });
    entry.stage_flags |= stage_flag;
    let entry = entry.clone();

    ctx.claim(set, binding, ResourceKind::AccelerationStructure, &name)?;
    let set_data = data.set_mut(set);
    set_data.bindings.insert(binding);
    set_data.write_descriptors.insert(
        name.clone(),
        DescriptorWrite {
            descriptor_type: DescriptorType::AccelerationStructure,
            binding,
            count: entry.array_size,
        },
    );
    set_data.acceleration_structures.insert(binding, entry);

    data.resources.insert(
        name.clone(),
        ShaderResourceDeclaration {
            name: name.clone(),
            ty: ResourceType::AccelerationStructure,
            set,
            register: binding,
            count: array_size,
        },
    );
    log::trace!("  acceleration structure {name} ({set}, {binding})");
    Ok(())
}

// ─── Module indexing ──────────────────────────────────────────────────────────

/// Pre-indexed view over one SPIR-V module: names, decorations, type
/// instructions, scalar constants, and the set of ids referenced from
/// function bodies (the live set).
struct ModuleInfo<'a> {
    names: FxHashMap<Word, String>,
    member_names: FxHashMap<(Word, u32), String>,
    bindings: FxHashMap<Word, u32>,
    descriptor_sets: FxHashMap<Word, u32>,
    buffer_blocks: FxHashSet<Word>,
    array_strides: FxHashMap<Word, u32>,
    member_offsets: FxHashMap<(Word, u32), u32>,
    types: FxHashMap<Word, &'a Instruction>,
    constants: FxHashMap<Word, u32>,
    live: FxHashSet<Word>,
}

impl<'a> ModuleInfo<'a> {
    fn new(module: &'a Module) -> Self {
        let mut info = ModuleInfo {
            names: FxHashMap::default(),
            member_names: FxHashMap::default(),
            bindings: FxHashMap::default(),
            descriptor_sets: FxHashMap::default(),
            buffer_blocks: FxHashSet::default(),
            array_strides: FxHashMap::default(),
            member_offsets: FxHashMap::default(),
            types: FxHashMap::default(),
            constants: FxHashMap::default(),
            live: FxHashSet::default(),
        };

        for inst in &module.debug_names {
            match inst.class.opcode {
                Op::Name => {
                    if let (Some(target), Some(name)) =
                        (operand_id(&inst.operands[0]), operand_string(&inst.operands[1]))
                    {
                        info.names.insert(target, name.to_string());
                    }
                }
                Op::MemberName => {
                    if let (Some(target), Some(member), Some(name)) = (
                        operand_id(&inst.operands[0]),
                        operand_u32(&inst.operands[1]),
                        operand_string(&inst.operands[2]),
                    ) {
                        info.member_names.insert((target, member), name.to_string());
                    }
                }
                _ => {}
            }
        }

        for inst in &module.annotations {
            match inst.class.opcode {
                Op::Decorate => {
                    let (Some(target), Some(decoration)) = (
                        operand_id(&inst.operands[0]),
                        operand_decoration(&inst.operands[1]),
                    ) else {
                        continue;
                    };
                    match decoration {
                        Decoration::Binding => {
                            if let Some(value) = operand_u32(&inst.operands[2]) {
                                info.bindings.insert(target, value);
                            }
                        }
                        Decoration::DescriptorSet => {
                            if let Some(value) = operand_u32(&inst.operands[2]) {
                                info.descriptor_sets.insert(target, value);
                            }
                        }
                        Decoration::BufferBlock => {
                            info.buffer_blocks.insert(target);
                        }
                        Decoration::ArrayStride => {
                            if let Some(value) = operand_u32(&inst.operands[2]) {
                                info.array_strides.insert(target, value);
                            }
                        }
                        _ => {}
                    }
                }
                Op::MemberDecorate => {
                    let (Some(target), Some(member), Some(decoration)) = (
                        operand_id(&inst.operands[0]),
                        operand_u32(&inst.operands[1]),
                        operand_decoration(&inst.operands[2]),
                    ) else {
                        continue;
                    };
                    if decoration == Decoration::Offset {
                        if let Some(value) = operand_u32(&inst.operands[3]) {
                            info.member_offsets.insert((target, member), value);
                        }
                    }
                }
                _ => {}
            }
        }

        for inst in &module.types_global_values {
            if let Some(id) = inst.result_id {
                info.types.insert(id, inst);
                if inst.class.opcode == Op::Constant {
                    if let Some(value) = inst.operands.first().and_then(operand_u32) {
                        info.constants.insert(id, value);
                    }
                }
            }
        }

        for function in &module.functions {
            for block in &function.blocks {
                for inst in &block.instructions {
                    for operand in &inst.operands {
                        if let Operand::IdRef(id) = operand {
                            info.live.insert(*id);
                        }
                    }
                }
            }
        }

        info
    }

    /// Resolves `OpTypePointer` to its (storage class, pointee type).
    fn pointee(&self, ptr_ty: Word) -> Option<(StorageClass, Word)> {
        let inst = self.types.get(&ptr_ty)?;
        if inst.class.opcode != Op::TypePointer {
            return None;
        }
        let storage_class = match inst.operands.first()? {
            Operand::StorageClass(sc) => *sc,
            _ => return None,
        };
        let pointee = operand_id(inst.operands.get(1)?)?;
        Some((storage_class, pointee))
    }

    /// Unwraps (runtime) array types; the static array length becomes the
    /// resource array size (1 when not an array).
    fn strip_arrays(&self, ty: Word) -> (Word, u32) {
        let mut current = ty;
        let mut array_size = 1;
        while let Some(inst) = self.types.get(&current) {
            match inst.class.opcode {
                Op::TypeArray => {
                    let length = operand_id(&inst.operands[1])
                        .and_then(|id| self.constants.get(&id).copied())
                        .unwrap_or(1);
                    array_size = length;
                    current = operand_id(&inst.operands[0]).unwrap_or(current);
                }
                Op::TypeRuntimeArray => {
                    array_size = 1;
                    current = operand_id(&inst.operands[0]).unwrap_or(current);
                }
                _ => break,
            }
            if current == ty {
                break;
            }
        }
        (current, array_size)
    }

    /// The variable's debug name, falling back to its type's name (GLSL
    /// blocks without an instance name carry only the block name).
    fn resource_name(&self, var_id: Word, type_id: Word) -> String {
        self.names
            .get(&var_id)
            .filter(|name| !name.is_empty())
            .or_else(|| self.names.get(&type_id).filter(|name| !name.is_empty()))
            .cloned()
            .unwrap_or_default()
    }

    fn binding(&self, var_id: Word) -> u32 {
        self.bindings.get(&var_id).copied().unwrap_or(0)
    }

    fn descriptor_set(&self, var_id: Word) -> u32 {
        self.descriptor_sets.get(&var_id).copied().unwrap_or(0)
    }

    fn struct_members(&self, struct_ty: Word) -> Vec<Word> {
        self.types
            .get(&struct_ty)
            .filter(|inst| inst.class.opcode == Op::TypeStruct)
            .map(|inst| inst.operands.iter().filter_map(operand_id).collect())
            .unwrap_or_default()
    }

    /// Declared size of a type under std140-style rules. Struct size is the
    /// maximum of member offset + member size; runtime arrays contribute
    /// nothing (flexible trailing member).
    fn type_size(&self, ty: Word) -> u32 {
        let Some(inst) = self.types.get(&ty) else {
            return 0;
        };
        match inst.class.opcode {
            Op::TypeBool => 4,
            Op::TypeInt | Op::TypeFloat => {
                inst.operands.first().and_then(operand_u32).unwrap_or(32) / 8
            }
            Op::TypeVector => {
                let component = operand_id(&inst.operands[0]).map_or(4, |c| self.type_size(c));
                let count = operand_u32(&inst.operands[1]).unwrap_or(1);
                component * count
            }
            Op::TypeMatrix => {
                let column = operand_id(&inst.operands[0]).map_or(16, |c| self.type_size(c));
                let columns = operand_u32(&inst.operands[1]).unwrap_or(4);
                align16(column) * columns
            }
            Op::TypeArray => {
                let element = operand_id(&inst.operands[0]).unwrap_or(0);
                let length = operand_id(&inst.operands[1])
                    .and_then(|id| self.constants.get(&id).copied())
                    .unwrap_or(1);
                let stride = self
                    .array_strides
                    .get(&ty)
                    .copied()
                    .unwrap_or_else(|| align16(self.type_size(element)));
                stride * length
            }
            Op::TypeRuntimeArray => 0,
            Op::TypeStruct => {
                let mut size = 0;
                let mut running_offset = 0;
                for (index, member) in inst.operands.iter().filter_map(operand_id).enumerate() {
                    let member_size = self.type_size(member);
                    let offset = self
                        .member_offsets
                        .get(&(ty, index as u32))
                        .copied()
                        .unwrap_or(running_offset);
                    running_offset = offset + member_size;
                    size = size.max(offset + member_size);
                }
                size
            }
            _ => 0,
        }
    }

    fn uniform_type(&self, ty: Word) -> ShaderUniformType {
        let Some(inst) = self.types.get(&ty) else {
            return ShaderUniformType::Struct;
        };
        match inst.class.opcode {
            Op::TypeBool => ShaderUniformType::Bool,
            Op::TypeInt => {
                let signed = operand_u32(&inst.operands[1]).unwrap_or(0) == 1;
                if signed {
                    ShaderUniformType::Int
                } else {
                    ShaderUniformType::UInt
                }
            }
            Op::TypeFloat => ShaderUniformType::Float,
            Op::TypeVector => {
                let component = operand_id(&inst.operands[0]);
                let count = operand_u32(&inst.operands[1]).unwrap_or(1);
                let signed_int = component
                    .and_then(|c| self.types.get(&c))
                    .is_some_and(|c| c.class.opcode == Op::TypeInt);
                match (signed_int, count) {
                    (true, 2) => ShaderUniformType::IVec2,
                    (true, 3) => ShaderUniformType::IVec3,
                    (true, 4) => ShaderUniformType::IVec4,
                    (false, 2) => ShaderUniformType::Vec2,
                    (false, 3) => ShaderUniformType::Vec3,
                    _ => ShaderUniformType::Vec4,
                }
            }
            Op::TypeMatrix => {
                if operand_u32(&inst.operands[1]) == Some(3) {
                    ShaderUniformType::Mat3
                } else {
                    ShaderUniformType::Mat4
                }
            }
            _ => ShaderUniformType::Struct,
        }
    }

    fn image_dimension(&self, image_ty: Word) -> u32 {
        let Some(inst) = self.types.get(&image_ty) else {
            return 2;
        };
        let dim = inst.operands.get(1).and_then(|op| match op {
            Operand::Dim(dim) => Some(*dim),
            _ => None,
        });
        match dim {
            Some(Dim::Dim1D | Dim::DimBuffer) => 1,
            Some(Dim::Dim3D | Dim::DimCube) => 3,
            _ => 2,
        }
    }

    fn image_is_sampled(&self, image_ty: Word) -> bool {
        self.types
            .get(&image_ty)
            .and_then(|inst| inst.operands.get(5))
            .and_then(operand_u32)
            == Some(1)
    }
}

fn operand_id(operand: &Operand) -> Option<Word> {
    match operand {
        Operand::IdRef(id) => Some(*id),
        _ => None,
    }
}

fn operand_u32(operand: &Operand) -> Option<u32> {
    match operand {
        Operand::LiteralBit32(value) => Some(*value),
        _ => None,
    }
}

fn operand_string(operand: &Operand) -> Option<&str> {
    match operand {
        Operand::LiteralString(value) => Some(value),
        _ => None,
    }
}

fn operand_decoration(operand: &Operand) -> Option<Decoration> {
    match operand {
        Operand::Decoration(decoration) => Some(*decoration),
        _ => None,
    }
}
