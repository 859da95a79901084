//! Handle creation and resource access.
//!
//! A handle resolves to a [`HandleAccess`] once, at `createHandle`; every access opcode then
//! works off that record instead of re-deriving descriptor addressing.

use spirv::{Capability, Decoration, Op, StorageClass};

use crate::dxil::{
    AtomicBinOp, ComponentType, DxOp, ResourceClass, ResourceKind, Type, ValueId, ValueKind,
};
use crate::error::{ConvertError, Result};
use crate::spv::{Id, Operation, TypeDecl};

use super::super::bindless::BINDLESS_CBV_VEC4_COUNT;
use super::super::context::{
    ConvertContext, CounterAccess, HandleAccess, ResourceMeta, ResourceReference,
};
use super::super::root_signature::LocalRootSignatureEntry;
use super::arg;

const IMAGE_OPERAND_LOD: u32 = 0x2;
const IMAGE_OPERAND_CONST_OFFSET: u32 = 0x8;
const IMAGE_OPERAND_SAMPLE: u32 = 0x40;
const IMAGE_OPERAND_MIN_LOD: u32 = 0x80;
const MEMORY_ACCESS_ALIGNED: u32 = 0x2;
const SCOPE_DEVICE: u32 = 1;

/// Array index operand of a handle creation.
#[derive(Debug, Clone, Copy)]
enum HandleIndex {
    /// `createHandle` register index, which includes the first register of the range.
    Absolute(ValueId),
    /// Element index into a resource global array.
    Relative(ValueId),
    None,
}

/// Image operand mask and the ids that follow it, in mask bit order.
#[derive(Debug, Default)]
struct ImageOperands {
    mask: u32,
    ids: Vec<Id>,
}

impl ImageOperands {
    fn push(&mut self, bit: u32, id: Id) {
        self.mask |= bit;
        self.ids.push(id);
    }
}

impl ConvertContext<'_> {
    pub(super) fn emit_create_handle(&mut self, result: ValueId, args: &[ValueId]) -> Result<()> {
        let raw = self.const_u32_operand(arg(args, 1)?, "createHandle resource class")?;
        let class = ResourceClass::from_raw(raw)
            .ok_or_else(|| ConvertError::malformed(format!("resource class {raw}")))?;
        let range = self.const_u32_operand(arg(args, 2)?, "createHandle range id")?;
        let index = arg(args, 3)?;
        let non_uniform = args
            .get(4)
            .and_then(|&v| self.module.value(v).as_const_int())
            .is_some_and(|v| v != 0);
        self.emit_handle(result, class, range, HandleIndex::Absolute(index), non_uniform)
    }

    pub(super) fn emit_create_handle_for_lib(&mut self, result: ValueId, args: &[ValueId]) -> Result<()> {
        let resource = arg(args, 1)?;
        let reference = self
            .global_resource_mapping
            .get(&resource)
            .copied()
            .ok_or_else(|| {
                ConvertError::unsupported("createHandleForLib on a value not loaded from a resource global")
            })?;
        let index = match reference.offset {
            Some(offset) => HandleIndex::Relative(offset),
            None => HandleIndex::None,
        };
        self.emit_handle(result, reference.class, reference.index, index, false)
    }

    fn emit_handle(
        &mut self,
        result: ValueId,
        class: ResourceClass,
        range: u32,
        index: HandleIndex,
        non_uniform: bool,
    ) -> Result<()> {
        let reference = self.resource_reference(class, range)?;
        let relative = self.relative_index(&reference, index)?;
        let access = match class {
            ResourceClass::Srv | ResourceClass::Uav => {
                self.image_handle_access(class, &reference, relative, non_uniform)?
            }
            ResourceClass::Sampler => {
                let (pointer, element) =
                    self.descriptor_pointer(class, &reference, relative, non_uniform)?;
                let sampler = self.emit(Op::Load, element, &[pointer]);
                if non_uniform {
                    self.decorate_non_uniform(sampler);
                }
                HandleAccess::Sampler(sampler)
            }
            ResourceClass::Cbv => self.cbv_handle_access(&reference, relative, non_uniform)?,
        };

        let counter = match class {
            ResourceClass::Uav => match self.uav_counters.get(range as usize).copied().flatten() {
                Some(counter) => Some(self.counter_access(&counter, relative, non_uniform)?),
                None => None,
            },
            _ => None,
        };

        self.handle_meta.insert(
            result,
            ResourceMeta {
                class,
                kind: reference.kind,
                component_type: reference.component_type,
                stride: reference.stride,
                non_uniform,
                access,
                counter,
            },
        );
        Ok(())
    }

    /// Dynamic index relative to the first element of an arrayed range.
    fn relative_index(&mut self, reference: &ResourceReference, index: HandleIndex) -> Result<Option<Id>> {
        if !reference.base_resource_is_array {
            return Ok(None);
        }
        match index {
            HandleIndex::None => Ok(Some(self.builder.constant_u32(0))),
            HandleIndex::Relative(value) => self.get_id_for_value(value).map(Some),
            HandleIndex::Absolute(value) => {
                if let Some(c) = self.module.value(value).as_const_int() {
                    let relative = (c as u32).wrapping_sub(reference.bind_register);
                    return Ok(Some(self.builder.constant_u32(relative)));
                }
                let id = self.get_id_for_value(value)?;
                if reference.bind_register == 0 {
                    return Ok(Some(id));
                }
                let u32_type = self.builder.uint_type(32);
                let first = self.builder.constant_u32(reference.bind_register);
                Ok(Some(self.emit(Op::ISub, u32_type, &[id, first])))
            }
        }
    }

    /// Heap slot of a bindless descriptor: the dynamic base, the static offset, then the index.
    fn bindless_heap_index(
        &mut self,
        class: ResourceClass,
        reference: &ResourceReference,
        relative: Option<Id>,
    ) -> Result<Id> {
        let u32_type = self.builder.uint_type(32);
        let base = match reference.local_root_signature_entry {
            Some(entry) => {
                let uvec2 = self.builder.vector_type(u32_type, 2);
                let pointer = self.shader_record_member_pointer(entry, uvec2)?;
                let table = self.emit(Op::Load, uvec2, &[pointer]);
                let offset = self.emit_with_literals(Op::CompositeExtract, u32_type, &[table], &[0]);
                let shift = if class == ResourceClass::Sampler {
                    self.options.sbt_descriptor_size_sampler_log2
                } else {
                    self.options.sbt_descriptor_size_srv_uav_cbv_log2
                };
                let shift = self.builder.constant_u32(shift);
                self.emit(Op::ShiftRightLogical, u32_type, &[offset, shift])
            }
            None => {
                let root = self.root_constants.ok_or_else(|| {
                    ConvertError::rejected("bindless resources need root constants for their heap base")
                })?;
                let pointer_type = self.builder.pointer_type(root.storage, u32_type);
                let word = self.builder.constant_u32(reference.push_constant_member);
                let pointer = self.emit(Op::AccessChain, pointer_type, &[root.var_id, word]);
                self.emit(Op::Load, u32_type, &[pointer])
            }
        };
        let index = self.build_offset(base, reference.base_offset);
        Ok(match relative {
            Some(relative) => self.emit(Op::IAdd, u32_type, &[index, relative]),
            None => index,
        })
    }

    /// Pointer to one descriptor plus its type.
    fn descriptor_pointer(
        &mut self,
        class: ResourceClass,
        reference: &ResourceReference,
        relative: Option<Id>,
        non_uniform: bool,
    ) -> Result<(Id, Id)> {
        let var = reference.var_id;
        let decl = self
            .builder
            .variable_decl(var)
            .cloned()
            .ok_or_else(|| ConvertError::internal(format!("%{var} is not a variable")))?;

        let index = if reference.bindless {
            Some(self.bindless_heap_index(class, reference, relative)?)
        } else {
            relative
        };
        let Some(index) = index else {
            return Ok((var, decl.pointee));
        };

        let element = match self.builder.type_decl(decl.pointee) {
            Some(TypeDecl::Array { element, .. } | TypeDecl::RuntimeArray { element, .. }) => *element,
            _ => {
                return Err(ConvertError::internal(format!(
                    "descriptor %{var} is indexed but not an array"
                )))
            }
        };
        let pointer_type = self.builder.pointer_type(decl.storage, element);
        let pointer = self.emit(Op::AccessChain, pointer_type, &[var, index]);
        if non_uniform {
            self.decorate_non_uniform(pointer);
        }
        Ok((pointer, element))
    }

    fn shader_record_member_pointer(&mut self, entry: usize, member_type: Id) -> Result<Id> {
        let sbt = self
            .shader_record_buffer
            .as_ref()
            .map(|sbt| sbt.var_id)
            .ok_or_else(|| ConvertError::internal("shader record buffer was not declared"))?;
        let pointer_type = self
            .builder
            .pointer_type(StorageClass::ShaderRecordBufferKHR, member_type);
        let member = self.builder.constant_u32(entry as u32);
        Ok(self.emit(Op::AccessChain, pointer_type, &[sbt, member]))
    }

    /// Physical pointer to `pointee` built from a root descriptor address.
    fn root_descriptor_pointer(&mut self, entry: usize, pointee: Id) -> Result<Id> {
        if !self.options.physical_storage_buffer {
            return Err(ConvertError::unsupported(
                "root descriptors need physical storage buffer addressing",
            ));
        }
        let u64_type = self.builder.uint_type(64);
        let member = self.shader_record_member_pointer(entry, u64_type)?;
        let address = self.emit(Op::Load, u64_type, &[member]);
        let pointer_type = self
            .builder
            .pointer_type(StorageClass::PhysicalStorageBuffer, pointee);
        Ok(self.emit(Op::ConvertUToPtr, pointer_type, &[address]))
    }

    fn physical_block_type(&mut self, key: &'static str, element: Id, len: Option<(u32, u32)>) -> Id {
        if let Some(&id) = self.physical_types.get(key) {
            return id;
        }
        self.builder.add_extension("SPV_KHR_physical_storage_buffer");
        self.builder
            .add_capability(Capability::PhysicalStorageBufferAddresses);
        let array = match len {
            Some((len, stride)) => self.builder.array_type(element, len, stride),
            None => self.builder.runtime_array_type(element, 4),
        };
        let block = self.get_struct_type(&[array], key);
        self.builder.decorate(block, Decoration::Block, &[]);
        self.builder
            .decorate_member(block, 0, Decoration::Offset, &[0]);
        self.physical_types.insert(key, block);
        block
    }

    fn image_handle_access(
        &mut self,
        class: ResourceClass,
        reference: &ResourceReference,
        relative: Option<Id>,
        non_uniform: bool,
    ) -> Result<HandleAccess> {
        if let (Some(entry), false) = (reference.local_root_signature_entry, reference.bindless) {
            let u32_type = self.builder.uint_type(32);
            let block = self.physical_block_type("PhysicalBuffer", u32_type, None);
            return Ok(HandleAccess::PhysicalBuffer(
                self.root_descriptor_pointer(entry, block)?,
            ));
        }

        let (pointer, element) = self.descriptor_pointer(class, reference, relative, non_uniform)?;
        let loaded = self.emit(Op::Load, element, &[pointer]);
        if non_uniform {
            self.decorate_non_uniform(loaded);
        }
        Ok(if reference.kind == ResourceKind::RTAccelerationStructure {
            HandleAccess::AccelerationStructure(loaded)
        } else {
            HandleAccess::Image {
                image: loaded,
                pointer,
            }
        })
    }

    fn cbv_handle_access(
        &mut self,
        reference: &ResourceReference,
        relative: Option<Id>,
        non_uniform: bool,
    ) -> Result<HandleAccess> {
        if reference.push_constant {
            return Ok(HandleAccess::CbvRootConstants {
                base_word: reference.push_constant_member,
            });
        }
        if let (Some(entry), false) = (reference.local_root_signature_entry, reference.bindless) {
            let root_entry = self.local_root_signature[entry];
            return match root_entry {
                LocalRootSignatureEntry::Constants { .. } => Ok(HandleAccess::CbvShaderRecord {
                    member: entry as u32,
                }),
                LocalRootSignatureEntry::Descriptor { .. } => {
                    let f32_type = self.builder.float_type(32);
                    let vec4 = self.builder.vector_type(f32_type, 4);
                    let block = self.physical_block_type(
                        "PhysicalCBV",
                        vec4,
                        Some((BINDLESS_CBV_VEC4_COUNT, 16)),
                    );
                    Ok(HandleAccess::CbvBlock {
                        pointer: self.root_descriptor_pointer(entry, block)?,
                        storage: StorageClass::PhysicalStorageBuffer,
                    })
                }
                LocalRootSignatureEntry::Table { .. } => Err(ConvertError::internal(
                    "descriptor-table CBV was not declared bindless",
                )),
            };
        }

        let storage = self
            .builder
            .variable_decl(reference.var_id)
            .map(|decl| decl.storage)
            .ok_or_else(|| ConvertError::internal("CBV variable is missing"))?;
        let (pointer, _) =
            self.descriptor_pointer(ResourceClass::Cbv, reference, relative, non_uniform)?;
        Ok(HandleAccess::CbvBlock { pointer, storage })
    }

    fn counter_access(
        &mut self,
        counter: &ResourceReference,
        relative: Option<Id>,
        non_uniform: bool,
    ) -> Result<CounterAccess> {
        if !counter.bindless {
            let (pointer, _) =
                self.descriptor_pointer(ResourceClass::Uav, counter, relative, non_uniform)?;
            return Ok(CounterAccess::Image(pointer));
        }
        let index = self.bindless_heap_index(ResourceClass::Uav, counter, relative)?;
        let counter_pointer = self.physical_counter_pointer_type();
        let slot_type = self
            .builder
            .pointer_type(StorageClass::StorageBuffer, counter_pointer);
        let zero = self.builder.constant_u32(0);
        let slot = self.emit(Op::AccessChain, slot_type, &[counter.var_id, zero, index]);
        if non_uniform {
            self.decorate_non_uniform(slot);
        }
        Ok(CounterAccess::Physical(self.emit(
            Op::Load,
            counter_pointer,
            &[slot],
        )))
    }

    // Access helpers

    fn resource_meta(&self, handle: ValueId) -> Result<ResourceMeta> {
        self.handle_meta.get(&handle).copied().ok_or_else(|| {
            ConvertError::unsupported("resource access through a handle that was not created here")
        })
    }

    fn image_of(meta: &ResourceMeta) -> Result<Id> {
        match meta.access {
            HandleAccess::Image { image, .. } => Ok(image),
            other => Err(ConvertError::internal(format!(
                "{:?} handle used as an image ({other:?})",
                meta.kind
            ))),
        }
    }

    fn emit_aligned_load(&mut self, type_id: Id, pointer: Id, alignment: u32) -> Id {
        self.emit_with_literals(
            Op::Load,
            type_id,
            &[pointer],
            &[MEMORY_ACCESS_ALIGNED, alignment],
        )
    }

    fn emit_image_op(&mut self, op: Op, type_id: Id, image: Id, coord: Id, operands: &ImageOperands) -> Id {
        let id = self.builder.allocate_id();
        let mut operation = Operation::with_result(op, id, type_id);
        operation.add_ids(&[image, coord]);
        if operands.mask != 0 {
            operation.add_literal(operands.mask).add_ids(&operands.ids);
        }
        self.push(operation);
        id
    }

    /// Word address of a raw (byte offset) or structured (element, byte offset) access.
    fn raw_buffer_word_address(&mut self, meta: &ResourceMeta, index: ValueId, offset: ValueId) -> Result<Id> {
        let u32_type = self.builder.uint_type(32);
        let index_id = self.get_id_for_value(index)?;
        let byte_address = if meta.kind == ResourceKind::StructuredBuffer {
            let stride = self.builder.constant_u32(meta.stride);
            let scaled = self.emit(Op::IMul, u32_type, &[index_id, stride]);
            let offset_id = self.get_id_for_value(offset)?;
            self.emit(Op::IAdd, u32_type, &[scaled, offset_id])
        } else {
            index_id
        };
        let two = self.builder.constant_u32(2);
        Ok(self.emit(Op::ShiftRightLogical, u32_type, &[byte_address, two]))
    }

    fn raw_buffer_read_word(&mut self, meta: &ResourceMeta, address: Id) -> Result<Id> {
        let u32_type = self.builder.uint_type(32);
        match meta.access {
            HandleAccess::Image { image, .. } => {
                let uvec4 = self.builder.vector_type(u32_type, 4);
                let op = if meta.class == ResourceClass::Srv {
                    Op::ImageFetch
                } else {
                    Op::ImageRead
                };
                let texel = self.emit(op, uvec4, &[image, address]);
                Ok(self.emit_with_literals(Op::CompositeExtract, u32_type, &[texel], &[0]))
            }
            HandleAccess::PhysicalBuffer(pointer) => {
                let pointer_type = self
                    .builder
                    .pointer_type(StorageClass::PhysicalStorageBuffer, u32_type);
                let zero = self.builder.constant_u32(0);
                let element = self.emit(Op::AccessChain, pointer_type, &[pointer, zero, address]);
                Ok(self.emit_aligned_load(u32_type, element, 4))
            }
            other => Err(ConvertError::internal(format!(
                "raw buffer read through {other:?}"
            ))),
        }
    }

    fn raw_buffer_write_word(&mut self, meta: &ResourceMeta, address: Id, value: Id) -> Result<()> {
        let u32_type = self.builder.uint_type(32);
        match meta.access {
            HandleAccess::Image { image, .. } => {
                let texel = self.build_vector(u32_type, &[value; 4]);
                self.emit_void(Op::ImageWrite, &[image, address, texel]);
                Ok(())
            }
            HandleAccess::PhysicalBuffer(pointer) => {
                let pointer_type = self
                    .builder
                    .pointer_type(StorageClass::PhysicalStorageBuffer, u32_type);
                let zero = self.builder.constant_u32(0);
                let element = self.emit(Op::AccessChain, pointer_type, &[pointer, zero, address]);
                let mut operation = Operation::new(Op::Store);
                operation
                    .add_ids(&[element, value])
                    .add_literals(&[MEMORY_ACCESS_ALIGNED, 4]);
                self.push(operation);
                Ok(())
            }
            other => Err(ConvertError::internal(format!(
                "raw buffer write through {other:?}"
            ))),
        }
    }

    /// Element type of a `ResRet`/`CBufRet` aggregate and its member count.
    fn aggregate_element(&self, value: ValueId) -> Result<(Type, usize)> {
        match self.module.value_type(value).struct_members() {
            Some(members) if !members.is_empty() => Ok((members[0].clone(), members.len())),
            _ => Err(ConvertError::malformed(
                "resource return type is not an aggregate",
            )),
        }
    }

    // Constant buffers

    pub(super) fn emit_cbuffer_load_legacy(&mut self, result: ValueId, args: &[ValueId]) -> Result<()> {
        let meta = self.resource_meta(arg(args, 1)?)?;
        let register = arg(args, 2)?;
        let u32_type = self.builder.uint_type(32);
        let f32_type = self.builder.float_type(32);
        let vec4 = self.builder.vector_type(f32_type, 4);

        let (raw, raw_is_float) = match meta.access {
            HandleAccess::CbvBlock { pointer, storage } => {
                let pointer_type = self.builder.pointer_type(storage, vec4);
                let zero = self.builder.constant_u32(0);
                let register = self.get_id_for_value(register)?;
                let element = self.emit(Op::AccessChain, pointer_type, &[pointer, zero, register]);
                let loaded = if storage == StorageClass::PhysicalStorageBuffer {
                    self.emit_aligned_load(vec4, element, 16)
                } else {
                    self.emit(Op::Load, vec4, &[element])
                };
                (loaded, true)
            }
            HandleAccess::CbvRootConstants { base_word } => {
                let root = self
                    .root_constants
                    .ok_or_else(|| ConvertError::internal("root constants were not declared"))?;
                let register = self.const_u32_operand(register, "root constant CBV register")?;
                let pointer_type = self.builder.pointer_type(root.storage, u32_type);
                let mut words = Vec::with_capacity(4);
                for i in 0..4 {
                    let word = root_constant_word(base_word, register, i)?;
                    words.push(if word < root.num_words {
                        let index = self.builder.constant_u32(word);
                        let pointer = self.emit(Op::AccessChain, pointer_type, &[root.var_id, index]);
                        self.emit(Op::Load, u32_type, &[pointer])
                    } else {
                        self.builder.constant_u32(0)
                    });
                }
                (self.build_vector(u32_type, &words), false)
            }
            HandleAccess::CbvShaderRecord { member } => {
                let sbt = self
                    .shader_record_buffer
                    .as_ref()
                    .map(|sbt| sbt.var_id)
                    .ok_or_else(|| ConvertError::internal("shader record buffer was not declared"))?;
                let pointer_type = self
                    .builder
                    .pointer_type(StorageClass::ShaderRecordBufferKHR, u32_type);
                let member = self.builder.constant_u32(member);
                let register = self.get_id_for_value(register)?;
                let four = self.builder.constant_u32(4);
                let first = self.emit(Op::IMul, u32_type, &[register, four]);
                let mut words = Vec::with_capacity(4);
                for i in 0..4 {
                    let word = self.build_offset(first, i);
                    let pointer = self.emit(Op::AccessChain, pointer_type, &[sbt, member, word]);
                    words.push(self.emit(Op::Load, u32_type, &[pointer]));
                }
                (self.build_vector(u32_type, &words), false)
            }
            other => {
                return Err(ConvertError::internal(format!(
                    "{other:?} handle used as a constant buffer"
                )))
            }
        };

        let (element, count) = self.aggregate_element(result)?;
        let target = match (&element, count) {
            (Type::Float, 4) if raw_is_float => return self.define_value(result, raw),
            (Type::Float, 4) => vec4,
            (Type::Int(32), 4) if !raw_is_float => return self.define_value(result, raw),
            (Type::Int(32), 4) => self.builder.vector_type(u32_type, 4),
            (Type::Double, 2) => {
                let f64_type = self.get_type_id(&Type::Double)?;
                self.builder.vector_type(f64_type, 2)
            }
            (other, count) => {
                return Err(ConvertError::unsupported(format!(
                    "constant buffer rows of {count} x {other}"
                )))
            }
        };
        self.emit_as(Op::Bitcast, result, target, &[raw]).map(drop)
    }

    // Buffers

    pub(super) fn emit_buffer_load(&mut self, result: ValueId, op: DxOp, args: &[ValueId]) -> Result<()> {
        let meta = self.resource_meta(arg(args, 1)?)?;
        let index = arg(args, 2)?;

        if !meta.kind.is_raw_or_structured() {
            let coord = self.get_id_for_value(index)?;
            return self.emit_image_read(result, &meta, coord, &ImageOperands::default());
        }

        if self.sparse_feedback.contains(&result) {
            return Err(ConvertError::unsupported(
                "residency feedback on raw or structured buffers",
            ));
        }
        let address = self.raw_buffer_word_address(&meta, index, arg(args, 3)?)?;
        let count = if op == DxOp::RawBufferLoad {
            let mask = self.const_u32_operand(arg(args, 4)?, "rawBufferLoad mask")? & 0xf;
            (32 - mask.leading_zeros()).max(1)
        } else {
            4
        };

        let u32_type = self.builder.uint_type(32);
        let mut words = Vec::with_capacity(4);
        for i in 0..count {
            let word_address = self.build_offset(address, i);
            words.push(self.raw_buffer_read_word(&meta, word_address)?);
        }
        while words.len() < 4 {
            words.push(self.builder.constant_u32(0));
        }
        let raw = self.build_vector(u32_type, &words);

        let (element, _) = self.aggregate_element(result)?;
        match element {
            Type::Float => {
                let f32_type = self.builder.float_type(32);
                let vec4 = self.builder.vector_type(f32_type, 4);
                self.emit_as(Op::Bitcast, result, vec4, &[raw]).map(drop)
            }
            Type::Int(32) => self.define_value(result, raw),
            other => Err(ConvertError::unsupported(format!(
                "raw buffer loads of {other}"
            ))),
        }
    }

    pub(super) fn emit_buffer_store(&mut self, op: DxOp, args: &[ValueId]) -> Result<()> {
        let meta = self.resource_meta(arg(args, 1)?)?;
        let values = [arg(args, 4)?, arg(args, 5)?, arg(args, 6)?, arg(args, 7)?];
        let mask = self.const_u32_operand(arg(args, 8)?, "buffer store mask")?;

        if !meta.kind.is_raw_or_structured() {
            let coord = self.get_id_for_value(arg(args, 2)?)?;
            return self.emit_typed_store(&meta, coord, &values);
        }

        let address = self.raw_buffer_word_address(&meta, arg(args, 2)?, arg(args, 3)?)?;
        let u32_type = self.builder.uint_type(32);
        let module = self.module;
        for (i, &value) in values.iter().enumerate() {
            if mask & (1 << i) == 0 {
                continue;
            }
            let mut word = self.get_id_for_value(value)?;
            match module.value_type(value) {
                Type::Float => word = self.emit(Op::Bitcast, u32_type, &[word]),
                Type::Int(32) => {}
                other => {
                    return Err(ConvertError::unsupported(format!(
                        "{op:?} of {other}"
                    )))
                }
            }
            let word_address = self.build_offset(address, i as u32);
            self.raw_buffer_write_word(&meta, word_address, word)?;
        }
        Ok(())
    }

    fn emit_typed_store(&mut self, meta: &ResourceMeta, coord: Id, values: &[ValueId]) -> Result<()> {
        let image = Self::image_of(meta)?;
        let module = self.module;
        let element = self.get_type_id(module.value_type(values[0]))?;
        let mut parts = Vec::with_capacity(values.len());
        for &value in values {
            parts.push(self.get_id_for_value(value)?);
        }
        let texel = self.build_vector(element, &parts);
        let texel = self.fixup_store_sign(meta.component_type, values.len() as u32, texel);
        self.emit_void(Op::ImageWrite, &[image, coord, texel]);
        Ok(())
    }

    /// Typed read of a texel, with residency feedback when the status is consumed.
    fn emit_image_read(
        &mut self,
        result: ValueId,
        meta: &ResourceMeta,
        coord: Id,
        operands: &ImageOperands,
    ) -> Result<()> {
        let image = Self::image_of(meta)?;
        let texel_type = self.component_type_id(meta.component_type, 1, 4, false)?;
        let sparse = self.sparse_feedback.contains(&result);
        let op = match (meta.class, sparse) {
            (ResourceClass::Srv, false) => Op::ImageFetch,
            (ResourceClass::Srv, true) => Op::ImageSparseFetch,
            (_, false) => Op::ImageRead,
            (_, true) => Op::ImageSparseRead,
        };

        if sparse {
            let u32_type = self.builder.uint_type(32);
            let pair = self.get_struct_type(&[u32_type, texel_type], "SparseTexel");
            let fetched = self.emit_image_op(op, pair, image, coord, operands);
            return self.repack_sparse_feedback(result, meta.component_type, fetched, texel_type);
        }
        let fetched = self.emit_image_op(op, texel_type, image, coord, operands);
        let fixed = self.fixup_load_sign(meta.component_type, 4, fetched);
        self.define_value(result, fixed)
    }

    // Textures

    /// `ConstOffset` operand for constant texel offsets; `None` when all are zero.
    fn const_offset(&mut self, kind: ResourceKind, offsets: &[ValueId]) -> Result<Option<Id>> {
        let count = kind.offset_count() as usize;
        if count == 0 {
            return Ok(None);
        }
        let mut components = Vec::with_capacity(count);
        for &offset in offsets.iter().take(count) {
            let value = self.module.value(offset);
            components.push(match (&value.kind, value.as_const_int()) {
                (ValueKind::Undef, _) => 0,
                (_, Some(bits)) => bits as u32,
                _ => {
                    return Err(ConvertError::unsupported(
                        "texel offsets must be constant",
                    ))
                }
            });
        }
        if components.iter().all(|&c| c == 0) {
            return Ok(None);
        }
        let int_type = self.builder.int_type(32);
        let parts: Vec<Id> = components
            .iter()
            .map(|&c| self.builder.constant_scalar(int_type, u64::from(c)))
            .collect();
        Ok(Some(if parts.len() == 1 {
            parts[0]
        } else {
            let vector = self.builder.vector_type(int_type, parts.len() as u32);
            self.build_constant_vector(vector, &parts)
        }))
    }

    fn coordinate(&mut self, element_type: Id, values: &[ValueId]) -> Result<Id> {
        let mut parts = Vec::with_capacity(values.len());
        for &value in values {
            parts.push(self.get_id_for_value(value)?);
        }
        Ok(self.build_vector(element_type, &parts))
    }

    pub(super) fn emit_texture_load(&mut self, result: ValueId, args: &[ValueId]) -> Result<()> {
        let meta = self.resource_meta(arg(args, 1)?)?;
        let count = meta.kind.fetch_coordinate_count() as usize;
        let u32_type = self.builder.uint_type(32);
        let coord_values: Vec<ValueId> = (0..count).map(|i| arg(args, 3 + i)).collect::<Result<_>>()?;
        let coord = self.coordinate(u32_type, &coord_values)?;

        let mut operands = ImageOperands::default();
        let level = arg(args, 2)?;
        let level_id = if matches!(self.module.value(level).kind, ValueKind::Undef) {
            self.builder.constant_u32(0)
        } else {
            self.get_id_for_value(level)?
        };
        if meta.class == ResourceClass::Srv && !meta.kind.is_multisampled() && !meta.kind.is_buffer() {
            operands.push(IMAGE_OPERAND_LOD, level_id);
        }
        let offsets: Vec<ValueId> = (6..9).filter_map(|i| args.get(i).copied()).collect();
        if meta.class == ResourceClass::Srv {
            if let Some(offset) = self.const_offset(meta.kind, &offsets)? {
                operands.push(IMAGE_OPERAND_CONST_OFFSET, offset);
            }
        }
        if meta.kind.is_multisampled() {
            operands.push(IMAGE_OPERAND_SAMPLE, level_id);
        }
        self.emit_image_read(result, &meta, coord, &operands)
    }

    pub(super) fn emit_texture_store(&mut self, args: &[ValueId]) -> Result<()> {
        let meta = self.resource_meta(arg(args, 1)?)?;
        let count = meta.kind.fetch_coordinate_count() as usize;
        let u32_type = self.builder.uint_type(32);
        let coord_values: Vec<ValueId> = (0..count).map(|i| arg(args, 2 + i)).collect::<Result<_>>()?;
        let coord = self.coordinate(u32_type, &coord_values)?;
        let values = [arg(args, 5)?, arg(args, 6)?, arg(args, 7)?, arg(args, 8)?];
        self.emit_typed_store(&meta, coord, &values)
    }

    pub(super) fn emit_sample(&mut self, result: ValueId, op: DxOp, args: &[ValueId]) -> Result<()> {
        let meta = self.resource_meta(arg(args, 1)?)?;
        let sampler_meta = self.resource_meta(arg(args, 2)?)?;
        let HandleAccess::Sampler(sampler) = sampler_meta.access else {
            return Err(ConvertError::malformed("sample operand 2 is not a sampler handle"));
        };
        let image = Self::image_of(&meta)?;

        let count = meta.kind.sample_coordinate_count() as usize;
        let f32_type = self.builder.float_type(32);
        let coord_values: Vec<ValueId> = (0..count).map(|i| arg(args, 3 + i)).collect::<Result<_>>()?;
        let coord = self.coordinate(f32_type, &coord_values)?;

        let sampled = self.build_sampled_image(image, sampler, meta.non_uniform || sampler_meta.non_uniform)?;

        let mut operands = ImageOperands::default();
        let last = arg(args, 10)?;
        if op == DxOp::SampleLevel {
            let lod = self.get_id_for_value(last)?;
            operands.push(IMAGE_OPERAND_LOD, lod);
        }
        let offsets = [arg(args, 7)?, arg(args, 8)?, arg(args, 9)?];
        if let Some(offset) = self.const_offset(meta.kind, &offsets)? {
            operands.push(IMAGE_OPERAND_CONST_OFFSET, offset);
        }
        if op == DxOp::Sample {
            let clamp = self.module.value(last);
            let unclamped = matches!(clamp.kind, ValueKind::Undef)
                || clamp.as_const_float() == Some(0.0);
            if !unclamped {
                self.builder.add_capability(Capability::MinLod);
                let clamp = self.get_id_for_value(last)?;
                operands.push(IMAGE_OPERAND_MIN_LOD, clamp);
            }
        }

        let sparse = self.sparse_feedback.contains(&result);
        let spv_op = match (op, sparse) {
            (DxOp::SampleLevel, false) => Op::ImageSampleExplicitLod,
            (DxOp::SampleLevel, true) => Op::ImageSparseSampleExplicitLod,
            (_, false) => Op::ImageSampleImplicitLod,
            (_, true) => Op::ImageSparseSampleImplicitLod,
        };
        let texel_type = self.component_type_id(meta.component_type, 1, 4, false)?;
        if sparse {
            let u32_type = self.builder.uint_type(32);
            let pair = self.get_struct_type(&[u32_type, texel_type], "SparseTexel");
            let sampled_texel = self.emit_image_op(spv_op, pair, sampled, coord, &operands);
            return self.repack_sparse_feedback(result, meta.component_type, sampled_texel, texel_type);
        }
        let texel = self.emit_image_op(spv_op, texel_type, sampled, coord, &operands);
        let fixed = self.fixup_load_sign(meta.component_type, 4, texel);
        self.define_value(result, fixed)
    }

    // Counters and atomics

    fn texel_pointer(&mut self, meta: &ResourceMeta, coords: &[ValueId], texel_type: Id) -> Result<Id> {
        let u32_type = self.builder.uint_type(32);
        let zero = self.builder.constant_u32(0);
        match meta.access {
            HandleAccess::Image { pointer, .. } => {
                let coord = if meta.kind.is_raw_or_structured() {
                    self.raw_buffer_word_address(meta, coords[0], coords[1])?
                } else {
                    let count = meta.kind.fetch_coordinate_count() as usize;
                    self.coordinate(u32_type, &coords[..count.min(coords.len())])?
                };
                let pointer_type = self.builder.pointer_type(StorageClass::Image, texel_type);
                Ok(self.emit(Op::ImageTexelPointer, pointer_type, &[pointer, coord, zero]))
            }
            HandleAccess::PhysicalBuffer(pointer) => {
                let address = self.raw_buffer_word_address(meta, coords[0], coords[1])?;
                let pointer_type = self
                    .builder
                    .pointer_type(StorageClass::PhysicalStorageBuffer, u32_type);
                Ok(self.emit(Op::AccessChain, pointer_type, &[pointer, zero, address]))
            }
            other => Err(ConvertError::internal(format!(
                "atomic through {other:?}"
            ))),
        }
    }

    pub(super) fn emit_buffer_update_counter(&mut self, result: ValueId, args: &[ValueId]) -> Result<()> {
        let meta = self.resource_meta(arg(args, 1)?)?;
        let counter = meta
            .counter
            .ok_or_else(|| ConvertError::malformed("bufferUpdateCounter on a UAV without a counter"))?;
        let increment = self.const_operand(arg(args, 2)?, "counter direction")? as u8 as i8 > 0;

        let u32_type = self.builder.uint_type(32);
        let zero = self.builder.constant_u32(0);
        let pointer = match counter {
            CounterAccess::Image(image) => {
                let pointer_type = self.builder.pointer_type(StorageClass::Image, u32_type);
                self.emit(Op::ImageTexelPointer, pointer_type, &[image, zero, zero])
            }
            CounterAccess::Physical(pointer) => {
                let pointer_type = self
                    .builder
                    .pointer_type(StorageClass::PhysicalStorageBuffer, u32_type);
                self.emit(Op::AccessChain, pointer_type, &[pointer, zero])
            }
        };
        let scope = self.builder.constant_u32(SCOPE_DEVICE);
        let one = self.builder.constant_u32(1);
        if increment {
            self.emit_for(Op::AtomicIAdd, result, &[pointer, scope, zero, one])
                .map(drop)
        } else {
            // Decrement yields the new value.
            let previous = self.emit(Op::AtomicISub, u32_type, &[pointer, scope, zero, one]);
            self.emit_for(Op::ISub, result, &[previous, one]).map(drop)
        }
    }

    pub(super) fn emit_resource_atomic(&mut self, result: ValueId, op: DxOp, args: &[ValueId]) -> Result<()> {
        let meta = self.resource_meta(arg(args, 1)?)?;
        let component = if meta.kind.is_raw_or_structured() {
            ComponentType::U32
        } else {
            meta.component_type
        };
        let texel_type = self.component_type_id(component, 1, 1, false)?;

        let (coords, spv_op) = if op == DxOp::AtomicBinOp {
            let raw = self.const_u32_operand(arg(args, 2)?, "atomic operation")?;
            let spv_op = match AtomicBinOp::from_raw(raw) {
                Some(AtomicBinOp::Add) => Op::AtomicIAdd,
                Some(AtomicBinOp::And) => Op::AtomicAnd,
                Some(AtomicBinOp::Or) => Op::AtomicOr,
                Some(AtomicBinOp::Xor) => Op::AtomicXor,
                Some(AtomicBinOp::IMin) => Op::AtomicSMin,
                Some(AtomicBinOp::IMax) => Op::AtomicSMax,
                Some(AtomicBinOp::UMin) => Op::AtomicUMin,
                Some(AtomicBinOp::UMax) => Op::AtomicUMax,
                Some(AtomicBinOp::Exchange) => Op::AtomicExchange,
                None => {
                    return Err(ConvertError::unsupported(format!(
                        "atomic operation {raw}"
                    )))
                }
            };
            ([arg(args, 3)?, arg(args, 4)?, arg(args, 5)?], spv_op)
        } else {
            (
                [arg(args, 2)?, arg(args, 3)?, arg(args, 4)?],
                Op::AtomicCompareExchange,
            )
        };

        let pointer = self.texel_pointer(&meta, &coords, texel_type)?;
        let scope = self.builder.constant_u32(SCOPE_DEVICE);
        let semantics = self.builder.constant_u32(0);
        let atomic = if op == DxOp::AtomicBinOp {
            let value = self.get_id_for_value(arg(args, 6)?)?;
            let value = self.fixup_store_sign(component, 1, value);
            self.emit(spv_op, texel_type, &[pointer, scope, semantics, value])
        } else {
            let comparator = self.get_id_for_value(arg(args, 5)?)?;
            let comparator = self.fixup_store_sign(component, 1, comparator);
            let new_value = self.get_id_for_value(arg(args, 6)?)?;
            let new_value = self.fixup_store_sign(component, 1, new_value);
            self.emit(
                spv_op,
                texel_type,
                &[pointer, scope, semantics, semantics, new_value, comparator],
            )
        };
        let fixed = self.fixup_load_sign(component, 1, atomic);
        self.define_value(result, fixed)
    }
}

/// Root constant word read for component `i` of legacy cbuffer row `register`.
fn root_constant_word(base_word: u32, register: u32, i: u32) -> Result<u32> {
    register
        .checked_mul(4)
        .and_then(|word| word.checked_add(base_word))
        .and_then(|word| word.checked_add(i))
        .ok_or_else(|| {
            ConvertError::malformed(format!("root constant row {register} is out of range"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_constant_words_follow_the_row() {
        assert_eq!(root_constant_word(2, 1, 3), Ok(9));
    }

    #[test]
    fn huge_root_constant_rows_are_malformed() {
        assert!(matches!(
            root_constant_word(0, u32::MAX / 2, 0),
            Err(ConvertError::MalformedMetadata(_))
        ));
        assert!(matches!(
            root_constant_word(u32::MAX, 0, 1),
            Err(ConvertError::MalformedMetadata(_))
        ));
    }
}
