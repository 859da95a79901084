//! Lowering of `dx.op` intrinsic calls.
//!
//! Calls are dispatched on their opcode operand. Submodules group the opcodes by what they touch;
//! this module also carries the small value-building helpers they share.

mod control;
mod io;
mod math;
mod resources;

use spirv::{Decoration, Op};

use crate::dxil::{ComponentType, DxOp, FunctionId, ValueId};
use crate::error::{ConvertError, Result};
use crate::spv::{Id, TypeDecl};

use super::analysis::dx_opcode;
use super::context::ConvertContext;

/// Operand `index` of a `dx.op` call.
pub(crate) fn arg(args: &[ValueId], index: usize) -> Result<ValueId> {
    args.get(index).copied().ok_or_else(|| {
        ConvertError::malformed(format!("dx.op call has no operand {index}"))
    })
}

/// Result of a value-producing `dx.op` call.
pub(crate) fn result_of(result: Option<ValueId>, op: DxOp) -> Result<ValueId> {
    result.ok_or_else(|| ConvertError::malformed(format!("dx.op {op:?} call has no result")))
}

impl ConvertContext<'_> {
    pub fn emit_dxil_instruction(
        &mut self,
        result: Option<ValueId>,
        callee: FunctionId,
        args: &[ValueId],
    ) -> Result<()> {
        let op = dx_opcode(self.module, callee, args).ok_or_else(|| {
            ConvertError::unsupported(format!(
                "intrinsic {}",
                self.module.function(callee).name
            ))
        })?;

        match op {
            DxOp::LoadInput => self.emit_load_input(result_of(result, op)?, args),
            DxOp::StoreOutput => self.emit_store_output(args),
            DxOp::LoadPatchConstant => self.emit_load_patch_constant(result_of(result, op)?, args),
            DxOp::StorePatchConstant => self.emit_store_patch_constant(args),
            DxOp::ThreadId
            | DxOp::GroupId
            | DxOp::ThreadIdInGroup
            | DxOp::FlattenedThreadIdInGroup
            | DxOp::GSInstanceID
            | DxOp::DomainLocation
            | DxOp::OutputControlPointID
            | DxOp::PrimitiveID => self.emit_builtin_load(result_of(result, op)?, op, args),
            DxOp::EmitStream | DxOp::CutStream | DxOp::EmitThenCutStream => {
                self.emit_stream_instruction(op, args)
            }

            DxOp::CreateHandle => self.emit_create_handle(result_of(result, op)?, args),
            DxOp::CreateHandleForLib => {
                self.emit_create_handle_for_lib(result_of(result, op)?, args)
            }
            DxOp::CBufferLoadLegacy => self.emit_cbuffer_load_legacy(result_of(result, op)?, args),
            DxOp::BufferLoad | DxOp::RawBufferLoad => {
                self.emit_buffer_load(result_of(result, op)?, op, args)
            }
            DxOp::BufferStore | DxOp::RawBufferStore => self.emit_buffer_store(op, args),
            DxOp::TextureLoad => self.emit_texture_load(result_of(result, op)?, args),
            DxOp::TextureStore => self.emit_texture_store(args),
            DxOp::Sample | DxOp::SampleLevel => self.emit_sample(result_of(result, op)?, op, args),
            DxOp::CheckAccessFullyMapped => {
                let status = self.get_id_for_value(arg(args, 1)?)?;
                self.emit_for(Op::ImageSparseTexelsResident, result_of(result, op)?, &[status])
                    .map(drop)
            }
            DxOp::BufferUpdateCounter => {
                self.emit_buffer_update_counter(result_of(result, op)?, args)
            }
            DxOp::AtomicBinOp | DxOp::AtomicCompareExchange => {
                self.emit_resource_atomic(result_of(result, op)?, op, args)
            }
            DxOp::RenderTargetGetSampleCount => {
                let count = self.rasterizer_sample_count_id();
                self.define_value(result_of(result, op)?, count)
            }

            DxOp::Barrier => self.emit_barrier(args),
            DxOp::Discard => self.emit_discard(args),
            DxOp::TraceRay => self.emit_trace_ray(args),

            _ => self.emit_math(result_of(result, op)?, op, args),
        }
    }

    /// Vector of `parts`, or the single part itself.
    pub fn build_vector(&mut self, element_type: Id, parts: &[Id]) -> Id {
        if parts.len() == 1 {
            return parts[0];
        }
        let vector = self.builder.vector_type(element_type, parts.len() as u32);
        self.emit(Op::CompositeConstruct, vector, parts)
    }

    /// Constant composite of type `vector_type`.
    pub fn build_constant_vector(&mut self, vector_type: Id, parts: &[Id]) -> Id {
        self.builder.constant_composite(vector_type, parts)
    }

    /// `value + offset`, skipping the add for a zero offset.
    pub fn build_offset(&mut self, value: Id, offset: u32) -> Id {
        if offset == 0 {
            return value;
        }
        let u32_type = self.builder.uint_type(32);
        let offset = self.builder.constant_u32(offset);
        self.emit(Op::IAdd, u32_type, &[value, offset])
    }

    /// Signed resource data is read as signed SPIR-V ints; DXIL values are unsigned.
    pub fn fixup_load_sign(&mut self, component: ComponentType, count: u32, value: Id) -> Id {
        let width = match component.storage_type() {
            ComponentType::I16 => 16,
            ComponentType::I32 => 32,
            ComponentType::I64 => 64,
            _ => return value,
        };
        let scalar = self.builder.uint_type(width);
        let ty = self.builder.vector_type(scalar, count);
        self.emit(Op::Bitcast, ty, &[value])
    }

    pub fn fixup_store_sign(&mut self, component: ComponentType, count: u32, value: Id) -> Id {
        let width = match component.storage_type() {
            ComponentType::I16 => 16,
            ComponentType::I32 => 32,
            ComponentType::I64 => 64,
            _ => return value,
        };
        let scalar = self.builder.int_type(width);
        let ty = self.builder.vector_type(scalar, count);
        self.emit(Op::Bitcast, ty, &[value])
    }

    /// Rebuilds a sparse `(code, texel)` pair as the `ResRet` aggregate `result` is typed as.
    pub fn repack_sparse_feedback(
        &mut self,
        result: ValueId,
        component: ComponentType,
        sparse: Id,
        texel_type: Id,
    ) -> Result<()> {
        let u32_type = self.builder.uint_type(32);
        let code = self.emit_with_literals(Op::CompositeExtract, u32_type, &[sparse], &[0]);
        let texel = self.emit_with_literals(Op::CompositeExtract, texel_type, &[sparse], &[1]);
        let count = self.builder.vector_size_of(texel_type);
        let texel = self.fixup_load_sign(component, count, texel);
        let texel_type = self.type_of_id(texel).unwrap_or(texel_type);

        let scalar = self.builder.scalar_type_of(texel_type);
        let mut parts = Vec::with_capacity(5);
        if count == 1 {
            parts.extend(std::iter::repeat(texel).take(4));
        } else {
            for lane in 0..count.min(4) {
                parts.push(self.emit_with_literals(Op::CompositeExtract, scalar, &[texel], &[lane]));
            }
            while parts.len() < 4 {
                let last = parts[parts.len() - 1];
                parts.push(last);
            }
        }
        parts.push(code);

        let aggregate = self.get_type_id_for_value(result)?;
        self.emit_as(Op::CompositeConstruct, result, aggregate, &parts)
            .map(drop)
    }

    /// Combines an image and sampler, reusing the pair within the current block.
    pub fn build_sampled_image(&mut self, image: Id, sampler: Id, non_uniform: bool) -> Result<Id> {
        if let Some(&id) = self
            .combined_image_sampler_cache
            .get(&(image, sampler, non_uniform))
        {
            return Ok(id);
        }

        let image_type = self.type_of_id(image)?;
        if !matches!(self.builder.type_decl(image_type), Some(TypeDecl::Image { .. })) {
            return Err(ConvertError::internal(format!("%{image} is not an image")));
        }
        let sampled_type = self.builder.sampled_image_type(image_type);
        let id = self.emit(Op::SampledImage, sampled_type, &[image, sampler]);
        if non_uniform {
            self.decorate_non_uniform(id);
        }
        self.combined_image_sampler_cache
            .insert((image, sampler, non_uniform), id);
        Ok(id)
    }

    pub fn decorate_non_uniform(&mut self, id: Id) {
        self.builder
            .add_capability(spirv::Capability::ShaderNonUniform);
        self.builder.decorate(id, Decoration::NonUniform, &[]);
    }

    /// Sample count visible to the shader; a specialization constant when so configured.
    pub fn rasterizer_sample_count_id(&mut self) -> Id {
        if let Some(id) = self.rasterizer_sample_count {
            return id;
        }
        let count = self.options.rasterizer_sample_count;
        let id = if self.options.rasterizer_sample_count_spec_constant {
            self.builder.spec_constant_u32(0, count)
        } else {
            self.builder.constant_u32(count)
        };
        self.rasterizer_sample_count = Some(id);
        id
    }
}
