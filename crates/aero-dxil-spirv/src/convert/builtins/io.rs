//! Signature element access, built-in shader inputs and geometry stream control.

use spirv::{BuiltIn, Capability, ExecutionModel, Op, StorageClass};

use crate::dxil::{DxOp, Semantic, ValueId, ValueKind};
use crate::error::{ConvertError, Result};
use crate::spv::{Id, TypeDecl};

use super::super::context::{ClipCullMeta, ConvertContext, ElementMeta};
use super::arg;

/// Identity output swizzle (`xyzw`).
const IDENTITY_SWIZZLE: u32 = 0b11_10_01_00;

/// `SampleMask` is an array even though coverage is a single scalar row.
fn is_arrayed_builtin(semantic: Semantic) -> bool {
    semantic == Semantic::Coverage
}

impl ConvertContext<'_> {
    fn innermost_scalar(&self, mut ty: Id) -> Id {
        loop {
            match self.builder.type_decl(ty) {
                Some(TypeDecl::Array { element, .. } | TypeDecl::RuntimeArray { element, .. }) => {
                    ty = *element
                }
                Some(TypeDecl::Vector { component, .. }) => ty = *component,
                _ => return ty,
            }
        }
    }

    /// Pointer to one scalar of `var`, with its storage class and scalar type.
    fn scalar_pointer(&mut self, var: Id, indices: &[Id]) -> Result<(Id, Id)> {
        let decl = self
            .builder
            .variable_decl(var)
            .cloned()
            .ok_or_else(|| ConvertError::internal(format!("%{var} is not a variable")))?;
        let scalar = self.innermost_scalar(decl.pointee);
        if indices.is_empty() {
            return Ok((var, scalar));
        }
        let pointer_type = self.builder.pointer_type(decl.storage, scalar);
        let mut operands = Vec::with_capacity(indices.len() + 1);
        operands.push(var);
        operands.extend_from_slice(indices);
        Ok((self.emit(Op::AccessChain, pointer_type, &operands), scalar))
    }

    /// Converts between the scalar type a variable stores and the one DXIL computes with.
    fn convert_scalar(&mut self, id: Id, from: Id, to: Id) -> Id {
        if from == to {
            return id;
        }
        match (self.builder.type_decl(from), self.builder.type_decl(to)) {
            (Some(TypeDecl::Bool), _) => {
                let ones = self.builder.constant_scalar(to, u64::from(u32::MAX));
                let zero = self.builder.constant_scalar(to, 0);
                self.emit(Op::Select, to, &[id, ones, zero])
            }
            (_, Some(TypeDecl::Bool)) => {
                let bool_type = self.builder.bool_type();
                let zero = self.builder.constant_scalar(from, 0);
                self.emit(Op::INotEqual, bool_type, &[id, zero])
            }
            _ => self.emit(Op::Bitcast, to, &[id]),
        }
    }

    fn inputs_are_per_vertex(&self) -> bool {
        matches!(
            self.execution_model,
            ExecutionModel::Geometry
                | ExecutionModel::TessellationControl
                | ExecutionModel::TessellationEvaluation
        )
    }

    /// Index of the output control point written by the current hull invocation.
    fn invocation_id(&mut self) -> Result<Id> {
        let var = self
            .builder
            .builtin_shader_input(BuiltIn::InvocationId)
            .ok_or_else(|| ConvertError::internal("InvocationId input is unavailable"))?;
        let u32_type = self.builder.uint_type(32);
        Ok(self.emit(Op::Load, u32_type, &[var]))
    }

    fn element_indices(
        &mut self,
        meta: &ElementMeta,
        vertex: Option<Id>,
        row: ValueId,
        col: u32,
    ) -> Result<Vec<Id>> {
        let mut indices = Vec::with_capacity(3);
        if meta.per_vertex {
            let vertex = match vertex {
                Some(vertex) => vertex,
                None => self.invocation_id()?,
            };
            indices.push(vertex);
        }
        if meta.rows > 1 || is_arrayed_builtin(meta.semantic) {
            indices.push(self.get_id_for_value(row)?);
        }
        if meta.cols > 1 {
            indices.push(self.builder.constant_u32(col));
        }
        Ok(indices)
    }

    /// Element of the combined clip or cull distance array: `offset + row * cols + col`.
    fn clip_cull_pointer(
        &mut self,
        storage: StorageClass,
        clip: ClipCullMeta,
        vertex: Option<Id>,
        row: ValueId,
        col: u32,
    ) -> Result<(Id, Id)> {
        let var = self
            .clip_cull_variables
            .get(&(storage, clip.builtin))
            .copied()
            .ok_or_else(|| {
                ConvertError::internal(format!("{:?} {storage:?} array is undeclared", clip.builtin))
            })?;
        let u32_type = self.builder.uint_type(32);
        let index = match self.module.value(row).as_const_int() {
            Some(row) => self
                .builder
                .constant_u32(clip.offset + row as u32 * clip.cols + col),
            None => {
                let row = self.get_id_for_value(row)?;
                let cols = self.builder.constant_u32(clip.cols);
                let scaled = self.emit(Op::IMul, u32_type, &[row, cols]);
                self.build_offset(scaled, clip.offset + col)
            }
        };
        let mut indices = Vec::with_capacity(2);
        indices.extend(vertex);
        indices.push(index);
        self.scalar_pointer(var, &indices)
    }

    pub(super) fn emit_load_input(&mut self, result: ValueId, args: &[ValueId]) -> Result<()> {
        let element = self.const_u32_operand(arg(args, 1)?, "loadInput element id")?;
        let row = arg(args, 2)?;
        let col = self.const_u32_operand(arg(args, 3)?, "loadInput column")?;
        let vertex = match args.get(4) {
            Some(&vertex) if !matches!(self.module.value(vertex).kind, ValueKind::Undef) => {
                Some(self.get_id_for_value(vertex)?)
            }
            _ => None,
        };

        let (pointer, scalar) = if let Some(clip) = self.input_clip_cull.get(&element).copied() {
            let vertex = if self.inputs_are_per_vertex() { vertex } else { None };
            self.clip_cull_pointer(StorageClass::Input, clip, vertex, row, col)?
        } else {
            let meta = self
                .inputs
                .get(&element)
                .copied()
                .ok_or_else(|| ConvertError::malformed(format!("input element {element}")))?;
            let indices = self.element_indices(&meta, vertex, row, col)?;
            self.scalar_pointer(meta.id, &indices)?
        };
        self.emit_element_load(result, pointer, scalar)
    }

    fn emit_element_load(&mut self, result: ValueId, pointer: Id, scalar: Id) -> Result<()> {
        let loaded = self.emit(Op::Load, scalar, &[pointer]);
        let result_type = self.get_type_id_for_value(result)?;
        let converted = self.convert_scalar(loaded, scalar, result_type);
        self.define_value(result, converted)
    }

    fn emit_element_store(&mut self, pointer: Id, scalar: Id, value: ValueId) -> Result<()> {
        let value_type = self.get_type_id_for_value(value)?;
        let id = self.get_id_for_value(value)?;
        let converted = self.convert_scalar(id, value_type, scalar);
        self.emit_void(Op::Store, &[pointer, converted]);
        Ok(())
    }

    pub(super) fn emit_store_output(&mut self, args: &[ValueId]) -> Result<()> {
        let element = self.const_u32_operand(arg(args, 1)?, "storeOutput element id")?;
        let row = arg(args, 2)?;
        let col = self.const_u32_operand(arg(args, 3)?, "storeOutput column")?;
        let value = arg(args, 4)?;

        if let Some(clip) = self.output_clip_cull.get(&element).copied() {
            let vertex = if self.execution_model == ExecutionModel::TessellationControl {
                Some(self.invocation_id()?)
            } else {
                None
            };
            let (pointer, scalar) =
                self.clip_cull_pointer(StorageClass::Output, clip, vertex, row, col)?;
            return self.emit_element_store(pointer, scalar, value);
        }

        let meta = self
            .outputs
            .get(&element)
            .copied()
            .ok_or_else(|| ConvertError::malformed(format!("output element {element}")))?;

        if meta.semantic == Semantic::Target {
            let swizzle = self
                .options
                .output_swizzles
                .get(meta.rt_index as usize)
                .copied()
                .unwrap_or(IDENTITY_SWIZZLE);
            // Every destination lane sourcing this column receives the value.
            for lane in 0..meta.cols.max(1) {
                if (swizzle >> (2 * lane)) & 3 != col {
                    continue;
                }
                let indices = self.element_indices(&meta, None, row, lane)?;
                let (pointer, scalar) = self.scalar_pointer(meta.id, &indices)?;
                self.emit_element_store(pointer, scalar, value)?;
            }
            return Ok(());
        }

        let indices = self.element_indices(&meta, None, row, col)?;
        let (pointer, scalar) = self.scalar_pointer(meta.id, &indices)?;
        self.emit_element_store(pointer, scalar, value)
    }

    fn patch_element(&self, element: u32) -> Result<ElementMeta> {
        self.patches
            .get(&element)
            .copied()
            .ok_or_else(|| ConvertError::malformed(format!("patch constant element {element}")))
    }

    pub(super) fn emit_load_patch_constant(&mut self, result: ValueId, args: &[ValueId]) -> Result<()> {
        let element = self.const_u32_operand(arg(args, 1)?, "loadPatchConstant element id")?;
        let meta = self.patch_element(element)?;
        let col = self.const_u32_operand(arg(args, 3)?, "loadPatchConstant column")?;
        let indices = self.element_indices(&meta, None, arg(args, 2)?, col)?;
        let (pointer, scalar) = self.scalar_pointer(meta.id, &indices)?;
        self.emit_element_load(result, pointer, scalar)
    }

    pub(super) fn emit_store_patch_constant(&mut self, args: &[ValueId]) -> Result<()> {
        let element = self.const_u32_operand(arg(args, 1)?, "storePatchConstant element id")?;
        let meta = self.patch_element(element)?;
        let col = self.const_u32_operand(arg(args, 3)?, "storePatchConstant column")?;
        let indices = self.element_indices(&meta, None, arg(args, 2)?, col)?;
        let (pointer, scalar) = self.scalar_pointer(meta.id, &indices)?;
        self.emit_element_store(pointer, scalar, arg(args, 4)?)
    }

    pub(super) fn emit_builtin_load(&mut self, result: ValueId, op: DxOp, args: &[ValueId]) -> Result<()> {
        let (builtin, indexed) = match op {
            DxOp::ThreadId => (BuiltIn::GlobalInvocationId, true),
            DxOp::GroupId => (BuiltIn::WorkgroupId, true),
            DxOp::ThreadIdInGroup => (BuiltIn::LocalInvocationId, true),
            DxOp::FlattenedThreadIdInGroup => (BuiltIn::LocalInvocationIndex, false),
            DxOp::GSInstanceID | DxOp::OutputControlPointID => (BuiltIn::InvocationId, false),
            DxOp::PrimitiveID => (BuiltIn::PrimitiveId, false),
            DxOp::DomainLocation => (BuiltIn::TessCoord, true),
            other => {
                return Err(ConvertError::internal(format!(
                    "{other:?} is not a built-in load"
                )))
            }
        };
        let var = self
            .builder
            .builtin_shader_input(builtin)
            .ok_or_else(|| ConvertError::internal(format!("{builtin:?} input is unavailable")))?;
        let pointee = self
            .builder
            .variable_decl(var)
            .map(|decl| decl.pointee)
            .ok_or_else(|| ConvertError::internal(format!("%{var} is not a variable")))?;

        if !indexed {
            return self.emit_for(Op::Load, result, &[var]).map(drop);
        }
        let component = self.const_u32_operand(arg(args, 1)?, "built-in component")?;
        let loaded = self.emit(Op::Load, pointee, &[var]);
        let scalar = self.builder.scalar_type_of(pointee);
        let extracted = self.emit_with_literals(Op::CompositeExtract, scalar, &[loaded], &[component]);
        self.define_value(result, extracted)
    }

    pub(super) fn emit_stream_instruction(&mut self, op: DxOp, args: &[ValueId]) -> Result<()> {
        let stream = self.const_u32_operand(arg(args, 1)?, "geometry stream")?;
        let emit = matches!(op, DxOp::EmitStream | DxOp::EmitThenCutStream);
        let cut = matches!(op, DxOp::CutStream | DxOp::EmitThenCutStream);

        if stream == 0 {
            if emit {
                self.emit_void(Op::EmitVertex, &[]);
            }
            if cut {
                self.emit_void(Op::EndPrimitive, &[]);
            }
            return Ok(());
        }

        self.builder.add_capability(Capability::GeometryStreams);
        let stream = self.builder.constant_u32(stream);
        if emit {
            self.emit_void(Op::EmitStreamVertex, &[stream]);
        }
        if cut {
            self.emit_void(Op::EndStreamPrimitive, &[stream]);
        }
        Ok(())
    }
}
