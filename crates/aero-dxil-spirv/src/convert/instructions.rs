//! Lowering of plain LLVM instructions.

use spirv::{Op, StorageClass};

use crate::dxil::{
    AddressSpace, AtomicRmwOp, BinaryOp, CastOp, FunctionId, Instruction, InstructionKind,
    Predicate, Type, ValueId, DX_OP_PREFIX,
};
use crate::error::{ConvertError, Result};
use crate::spv::{Id, Operation};

use super::context::{ConvertContext, GlobalResourceRef};

/// `Workgroup` memory scope; DXIL pointers reach atomics only through groupshared memory.
const SCOPE_WORKGROUP: u32 = 2;

fn binary_op(op: BinaryOp) -> Op {
    match op {
        BinaryOp::FAdd => Op::FAdd,
        BinaryOp::FSub => Op::FSub,
        BinaryOp::FMul => Op::FMul,
        BinaryOp::FDiv => Op::FDiv,
        BinaryOp::FRem => Op::FRem,
        BinaryOp::Add => Op::IAdd,
        BinaryOp::Sub => Op::ISub,
        BinaryOp::Mul => Op::IMul,
        BinaryOp::SDiv => Op::SDiv,
        BinaryOp::UDiv => Op::UDiv,
        BinaryOp::SRem => Op::SRem,
        BinaryOp::URem => Op::UMod,
        BinaryOp::Shl => Op::ShiftLeftLogical,
        BinaryOp::LShr => Op::ShiftRightLogical,
        BinaryOp::AShr => Op::ShiftRightArithmetic,
        BinaryOp::And => Op::BitwiseAnd,
        BinaryOp::Or => Op::BitwiseOr,
        BinaryOp::Xor => Op::BitwiseXor,
    }
}

fn compare_op(predicate: Predicate, boolean: bool) -> Option<Op> {
    Some(match predicate {
        Predicate::FcmpOeq => Op::FOrdEqual,
        Predicate::FcmpOgt => Op::FOrdGreaterThan,
        Predicate::FcmpOge => Op::FOrdGreaterThanEqual,
        Predicate::FcmpOlt => Op::FOrdLessThan,
        Predicate::FcmpOle => Op::FOrdLessThanEqual,
        Predicate::FcmpOne => Op::FOrdNotEqual,
        Predicate::FcmpOrd => Op::Ordered,
        Predicate::FcmpUno => Op::Unordered,
        Predicate::FcmpUeq => Op::FUnordEqual,
        Predicate::FcmpUgt => Op::FUnordGreaterThan,
        Predicate::FcmpUge => Op::FUnordGreaterThanEqual,
        Predicate::FcmpUlt => Op::FUnordLessThan,
        Predicate::FcmpUle => Op::FUnordLessThanEqual,
        Predicate::FcmpUne => Op::FUnordNotEqual,
        Predicate::IcmpEq if boolean => Op::LogicalEqual,
        Predicate::IcmpNe if boolean => Op::LogicalNotEqual,
        Predicate::IcmpEq => Op::IEqual,
        Predicate::IcmpNe => Op::INotEqual,
        Predicate::IcmpUgt => Op::UGreaterThan,
        Predicate::IcmpUge => Op::UGreaterThanEqual,
        Predicate::IcmpUlt => Op::ULessThan,
        Predicate::IcmpUle => Op::ULessThanEqual,
        Predicate::IcmpSgt => Op::SGreaterThan,
        Predicate::IcmpSge => Op::SGreaterThanEqual,
        Predicate::IcmpSlt => Op::SLessThan,
        Predicate::IcmpSle => Op::SLessThanEqual,
        Predicate::FcmpFalse | Predicate::FcmpTrue => return None,
    })
}

impl ConvertContext<'_> {
    /// Lowers one non-phi instruction into the current operation list.
    pub fn emit_instruction(&mut self, instruction: &Instruction) -> Result<()> {
        let result = instruction.result;
        let value = || {
            result.ok_or_else(|| ConvertError::internal("value-producing instruction has no result"))
        };
        match &instruction.kind {
            InstructionKind::Binary { op, lhs, rhs } => self.emit_binary(value()?, *op, *lhs, *rhs),
            InstructionKind::FNeg { operand } => {
                let operand = self.get_id_for_value(*operand)?;
                self.emit_for(Op::FNegate, value()?, &[operand]).map(drop)
            }
            InstructionKind::Cast { op, operand } => self.emit_cast(value()?, *op, *operand),
            InstructionKind::GetElementPtr {
                base,
                indices,
                in_bounds,
            } => self.emit_getelementptr(value()?, *base, indices, *in_bounds),
            InstructionKind::Load { ptr } => self.emit_load(value()?, *ptr),
            InstructionKind::Store { ptr, value } => self.emit_store(*ptr, *value),
            InstructionKind::Compare {
                predicate,
                lhs,
                rhs,
            } => self.emit_compare(value()?, *predicate, *lhs, *rhs),
            InstructionKind::ExtractValue { aggregate, indices } => {
                let result = value()?;
                let aggregate = self.get_id_for_value(*aggregate)?;
                let id = self.get_id_for_value(result)?;
                let type_id = self.get_type_id_for_value(result)?;
                let mut operation = Operation::with_result(Op::CompositeExtract, id, type_id);
                operation.add_id(aggregate).add_literals(indices);
                self.push(operation);
                Ok(())
            }
            InstructionKind::Alloca {
                allocated,
                array_size,
            } => self.emit_alloca(value()?, allocated, *array_size),
            InstructionKind::Select {
                condition,
                true_value,
                false_value,
            } => {
                let operands = [
                    self.get_id_for_value(*condition)?,
                    self.get_id_for_value(*true_value)?,
                    self.get_id_for_value(*false_value)?,
                ];
                self.emit_for(Op::Select, value()?, &operands).map(drop)
            }
            InstructionKind::AtomicRmw { op, ptr, value: v } => {
                self.emit_atomicrmw(value()?, *op, *ptr, *v)
            }
            InstructionKind::CmpXchg {
                ptr,
                comparator,
                new_value,
            } => self.emit_cmpxchg(value()?, *ptr, *comparator, *new_value),
            InstructionKind::ShuffleVector { lhs, rhs, mask } => {
                let result = value()?;
                let lhs = self.get_id_for_value(*lhs)?;
                let rhs = self.get_id_for_value(*rhs)?;
                let id = self.get_id_for_value(result)?;
                let type_id = self.get_type_id_for_value(result)?;
                let mut operation = Operation::with_result(Op::VectorShuffle, id, type_id);
                operation.add_ids(&[lhs, rhs]);
                for &lane in mask {
                    operation.add_literal(if lane < 0 { u32::MAX } else { lane as u32 });
                }
                self.push(operation);
                Ok(())
            }
            InstructionKind::ExtractElement { vector, index } => {
                self.emit_extractelement(value()?, *vector, *index)
            }
            InstructionKind::InsertElement {
                vector,
                value: element,
                index,
            } => self.emit_insertelement(value()?, *vector, *element, *index),
            InstructionKind::Phi { .. } => Err(ConvertError::internal(
                "phi nodes are collected per block, not emitted in sequence",
            )),
            InstructionKind::Call { callee, args } => self.emit_call(result, *callee, args),
        }
    }

    fn emit_call(&mut self, result: Option<ValueId>, callee: FunctionId, args: &[ValueId]) -> Result<()> {
        let name = &self.module.function(callee).name;
        if name.starts_with(DX_OP_PREFIX) {
            self.emit_dxil_instruction(result, callee, args)
        } else {
            Err(ConvertError::unsupported(format!("call to {name}")))
        }
    }

    fn emit_binary(&mut self, result: ValueId, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> Result<()> {
        let lhs_id = self.get_id_for_value(lhs)?;
        let rhs_id = self.get_id_for_value(rhs)?;

        if self.module.value_type(lhs).scalar().is_bool() {
            let module = self.module;
            let is_true = |v: ValueId| module.value(v).as_const_int().is_some_and(|c| c != 0);
            let spv_op = match op {
                BinaryOp::And => Op::LogicalAnd,
                BinaryOp::Or => Op::LogicalOr,
                // xor with true is a negation.
                BinaryOp::Xor if is_true(rhs) => {
                    return self.emit_for(Op::LogicalNot, result, &[lhs_id]).map(drop)
                }
                BinaryOp::Xor if is_true(lhs) => {
                    return self.emit_for(Op::LogicalNot, result, &[rhs_id]).map(drop)
                }
                BinaryOp::Xor => Op::LogicalNotEqual,
                other => {
                    return Err(ConvertError::unsupported(format!(
                        "{other:?} on booleans"
                    )))
                }
            };
            return self.emit_for(spv_op, result, &[lhs_id, rhs_id]).map(drop);
        }

        self.emit_for(binary_op(op), result, &[lhs_id, rhs_id])
            .map(drop)
    }

    /// `(one, zero)` of `ty` as produced by extending a boolean.
    fn boolean_conversion_constants(&mut self, ty: &Type, signed: bool) -> Result<(Id, Id)> {
        let scalar = ty.scalar();
        let scalar_id = self.get_type_id(scalar)?;
        let (one, zero) = match scalar {
            Type::Half => (
                self.builder.constant_f16_bits(if signed { 0xbc00 } else { 0x3c00 }),
                self.builder.constant_f16_bits(0),
            ),
            Type::Float => (
                self.builder.constant_f32(if signed { -1.0 } else { 1.0 }),
                self.builder.constant_f32(0.0),
            ),
            Type::Double => (
                self.builder.constant_f64(if signed { -1.0 } else { 1.0 }),
                self.builder.constant_f64(0.0),
            ),
            Type::Int(width) if *width > 1 => {
                let all_ones = if *width >= 64 {
                    u64::MAX
                } else {
                    (1u64 << width) - 1
                };
                (
                    self.builder
                        .constant_scalar(scalar_id, if signed { all_ones } else { 1 }),
                    self.builder.constant_scalar(scalar_id, 0),
                )
            }
            other => {
                return Err(ConvertError::unsupported(format!(
                    "boolean conversion to {other}"
                )))
            }
        };
        match ty.vector_len() {
            Some(len) => {
                let vector = self.get_type_id(ty)?;
                Ok((
                    self.build_constant_vector(vector, &vec![one; len as usize]),
                    self.build_constant_vector(vector, &vec![zero; len as usize]),
                ))
            }
            None => Ok((one, zero)),
        }
    }

    /// Scalar or splatted constant of `type_id`.
    pub(crate) fn splat_constant(&mut self, type_id: Id, bits: u64) -> Id {
        let scalar = self.builder.scalar_type_of(type_id);
        let value = self.builder.constant_scalar(scalar, bits);
        match self.builder.vector_size_of(type_id) {
            1 => value,
            n => self.build_constant_vector(type_id, &vec![value; n as usize]),
        }
    }

    fn emit_cast(&mut self, result: ValueId, op: CastOp, operand: ValueId) -> Result<()> {
        let source_ty = self.module.value_type(operand).clone();
        let result_ty = self.module.value_type(result).clone();
        let operand_id = self.get_id_for_value(operand)?;

        if source_ty.scalar().is_bool() {
            let signed = match op {
                CastOp::SExt | CastOp::SIToFP => true,
                CastOp::ZExt | CastOp::UIToFP => false,
                other => {
                    return Err(ConvertError::unsupported(format!(
                        "{other:?} from a boolean"
                    )))
                }
            };
            let (one, zero) = self.boolean_conversion_constants(&result_ty, signed)?;
            return self
                .emit_for(Op::Select, result, &[operand_id, one, zero])
                .map(drop);
        }

        let spv_op = match op {
            CastOp::Trunc if result_ty.scalar().is_bool() => {
                let source = self.get_type_id(&source_ty)?;
                let one = self.splat_constant(source, 1);
                let zero = self.splat_constant(source, 0);
                let masked = self.emit(Op::BitwiseAnd, source, &[operand_id, one]);
                return self
                    .emit_for(Op::INotEqual, result, &[masked, zero])
                    .map(drop);
            }
            CastOp::Trunc | CastOp::ZExt => Op::UConvert,
            CastOp::SExt => Op::SConvert,
            CastOp::FPTrunc | CastOp::FPExt => Op::FConvert,
            CastOp::FPToUI => Op::ConvertFToU,
            CastOp::FPToSI => Op::ConvertFToS,
            CastOp::UIToFP => Op::ConvertUToF,
            CastOp::SIToFP => Op::ConvertSToF,
            CastOp::BitCast if source_ty.is_pointer() => {
                return self.emit_pointer_bitcast(result, operand, operand_id, &source_ty)
            }
            CastOp::BitCast => Op::Bitcast,
            other => return Err(ConvertError::unsupported(format!("{other:?} casts"))),
        };
        self.emit_for(spv_op, result, &[operand_id]).map(drop)
    }

    /// Pointer casts keep the source pointer; loads and stores through it convert the value.
    fn emit_pointer_bitcast(
        &mut self,
        result: ValueId,
        operand: ValueId,
        operand_id: Id,
        source_ty: &Type,
    ) -> Result<()> {
        let storage = self.storage_class_of(operand)?;
        let pointee = source_ty
            .pointee()
            .ok_or_else(|| ConvertError::internal("pointer type without pointee"))?
            .clone();
        let value_type = match self.actual_type.get(&operand) {
            Some(&actual) => actual,
            None => self.get_type_id(&pointee)?,
        };
        let pointer_type = self.builder.pointer_type(storage, value_type);
        self.emit_as(Op::CopyObject, result, pointer_type, &[operand_id])?;
        self.actual_type.insert(result, value_type);
        self.pointer_storage.insert(result, storage);
        Ok(())
    }

    fn emit_getelementptr(
        &mut self,
        result: ValueId,
        base: ValueId,
        indices: &[ValueId],
        in_bounds: bool,
    ) -> Result<()> {
        if let Some(&reference) = self.global_resource_mapping.get(&base) {
            if indices.len() != 2 || !self.module.value(indices[0]).is_constant() {
                return Err(ConvertError::unsupported(
                    "resource array access must use a constant leading index and one array index",
                ));
            }
            self.global_resource_mapping.insert(
                result,
                GlobalResourceRef {
                    offset: Some(indices[1]),
                    ..reference
                },
            );
            return Ok(());
        }

        match indices.first() {
            Some(&first) if self.module.value(first).as_const_int() == Some(0) => {}
            _ => {
                return Err(ConvertError::unsupported(
                    "pointer arithmetic: the first index must be constant zero",
                ))
            }
        }

        let storage = self.storage_class_of(base)?;
        let pointee = self
            .module
            .value_type(result)
            .pointee()
            .ok_or_else(|| ConvertError::internal("getelementptr does not produce a pointer"))?
            .clone();
        let pointee = self.get_type_id(&pointee)?;
        let pointer_type = self.builder.pointer_type(storage, pointee);

        let mut operands = Vec::with_capacity(indices.len());
        operands.push(self.get_id_for_value(base)?);
        for &index in &indices[1..] {
            operands.push(self.get_id_for_value(index)?);
        }
        let op = if in_bounds {
            Op::InBoundsAccessChain
        } else {
            Op::AccessChain
        };
        self.emit_as(op, result, pointer_type, &operands)?;
        self.pointer_storage.insert(result, storage);
        Ok(())
    }

    fn emit_load(&mut self, result: ValueId, ptr: ValueId) -> Result<()> {
        if let Some(&reference) = self.global_resource_mapping.get(&ptr) {
            self.global_resource_mapping.insert(result, reference);
            return Ok(());
        }
        let ptr_id = self.get_id_for_value(ptr)?;
        match self.actual_type.get(&ptr).copied() {
            Some(actual) => {
                let loaded = self.emit(Op::Load, actual, &[ptr_id]);
                self.emit_for(Op::Bitcast, result, &[loaded])?;
            }
            None => {
                self.emit_for(Op::Load, result, &[ptr_id])?;
            }
        }
        Ok(())
    }

    fn emit_store(&mut self, ptr: ValueId, value: ValueId) -> Result<()> {
        let ptr_id = self.get_id_for_value(ptr)?;
        let mut value_id = self.get_id_for_value(value)?;
        if let Some(actual) = self.actual_type.get(&ptr).copied() {
            value_id = self.emit(Op::Bitcast, actual, &[value_id]);
        }
        self.emit_void(Op::Store, &[ptr_id, value_id]);
        Ok(())
    }

    fn emit_compare(
        &mut self,
        result: ValueId,
        predicate: Predicate,
        lhs: ValueId,
        rhs: ValueId,
    ) -> Result<()> {
        let boolean = self.module.value_type(lhs).scalar().is_bool();
        let Some(op) = compare_op(predicate, boolean) else {
            let constant = self
                .builder
                .constant_bool(predicate == Predicate::FcmpTrue);
            return self.define_value(result, constant);
        };
        let operands = [self.get_id_for_value(lhs)?, self.get_id_for_value(rhs)?];
        self.emit_for(op, result, &operands).map(drop)
    }

    fn emit_alloca(&mut self, result: ValueId, allocated: &Type, array_size: ValueId) -> Result<()> {
        if self.module.value(array_size).as_const_int() != Some(1) {
            return Err(ConvertError::unsupported("alloca with an array size other than 1"));
        }
        if self.module.value_type(result).address_space() != Some(AddressSpace::Thread) {
            return Err(ConvertError::unsupported("alloca outside of thread-local memory"));
        }
        let pointee = self.get_type_id(allocated)?;
        let (storage, var) = match self.payload_locations.get(&result).copied() {
            Some(location) => {
                let var = self
                    .builder
                    .variable(StorageClass::RayPayloadKHR, pointee, "payload");
                self.builder
                    .decorate(var, spirv::Decoration::Location, &[location]);
                (StorageClass::RayPayloadKHR, var)
            }
            None => (
                StorageClass::Function,
                self.builder.variable(StorageClass::Function, pointee, ""),
            ),
        };
        self.pointer_storage.insert(result, storage);
        self.define_value(result, var)
    }

    fn emit_atomicrmw(&mut self, result: ValueId, op: AtomicRmwOp, ptr: ValueId, value: ValueId) -> Result<()> {
        let spv_op = match op {
            AtomicRmwOp::Xchg => Op::AtomicExchange,
            AtomicRmwOp::Add => Op::AtomicIAdd,
            AtomicRmwOp::Sub => Op::AtomicISub,
            AtomicRmwOp::And => Op::AtomicAnd,
            AtomicRmwOp::Or => Op::AtomicOr,
            AtomicRmwOp::Xor => Op::AtomicXor,
            AtomicRmwOp::Max => Op::AtomicSMax,
            AtomicRmwOp::Min => Op::AtomicSMin,
            AtomicRmwOp::UMax => Op::AtomicUMax,
            AtomicRmwOp::UMin => Op::AtomicUMin,
            AtomicRmwOp::Nand => {
                return Err(ConvertError::unsupported("atomicrmw nand"))
            }
        };
        let scope = self.builder.constant_u32(SCOPE_WORKGROUP);
        let semantics = self.builder.constant_u32(0);
        let operands = [
            self.get_id_for_value(ptr)?,
            scope,
            semantics,
            self.get_id_for_value(value)?,
        ];
        self.emit_for(spv_op, result, &operands).map(drop)
    }

    fn emit_cmpxchg(
        &mut self,
        result: ValueId,
        ptr: ValueId,
        comparator: ValueId,
        new_value: ValueId,
    ) -> Result<()> {
        let u32_type = self.builder.uint_type(32);
        let bool_type = self.builder.bool_type();
        let scope = self.builder.constant_u32(SCOPE_WORKGROUP);
        let semantics = self.builder.constant_u32(0);
        let ptr = self.get_id_for_value(ptr)?;
        let comparator = self.get_id_for_value(comparator)?;
        let new_value = self.get_id_for_value(new_value)?;

        let original = self.emit(
            Op::AtomicCompareExchange,
            u32_type,
            &[ptr, scope, semantics, semantics, new_value, comparator],
        );
        let exchanged = self.emit(Op::IEqual, bool_type, &[original, comparator]);

        let pair = match self.cmpxchg_type {
            Some(ty) => ty,
            None => {
                let ty = self.get_struct_type(&[u32_type, bool_type], "CmpXchgResult");
                self.cmpxchg_type = Some(ty);
                ty
            }
        };
        self.emit_as(Op::CompositeConstruct, result, pair, &[original, exchanged])
            .map(drop)
    }

    fn emit_extractelement(&mut self, result: ValueId, vector: ValueId, index: ValueId) -> Result<()> {
        let vector_id = self.get_id_for_value(vector)?;
        match self.module.value(index).as_const_int() {
            Some(lane) => {
                let id = self.get_id_for_value(result)?;
                let type_id = self.get_type_id_for_value(result)?;
                let mut operation = Operation::with_result(Op::CompositeExtract, id, type_id);
                operation.add_id(vector_id).add_literal(lane as u32);
                self.push(operation);
                Ok(())
            }
            None => {
                let index_id = self.get_id_for_value(index)?;
                self.emit_for(Op::VectorExtractDynamic, result, &[vector_id, index_id])
                    .map(drop)
            }
        }
    }

    fn emit_insertelement(
        &mut self,
        result: ValueId,
        vector: ValueId,
        element: ValueId,
        index: ValueId,
    ) -> Result<()> {
        let vector_id = self.get_id_for_value(vector)?;
        let element_id = self.get_id_for_value(element)?;
        match self.module.value(index).as_const_int() {
            Some(lane) => {
                let id = self.get_id_for_value(result)?;
                let type_id = self.get_type_id_for_value(result)?;
                let mut operation = Operation::with_result(Op::CompositeInsert, id, type_id);
                operation
                    .add_ids(&[element_id, vector_id])
                    .add_literal(lane as u32);
                self.push(operation);
                Ok(())
            }
            None => {
                let index_id = self.get_id_for_value(index)?;
                self.emit_for(
                    Op::VectorInsertDynamic,
                    result,
                    &[vector_id, element_id, index_id],
                )
                .map(drop)
            }
        }
    }
}
