//! Pre-pass over function bodies.
//!
//! Runs before any declaration is made: UAV formats and decorations depend on whether a range is
//! read or written, sparse feedback needs to know which `ResRet` values have their status field
//! consumed, and ray payload allocas need their locations before they are declared.

use spirv::Capability;
use tracing::debug;

use crate::dxil::{
    DxOp, FunctionId, InstructionKind, Module, ResourceClass, ShaderKind, ValueId, DX_OP_PREFIX,
};
use crate::error::Result;

use super::context::{ConvertContext, GlobalResourceRef, UavAccess};
use super::execution_modes::patch_constant_function;

/// Opcode of a `dx.op` call, or `None` for any other callee.
pub(crate) fn dx_opcode(module: &Module, callee: FunctionId, args: &[ValueId]) -> Option<DxOp> {
    if !module.function(callee).name.starts_with(DX_OP_PREFIX) {
        return None;
    }
    let raw = module.value(*args.first()?).as_const_int()?;
    DxOp::from_raw(raw as u32)
}

impl ConvertContext<'_> {
    pub fn analyze_instructions(&mut self) -> Result<()> {
        self.analyze_function(self.entry.function)?;
        if self.shader_kind == ShaderKind::Hull {
            let patch = patch_constant_function(self.module, self.entry)?;
            self.analyze_function(patch)?;
        }
        debug!(
            uavs = self.uav_access.len(),
            sparse = self.sparse_feedback.len(),
            payloads = self.payload_locations.len(),
            "analyzed function bodies"
        );
        Ok(())
    }

    fn analyze_function(&mut self, function: FunctionId) -> Result<()> {
        let module = self.module;
        for block in &module.function(function).blocks {
            for instruction in &block.instructions {
                let Some(result) = instruction.result else {
                    if let InstructionKind::Call { callee, args } = &instruction.kind {
                        self.analyze_dxil_call(None, *callee, args)?;
                    }
                    continue;
                };
                match &instruction.kind {
                    InstructionKind::Load { ptr } => {
                        if let Some(&reference) = self.global_resource_mapping.get(ptr) {
                            self.global_resource_mapping.insert(result, reference);
                        }
                    }
                    InstructionKind::GetElementPtr { base, indices, .. } => {
                        if let Some(&reference) = self.global_resource_mapping.get(base) {
                            self.global_resource_mapping.insert(
                                result,
                                GlobalResourceRef {
                                    offset: indices.get(1).copied(),
                                    ..reference
                                },
                            );
                        }
                    }
                    InstructionKind::ExtractValue { aggregate, indices } => {
                        if indices.as_slice() == [4] && self.potential_sparse.contains(aggregate) {
                            self.builder.add_capability(Capability::SparseResidency);
                            self.sparse_feedback.insert(*aggregate);
                        }
                    }
                    InstructionKind::Call { callee, args } => {
                        self.analyze_dxil_call(Some(result), *callee, args)?;
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn analyze_dxil_call(
        &mut self,
        result: Option<ValueId>,
        callee: FunctionId,
        args: &[ValueId],
    ) -> Result<()> {
        let Some(op) = dx_opcode(self.module, callee, args) else {
            return Ok(());
        };
        let arg = |i: usize| args.get(i).copied();

        match op {
            DxOp::CreateHandle => {
                let class = arg(1).and_then(|v| self.module.value(v).as_const_int());
                if class == Some(u64::from(ResourceClass::Uav.raw())) {
                    if let (Some(result), Some(range)) = (result, arg(2)) {
                        let range = self.const_u32_operand(range, "createHandle range id")?;
                        self.value_to_uav_index.insert(result, range);
                    }
                }
            }
            DxOp::CreateHandleForLib => {
                if let (Some(result), Some(resource)) = (result, arg(1)) {
                    if let Some(reference) = self.global_resource_mapping.get(&resource) {
                        if reference.class == ResourceClass::Uav {
                            self.value_to_uav_index.insert(result, reference.index);
                        }
                    }
                }
            }
            DxOp::BufferLoad | DxOp::TextureLoad | DxOp::RawBufferLoad => {
                self.mark_uav(arg(1), UavAccess::READ);
            }
            DxOp::BufferStore | DxOp::TextureStore | DxOp::RawBufferStore => {
                self.mark_uav(arg(1), UavAccess::WRITTEN);
            }
            DxOp::AtomicBinOp | DxOp::AtomicCompareExchange | DxOp::BufferUpdateCounter => {
                self.mark_uav(arg(1), UavAccess::READ | UavAccess::WRITTEN);
            }
            DxOp::TraceRay => {
                if let Some(&payload) = args.last() {
                    let next = self.payload_locations.len() as u32;
                    self.payload_locations.entry(payload).or_insert(next);
                }
            }
            _ => {}
        }

        if op.returns_resource_data() {
            if let Some(result) = result {
                self.potential_sparse.insert(result);
            }
        }
        Ok(())
    }

    fn mark_uav(&mut self, handle: Option<ValueId>, access: UavAccess) {
        let Some(index) = handle.and_then(|h| self.value_to_uav_index.get(&h).copied()) else {
            return;
        };
        *self.uav_access.entry(index).or_default() |= access;
    }
}
