use spirv::{Capability, Op};

use crate::dxil::{BarrierMode, ValueId};
use crate::error::{ConvertError, Result};

use super::super::context::{ConvertContext, HandleAccess};
use super::arg;

const SCOPE_DEVICE: u32 = 1;
const SCOPE_WORKGROUP: u32 = 2;

const SEMANTICS_ACQUIRE_RELEASE: u32 = 0x8;
const SEMANTICS_UNIFORM_MEMORY: u32 = 0x40;
const SEMANTICS_WORKGROUP_MEMORY: u32 = 0x100;
const SEMANTICS_IMAGE_MEMORY: u32 = 0x800;

/// Memory scope and semantics of a barrier mode.
fn barrier_memory(mode: BarrierMode) -> (u32, u32) {
    let scope = if mode.contains(BarrierMode::UAV_FENCE_GLOBAL) {
        SCOPE_DEVICE
    } else {
        SCOPE_WORKGROUP
    };
    let mut storage = 0;
    if mode.contains(BarrierMode::TGSM_FENCE) {
        storage |= SEMANTICS_WORKGROUP_MEMORY;
    }
    if mode.intersects(BarrierMode::UAV_FENCE_GLOBAL | BarrierMode::UAV_FENCE_THREAD_GROUP) {
        storage |= SEMANTICS_UNIFORM_MEMORY | SEMANTICS_IMAGE_MEMORY;
    }
    let semantics = if storage == 0 {
        0
    } else {
        SEMANTICS_ACQUIRE_RELEASE | storage
    };
    (scope, semantics)
}

impl ConvertContext<'_> {
    pub(super) fn emit_barrier(&mut self, args: &[ValueId]) -> Result<()> {
        let raw = self.const_u32_operand(arg(args, 1)?, "barrier mode")?;
        let mode = BarrierMode::from_bits_truncate(raw);
        let (scope, semantics) = barrier_memory(mode);
        let scope = self.builder.constant_u32(scope);
        let semantics = self.builder.constant_u32(semantics);

        if mode.contains(BarrierMode::SYNC_THREAD_GROUP) {
            let execution = self.builder.constant_u32(SCOPE_WORKGROUP);
            self.emit_void(Op::ControlBarrier, &[execution, scope, semantics]);
        } else {
            self.emit_void(Op::MemoryBarrier, &[scope, semantics]);
        }
        Ok(())
    }

    pub(super) fn emit_discard(&mut self, args: &[ValueId]) -> Result<()> {
        let condition = self.get_id_for_value(arg(args, 1)?)?;
        if self.options.shader_demote {
            self.builder
                .add_capability(Capability::DemoteToHelperInvocationEXT);
            self.builder
                .add_extension("SPV_EXT_demote_to_helper_invocation");
        }
        let void_type = self.builder.void_type();
        let function = self.builder.discard_function();
        self.emit(Op::FunctionCall, void_type, &[function, condition]);
        Ok(())
    }

    pub(super) fn emit_trace_ray(&mut self, args: &[ValueId]) -> Result<()> {
        let handle = arg(args, 1)?;
        let acceleration_structure = match self.handle_meta.get(&handle).map(|meta| meta.access) {
            Some(HandleAccess::AccelerationStructure(id)) => id,
            _ => {
                return Err(ConvertError::malformed(
                    "traceRay operand 1 is not an acceleration structure",
                ))
            }
        };

        let mut scalars = Vec::with_capacity(5);
        for i in 2..7 {
            scalars.push(self.get_id_for_value(arg(args, i)?)?);
        }
        let f32_type = self.builder.float_type(32);
        let mut origin = Vec::with_capacity(3);
        for i in 7..10 {
            origin.push(self.get_id_for_value(arg(args, i)?)?);
        }
        let origin = self.build_vector(f32_type, &origin);
        let t_min = self.get_id_for_value(arg(args, 10)?)?;
        let mut direction = Vec::with_capacity(3);
        for i in 11..14 {
            direction.push(self.get_id_for_value(arg(args, i)?)?);
        }
        let direction = self.build_vector(f32_type, &direction);
        let t_max = self.get_id_for_value(arg(args, 14)?)?;
        let payload = self.get_id_for_value(arg(args, 15)?)?;

        let mut operands = vec![acceleration_structure];
        operands.extend(scalars);
        operands.extend([origin, t_min, direction, t_max, payload]);
        self.emit_void(Op::TraceRayKHR, &operands);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_sync_without_fences_orders_nothing() {
        assert_eq!(
            barrier_memory(BarrierMode::SYNC_THREAD_GROUP),
            (SCOPE_WORKGROUP, 0)
        );
    }

    #[test]
    fn global_uav_fence_is_device_scoped() {
        let (scope, semantics) =
            barrier_memory(BarrierMode::SYNC_THREAD_GROUP | BarrierMode::UAV_FENCE_GLOBAL);
        assert_eq!(scope, SCOPE_DEVICE);
        assert_eq!(semantics, 0x8 | 0x40 | 0x800);
    }

    #[test]
    fn group_shared_fence_covers_workgroup_memory() {
        assert_eq!(
            barrier_memory(BarrierMode::TGSM_FENCE),
            (SCOPE_WORKGROUP, 0x8 | 0x100)
        );
    }
}
