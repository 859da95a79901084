//! Module-scope variables: ray payload and hit attribute parameters, group-shared memory and
//! constant lookup tables.

use spirv::{Decoration, ExecutionModel, StorageClass};
use tracing::{debug, warn};

use crate::dxil::{AddressSpace, Type, ValueKind};
use crate::error::{ConvertError, Result};

use super::context::ConvertContext;

impl ConvertContext<'_> {
    fn has_incoming_payload(&self) -> bool {
        self.is_ray_tracing() && self.execution_model != ExecutionModel::RayGenerationKHR
    }

    fn has_hit_attribute(&self) -> bool {
        matches!(
            self.execution_model,
            ExecutionModel::AnyHitKHR | ExecutionModel::ClosestHitKHR | ExecutionModel::IntersectionKHR
        )
    }

    /// Declares the variable behind pointer parameter `index` of the entry function.
    fn emit_entry_parameter(&mut self, index: usize, storage: StorageClass, name: &str) -> Result<Option<u32>> {
        let module = self.module;
        let Some(&arg) = module.function(self.entry.function).args.get(index) else {
            return Ok(None);
        };
        let pointee = module.value_type(arg).pointee().ok_or_else(|| {
            ConvertError::malformed(format!("entry parameter {index} is not a pointer"))
        })?;
        let pointee = self.get_type_id(pointee)?;
        let var = self.builder.variable(storage, pointee, name);
        self.pointer_storage.insert(arg, storage);
        self.bind_value(arg, var)?;
        Ok(Some(var))
    }

    pub fn emit_global_variables(&mut self) -> Result<()> {
        if self.has_incoming_payload() {
            if let Some(var) =
                self.emit_entry_parameter(0, StorageClass::IncomingRayPayloadKHR, "payload")?
            {
                self.builder.decorate(var, Decoration::Location, &[0]);
            }
        }
        if self.has_hit_attribute() {
            self.emit_entry_parameter(1, StorageClass::HitAttributeKHR, "hit")?;
        }

        let module = self.module;
        for global in module.globals() {
            // Resource globals are reached through the global resource mapping instead.
            if matches!(global.pointee.innermost_element(), Type::Struct { .. })
                || self.global_resource_mapping.contains_key(&global.value)
            {
                continue;
            }

            let initializer = global
                .initializer
                .filter(|&init| !matches!(module.value(init).kind, ValueKind::Undef));

            let storage = if global.address_space == AddressSpace::GroupShared {
                if initializer.is_some() {
                    warn!(name = %global.name, "ignoring the initializer of a group-shared variable");
                }
                StorageClass::Workgroup
            } else {
                if !global.is_constant {
                    return Err(ConvertError::unsupported(format!(
                        "mutable global {} outside group-shared memory",
                        global.name
                    )));
                }
                StorageClass::Private
            };

            let pointee = self.get_type_id(&global.pointee)?;
            let initializer = match (storage, initializer) {
                (StorageClass::Private, Some(init)) => Some(self.get_id_for_value(init)?),
                _ => None,
            };
            let var = self
                .builder
                .variable_with_initializer(storage, pointee, &global.name, initializer);
            debug!(name = %global.name, ?storage, "global variable");
            self.pointer_storage.insert(global.value, storage);
            self.bind_value(global.value, var)?;
        }
        Ok(())
    }
}
