//! Value and type translation.
//!
//! Every DXIL value is given exactly one SPIR-V id. Constants and undefs are materialized as
//! module-level declarations on first lookup; everything else gets an id the first time it is
//! referenced, which is what lets phi operands and other forward references resolve.

use spirv::{Capability, StorageClass};

use crate::dxil::{AddressSpace, ComponentType, Constant, Type, ValueId, ValueKind};
use crate::error::{ConvertError, Result};
use crate::spv::Id;

use super::context::ConvertContext;

impl ConvertContext<'_> {
    pub fn get_type_id(&mut self, ty: &Type) -> Result<Id> {
        Ok(match ty {
            Type::Void => self.builder.void_type(),
            Type::Half => {
                self.builder.add_capability(Capability::Float16);
                self.builder.float_type(16)
            }
            Type::Float => self.builder.float_type(32),
            Type::Double => {
                self.builder.add_capability(Capability::Float64);
                self.builder.float_type(64)
            }
            Type::Int(1) => self.builder.bool_type(),
            Type::Int(width) => self.uint_type_checked(*width)?,
            Type::Vector { element, len } => {
                let component = self.get_type_id(element)?;
                self.builder.vector_type(component, *len)
            }
            Type::Array { element, len } => {
                let element = self.get_type_id(element)?;
                self.builder.array_type(element, *len, 0)
            }
            Type::Struct { name, members } => {
                let mut member_ids = Vec::with_capacity(members.len());
                for member in members {
                    member_ids.push(self.get_type_id(member)?);
                }
                self.get_struct_type(&member_ids, name.as_deref().unwrap_or(""))
            }
            Type::Pointer {
                pointee,
                address_space,
            } => {
                let storage = storage_class_for(*address_space)?;
                let pointee = self.get_type_id(pointee)?;
                self.builder.pointer_type(storage, pointee)
            }
            Type::Function { .. } => {
                return Err(ConvertError::unsupported("function types have no value translation"))
            }
        })
    }

    fn uint_type_checked(&mut self, width: u32) -> Result<Id> {
        match width {
            8 => self.builder.add_capability(Capability::Int8),
            16 => self.builder.add_capability(Capability::Int16),
            32 => {}
            64 => self.builder.add_capability(Capability::Int64),
            other => {
                return Err(ConvertError::unsupported(format!("integer width {other}")))
            }
        }
        Ok(self.builder.uint_type(width))
    }

    /// Type of a signature element or resource component.
    ///
    /// Rows become an array and columns a vector; `force_array` keeps a single row arrayed.
    pub fn component_type_id(
        &mut self,
        component: ComponentType,
        rows: u32,
        cols: u32,
        force_array: bool,
    ) -> Result<Id> {
        let scalar = match component.storage_type() {
            ComponentType::I1 => self.builder.uint_type(32),
            ComponentType::I16 => {
                self.builder.add_capability(Capability::Int16);
                self.builder.int_type(16)
            }
            ComponentType::U16 => {
                self.builder.add_capability(Capability::Int16);
                self.builder.uint_type(16)
            }
            ComponentType::I32 => self.builder.int_type(32),
            ComponentType::U32 => self.builder.uint_type(32),
            ComponentType::I64 => {
                self.builder.add_capability(Capability::Int64);
                self.builder.int_type(64)
            }
            ComponentType::U64 => {
                self.builder.add_capability(Capability::Int64);
                self.builder.uint_type(64)
            }
            ComponentType::F16 => {
                self.builder.add_capability(Capability::Float16);
                self.builder.float_type(16)
            }
            ComponentType::F32 => self.builder.float_type(32),
            ComponentType::F64 => {
                self.builder.add_capability(Capability::Float64);
                self.builder.float_type(64)
            }
            other => {
                return Err(ConvertError::unsupported(format!(
                    "component type {other:?}"
                )))
            }
        };
        let mut ty = self.builder.vector_type(scalar, cols.max(1));
        if rows > 1 || force_array {
            ty = self.builder.array_type(ty, rows.max(1), 0);
        }
        Ok(ty)
    }

    /// Struct type cached by member list and name.
    pub fn get_struct_type(&mut self, members: &[Id], name: &str) -> Id {
        let key = (members.to_vec(), name.to_owned());
        if let Some(&id) = self.struct_cache.get(&key) {
            return id;
        }
        let id = self.builder.struct_type(members, name);
        self.struct_cache.insert(key, id);
        id
    }

    pub fn get_type_id_for_value(&mut self, value: ValueId) -> Result<Id> {
        let ty = self.module.value_type(value).clone();
        self.get_type_id(&ty)
    }

    pub fn get_id_for_value(&mut self, value: ValueId) -> Result<Id> {
        if let Some(&id) = self.value_map.get(&value) {
            return Ok(id);
        }
        let module = self.module;
        let id = match &module.value(value).kind {
            ValueKind::Constant(constant) => {
                let ty = module.value_type(value).clone();
                self.get_id_for_constant(&ty, constant)?
            }
            ValueKind::Undef => {
                let ty = self.get_type_id_for_value(value)?;
                self.builder.undef(ty)
            }
            ValueKind::Function(_) => {
                return Err(ConvertError::internal(
                    "function values cannot be used as operands",
                ))
            }
            ValueKind::Global(_) => {
                return Err(ConvertError::internal(format!(
                    "global {} was not declared before use",
                    module
                        .global_of_value(value)
                        .map(|g| g.name.as_str())
                        .unwrap_or("?")
                )))
            }
            ValueKind::Argument { .. } | ValueKind::Instruction { .. } => {
                self.builder.allocate_id()
            }
        };
        self.value_map.insert(value, id);
        Ok(id)
    }

    fn get_id_for_constant(&mut self, ty: &Type, constant: &Constant) -> Result<Id> {
        match constant {
            Constant::Aggregate(parts) => {
                let type_id = self.get_type_id(ty)?;
                let mut ids = Vec::with_capacity(parts.len());
                for &part in parts {
                    ids.push(self.get_id_for_value(part)?);
                }
                Ok(self.builder.constant_composite(type_id, &ids))
            }
            Constant::Null => match ty {
                Type::Int(1) => Ok(self.builder.constant_bool(false)),
                Type::Int(_) | Type::Half | Type::Float | Type::Double => {
                    let type_id = self.get_type_id(ty)?;
                    Ok(self.builder.constant_scalar(type_id, 0))
                }
                _ => {
                    let type_id = self.get_type_id(ty)?;
                    Ok(self.builder.constant_null(type_id))
                }
            },
            Constant::Int(bits) => match ty {
                Type::Int(1) => Ok(self.builder.constant_bool(bits & 1 != 0)),
                Type::Int(width) => {
                    let type_id = self.uint_type_checked(*width)?;
                    let mask = if *width >= 64 {
                        u64::MAX
                    } else {
                        (1u64 << width) - 1
                    };
                    Ok(self.builder.constant_scalar(type_id, bits & mask))
                }
                other => Err(ConvertError::malformed(format!(
                    "integer constant of type {other:?}"
                ))),
            },
            Constant::Float(value) => match ty {
                Type::Half => {
                    self.builder.add_capability(Capability::Float16);
                    Ok(self
                        .builder
                        .constant_f16_bits(half::f16::from_f64(*value).to_bits()))
                }
                Type::Float => Ok(self.builder.constant_f32(*value as f32)),
                Type::Double => {
                    self.builder.add_capability(Capability::Float64);
                    Ok(self.builder.constant_f64(*value))
                }
                other => Err(ConvertError::malformed(format!(
                    "float constant of type {other:?}"
                ))),
            },
        }
    }

    /// Constant integer operand, required by the caller.
    pub fn const_operand(&self, value: ValueId, what: &str) -> Result<u64> {
        self.module
            .value(value)
            .as_const_int()
            .ok_or_else(|| ConvertError::unsupported(format!("{what} must be a constant")))
    }

    pub fn const_u32_operand(&self, value: ValueId, what: &str) -> Result<u32> {
        self.const_operand(value, what).map(|v| v as u32)
    }

    /// Storage class of a translated pointer value.
    pub fn storage_class_of(&self, pointer: ValueId) -> Result<StorageClass> {
        if let Some(&storage) = self.pointer_storage.get(&pointer) {
            return Ok(storage);
        }
        match self.module.value_type(pointer).address_space() {
            Some(space) => storage_class_for(space),
            None => Err(ConvertError::internal(format!(
                "value {} is not a pointer",
                pointer.index()
            ))),
        }
    }
}

/// Storage class of memory that DXIL code may point into directly.
pub(crate) fn storage_class_for(space: AddressSpace) -> Result<StorageClass> {
    match space {
        AddressSpace::Thread => Ok(StorageClass::Function),
        AddressSpace::GroupShared => Ok(StorageClass::Workgroup),
        other => Err(ConvertError::unsupported(format!(
            "pointers into address space {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::test_support::compute_module;
    use crate::options::ConverterOptions;
    use crate::remap::IdentityRemapper;
    use crate::spv::{ConstantDecl, TypeDecl};

    #[test]
    fn booleans_and_integers_translate_to_bool_and_uint() {
        let module = compute_module();
        let mut remapper = IdentityRemapper;
        let options = ConverterOptions::default();
        let mut ctx = ConvertContext::new(&module, &mut remapper, &options, &[]).unwrap();

        let b = ctx.get_type_id(&Type::i1()).unwrap();
        assert_eq!(ctx.builder.type_decl(b), Some(&TypeDecl::Bool));
        let u = ctx.get_type_id(&Type::i32()).unwrap();
        assert_eq!(
            ctx.builder.type_decl(u),
            Some(&TypeDecl::Int {
                width: 32,
                signed: false
            })
        );
        let s = ctx
            .component_type_id(ComponentType::I32, 1, 1, false)
            .unwrap();
        assert_eq!(
            ctx.builder.type_decl(s),
            Some(&TypeDecl::Int {
                width: 32,
                signed: true
            })
        );
    }

    #[test]
    fn component_rows_become_arrays() {
        let module = compute_module();
        let mut remapper = IdentityRemapper;
        let options = ConverterOptions::default();
        let mut ctx = ConvertContext::new(&module, &mut remapper, &options, &[]).unwrap();

        let ty = ctx
            .component_type_id(ComponentType::F32, 3, 4, false)
            .unwrap();
        let f32_ty = ctx.builder.float_type(32);
        let vec4 = ctx.builder.vector_type(f32_ty, 4);
        assert_eq!(
            ctx.builder.type_decl(ty),
            Some(&TypeDecl::Array {
                element: vec4,
                len: 3,
                stride: 0
            })
        );
        let forced = ctx
            .component_type_id(ComponentType::F32, 1, 1, true)
            .unwrap();
        assert!(matches!(
            ctx.builder.type_decl(forced),
            Some(TypeDecl::Array { len: 1, .. })
        ));
    }

    #[test]
    fn constants_are_materialized_once() {
        let mut module = compute_module();
        let a = module.const_i32(7);
        let b = module.const_i32(7);
        let h = module.const_float(Type::Half, 1.0);
        let mut remapper = IdentityRemapper;
        let options = ConverterOptions::default();
        let mut ctx = ConvertContext::new(&module, &mut remapper, &options, &[]).unwrap();

        let ida = ctx.get_id_for_value(a).unwrap();
        let idb = ctx.get_id_for_value(b).unwrap();
        assert_eq!(ida, idb);
        assert_eq!(ctx.builder.constant_value(ida), Some(7));

        let idh = ctx.get_id_for_value(h).unwrap();
        assert!(matches!(
            ctx.builder.constant_decl(idh),
            Some(ConstantDecl::Scalar { bits: 0x3c00, .. })
        ));
        assert!(ctx.builder.has_capability(Capability::Float16));
    }

    #[test]
    fn struct_types_are_cached_by_members_and_name() {
        let module = compute_module();
        let mut remapper = IdentityRemapper;
        let options = ConverterOptions::default();
        let mut ctx = ConvertContext::new(&module, &mut remapper, &options, &[]).unwrap();
        let u = ctx.builder.uint_type(32);
        let a = ctx.get_struct_type(&[u, u], "Pair");
        assert_eq!(a, ctx.get_struct_type(&[u, u], "Pair"));
        assert_ne!(a, ctx.get_struct_type(&[u, u], "Other"));
    }

    #[test]
    fn device_pointers_are_rejected() {
        assert!(storage_class_for(AddressSpace::Device).is_err());
        assert_eq!(
            storage_class_for(AddressSpace::GroupShared).unwrap(),
            StorageClass::Workgroup
        );
    }
}
