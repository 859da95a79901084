//! Shared descriptor-heap declarations.
//!
//! Every bindless resource of the same shape indexes the same runtime array, so heap variables are
//! interned by [`BindlessKey`].

use spirv::{Capability, Decoration, Dim, ImageFormat, StorageClass};
use tracing::debug;

use crate::dxil::{ComponentType, ResourceClass, ResourceKind};
use crate::error::{ConvertError, Result};
use crate::spv::Id;

use super::context::ConvertContext;

/// Vec4 count of a bindless constant buffer view of the heap (64 KiB).
pub(crate) const BINDLESS_CBV_VEC4_COUNT: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BindlessKey {
    pub class: ResourceClass,
    pub component: ComponentType,
    pub kind: ResourceKind,
    pub format: ImageFormat,
    pub descriptor_set: u32,
    pub binding: u32,
    pub uav_read: bool,
    pub uav_written: bool,
    pub uav_coherent: bool,
    pub counters: bool,
}

impl BindlessKey {
    /// Key of the shared UAV-counter heap at `(set, binding)`.
    pub fn counters(descriptor_set: u32, binding: u32) -> Self {
        Self {
            class: ResourceClass::Uav,
            component: ComponentType::U32,
            kind: ResourceKind::Invalid,
            format: ImageFormat::Unknown,
            descriptor_set,
            binding,
            uav_read: false,
            uav_written: false,
            uav_coherent: false,
            counters: true,
        }
    }
}

/// Image dimensionality of a resource kind.
pub(crate) fn image_dim(kind: ResourceKind) -> Result<Dim> {
    Ok(match kind {
        ResourceKind::Texture1D | ResourceKind::Texture1DArray => Dim::Dim1D,
        ResourceKind::Texture2D
        | ResourceKind::Texture2DArray
        | ResourceKind::Texture2DMS
        | ResourceKind::Texture2DMSArray
        | ResourceKind::FeedbackTexture2D
        | ResourceKind::FeedbackTexture2DArray => Dim::Dim2D,
        ResourceKind::Texture3D => Dim::Dim3D,
        ResourceKind::TextureCube | ResourceKind::TextureCubeArray => Dim::DimCube,
        ResourceKind::TypedBuffer | ResourceKind::RawBuffer | ResourceKind::StructuredBuffer => {
            Dim::DimBuffer
        }
        other => {
            return Err(ConvertError::unsupported(format!(
                "resource kind {other:?} has no image form"
            )))
        }
    })
}

impl ConvertContext<'_> {
    /// Returns the heap variable for `key`, declaring it on first request.
    pub fn create_bindless_heap_variable(&mut self, key: BindlessKey) -> Result<Id> {
        if let Some(&id) = self.bindless_cache.get(&key) {
            return Ok(id);
        }

        self.builder.add_extension("SPV_EXT_descriptor_indexing");
        self.builder.add_capability(Capability::RuntimeDescriptorArray);

        let (element, storage) = if key.counters {
            let element = self.physical_counter_pointer_type();
            let array = self.builder.runtime_array_type(element, 8);
            let block = self.get_struct_type(&[array], "AtomicCounters");
            self.builder.decorate(block, Decoration::Block, &[]);
            self.builder.set_member_name(block, 0, "counters");
            self.builder
                .decorate_member(block, 0, Decoration::Offset, &[0]);
            self.builder
                .decorate_member(block, 0, Decoration::NonWritable, &[]);
            (block, StorageClass::StorageBuffer)
        } else {
            match key.class {
                ResourceClass::Srv if key.kind == ResourceKind::RTAccelerationStructure => {
                    (self.builder.acceleration_structure_type(), StorageClass::UniformConstant)
                }
                ResourceClass::Srv => {
                    let image = self.resource_image_type(key.kind, key.component, 1, ImageFormat::Unknown)?;
                    (image, StorageClass::UniformConstant)
                }
                ResourceClass::Uav => {
                    let image = self.resource_image_type(key.kind, key.component, 2, key.format)?;
                    (image, StorageClass::UniformConstant)
                }
                ResourceClass::Sampler => (self.builder.sampler_type(), StorageClass::UniformConstant),
                ResourceClass::Cbv => self.bindless_cbv_block(),
            }
        };

        // The counter block already wraps its runtime array.
        let pointee = if key.counters {
            element
        } else {
            self.builder.runtime_array_type(element, 0)
        };
        let var = self.builder.variable(storage, pointee, "");
        self.builder
            .decorate(var, Decoration::DescriptorSet, &[key.descriptor_set]);
        self.builder.decorate(var, Decoration::Binding, &[key.binding]);

        if key.counters {
            self.builder.decorate(var, Decoration::AliasedPointer, &[]);
        } else if key.class == ResourceClass::Uav {
            if !key.uav_read {
                self.builder.decorate(var, Decoration::NonReadable, &[]);
            }
            if !key.uav_written {
                self.builder.decorate(var, Decoration::NonWritable, &[]);
            }
            if key.uav_coherent {
                self.builder.decorate(var, Decoration::Coherent, &[]);
            }
        }

        debug!(?key, var, "declared bindless heap");
        self.bindless_cache.insert(key, var);
        Ok(var)
    }

    /// Image type of a descriptor. Raw and structured buffers are viewed as `R32ui` texel buffers.
    pub fn resource_image_type(
        &mut self,
        kind: ResourceKind,
        component: ComponentType,
        sampled: u32,
        format: ImageFormat,
    ) -> Result<Id> {
        let dim = image_dim(kind)?;
        let (sampled_type, format) = if kind.is_raw_or_structured() {
            let format = if sampled == 2 { ImageFormat::R32ui } else { ImageFormat::Unknown };
            (self.builder.uint_type(32), format)
        } else {
            (self.component_type_id(component, 1, 1, false)?, format)
        };
        match dim {
            Dim::DimBuffer if sampled == 1 => {
                self.builder.add_capability(Capability::SampledBuffer)
            }
            Dim::DimBuffer => self.builder.add_capability(Capability::ImageBuffer),
            Dim::Dim1D if sampled == 1 => self.builder.add_capability(Capability::Sampled1D),
            Dim::Dim1D => self.builder.add_capability(Capability::Image1D),
            Dim::DimCube if kind == ResourceKind::TextureCubeArray => {
                self.builder.add_capability(if sampled == 1 {
                    Capability::SampledCubeArray
                } else {
                    Capability::ImageCubeArray
                })
            }
            _ => {}
        }
        if sampled == 2 && format == ImageFormat::Unknown {
            self.builder
                .add_capability(Capability::StorageImageWriteWithoutFormat);
        }
        Ok(self.builder.image_type(
            sampled_type,
            dim,
            false,
            kind.is_arrayed(),
            kind.is_multisampled(),
            sampled,
            format,
        ))
    }

    fn bindless_cbv_block(&mut self) -> (Id, StorageClass) {
        let f32_type = self.builder.float_type(32);
        let vec4 = self.builder.vector_type(f32_type, 4);
        let array = self
            .builder
            .array_type(vec4, BINDLESS_CBV_VEC4_COUNT, 16);
        let block = self.get_struct_type(&[array], "BindlessCBV");
        self.builder.decorate(block, Decoration::Block, &[]);
        self.builder
            .decorate_member(block, 0, Decoration::Offset, &[0]);
        if self.options.bindless_cbv_ssbo_emulation {
            self.builder
                .decorate_member(block, 0, Decoration::NonWritable, &[]);
            (block, StorageClass::StorageBuffer)
        } else {
            (block, StorageClass::Uniform)
        }
    }

    /// Pointer type used to reach a counter through its physical address.
    pub fn physical_counter_pointer_type(&mut self) -> Id {
        if let Some(&id) = self.physical_types.get("AtomicCounter") {
            return id;
        }
        self.builder.add_extension("SPV_KHR_physical_storage_buffer");
        self.builder
            .add_capability(Capability::PhysicalStorageBufferAddresses);
        let u32_type = self.builder.uint_type(32);
        let block = self.get_struct_type(&[u32_type], "AtomicCounter");
        self.builder.decorate(block, Decoration::Block, &[]);
        self.builder
            .decorate_member(block, 0, Decoration::Offset, &[0]);
        let ptr = self
            .builder
            .pointer_type(StorageClass::PhysicalStorageBuffer, block);
        self.physical_types.insert("AtomicCounter", ptr);
        ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::test_support::compute_module;
    use crate::options::ConverterOptions;
    use crate::remap::IdentityRemapper;

    fn srv_key(binding: u32) -> BindlessKey {
        BindlessKey {
            class: ResourceClass::Srv,
            component: ComponentType::F32,
            kind: ResourceKind::Texture2D,
            format: ImageFormat::Unknown,
            descriptor_set: 0,
            binding,
            uav_read: false,
            uav_written: false,
            uav_coherent: false,
            counters: false,
        }
    }

    #[test]
    fn identical_keys_share_one_heap() {
        let module = compute_module();
        let mut remapper = IdentityRemapper;
        let options = ConverterOptions::default();
        let mut ctx = ConvertContext::new(&module, &mut remapper, &options, &[]).unwrap();

        let a = ctx.create_bindless_heap_variable(srv_key(0)).unwrap();
        let b = ctx.create_bindless_heap_variable(srv_key(0)).unwrap();
        let c = ctx.create_bindless_heap_variable(srv_key(1)).unwrap();
        let mut uint_key = srv_key(0);
        uint_key.component = ComponentType::U32;
        let d = ctx.create_bindless_heap_variable(uint_key).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(
            ctx.builder
                .capabilities()
                .iter()
                .filter(|&&c| c == Capability::RuntimeDescriptorArray)
                .count(),
            1
        );
    }

    #[test]
    fn write_only_uav_heaps_are_non_readable() {
        let module = compute_module();
        let mut remapper = IdentityRemapper;
        let options = ConverterOptions::default();
        let mut ctx = ConvertContext::new(&module, &mut remapper, &options, &[]).unwrap();

        let key = BindlessKey {
            class: ResourceClass::Uav,
            uav_written: true,
            ..srv_key(2)
        };
        let var = ctx.create_bindless_heap_variable(key).unwrap();
        assert!(ctx.builder.has_decoration(var, Decoration::NonReadable));
        assert!(!ctx.builder.has_decoration(var, Decoration::NonWritable));
    }

    #[test]
    fn counter_heap_is_a_storage_block() {
        let module = compute_module();
        let mut remapper = IdentityRemapper;
        let options = ConverterOptions::default();
        let mut ctx = ConvertContext::new(&module, &mut remapper, &options, &[]).unwrap();

        let var = ctx
            .create_bindless_heap_variable(BindlessKey::counters(5, 0))
            .unwrap();
        let decl = ctx.builder.variable_decl(var).unwrap();
        assert_eq!(decl.storage, StorageClass::StorageBuffer);
    }
}
