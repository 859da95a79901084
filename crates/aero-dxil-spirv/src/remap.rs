//! Caller-supplied binding policy.
//!
//! The converter describes each D3D-side resource with a [`D3DBinding`] and asks the
//! [`ResourceRemapper`] where it lives on the Vulkan side. Returning `None` rejects the resource
//! and aborts the conversion.

use crate::dxil::ResourceKind;

/// Pipeline stage reported to the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Unknown,
    Vertex,
    Hull,
    Domain,
    Geometry,
    Pixel,
    Compute,
    RayGeneration,
    Intersection,
    AnyHit,
    ClosestHit,
    Miss,
    Callable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct D3DBinding {
    pub stage: ShaderStage,
    pub kind: ResourceKind,
    /// Dense index assigned by the compiler within the resource class.
    pub resource_index: u32,
    pub register_space: u32,
    pub register_index: u32,
    /// `u32::MAX` for unbounded ranges.
    pub range_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct D3DUavBinding {
    pub binding: D3DBinding,
    pub counter: bool,
}

/// Bindless heap placement. Only meaningful when `use_heap` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindlessInfo {
    pub use_heap: bool,
    /// Static bias added to the dynamic heap index.
    pub heap_root_offset: u32,
    /// Root-constant word holding the dynamic heap index.
    pub root_constant_word: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VulkanBinding {
    pub descriptor_set: u32,
    pub binding: u32,
    pub bindless: BindlessInfo,
}

impl VulkanBinding {
    pub fn direct(descriptor_set: u32, binding: u32) -> Self {
        Self {
            descriptor_set,
            binding,
            bindless: BindlessInfo::default(),
        }
    }

    pub fn heap(descriptor_set: u32, binding: u32, root_constant_word: u32, heap_root_offset: u32) -> Self {
        Self {
            descriptor_set,
            binding,
            bindless: BindlessInfo {
                use_heap: true,
                heap_root_offset,
                root_constant_word,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VulkanUavBinding {
    pub buffer: VulkanBinding,
    pub counter: VulkanBinding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VulkanCbvBinding {
    Buffer(VulkanBinding),
    /// Constant buffer read from the root constants starting at the given word.
    PushConstant { offset_in_words: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct D3DVertexInput<'a> {
    pub semantic: &'a str,
    pub semantic_index: u32,
    pub start_row: u32,
    pub rows: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VulkanVertexInput {
    pub location: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct D3DStreamOutput<'a> {
    pub semantic: &'a str,
    pub semantic_index: u32,
}

/// Transform-feedback placement of an output. Disabled unless `enable` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VulkanStreamOutput {
    pub enable: bool,
    pub offset: u32,
    pub stride: u32,
    pub buffer_index: u32,
}

/// Binding policy. Every method has an identity default: D3D register space and index map to
/// descriptor set and binding, UAV counters go to the next space up. A counter that would land
/// past `u32::MAX` is rejected.
pub trait ResourceRemapper {
    fn remap_srv(&mut self, binding: &D3DBinding) -> Option<VulkanBinding> {
        Some(VulkanBinding::direct(
            binding.register_space,
            binding.register_index,
        ))
    }

    fn remap_sampler(&mut self, binding: &D3DBinding) -> Option<VulkanBinding> {
        Some(VulkanBinding::direct(
            binding.register_space,
            binding.register_index,
        ))
    }

    fn remap_uav(&mut self, binding: &D3DUavBinding) -> Option<VulkanUavBinding> {
        let b = &binding.binding;
        Some(VulkanUavBinding {
            buffer: VulkanBinding::direct(b.register_space, b.register_index),
            counter: VulkanBinding::direct(b.register_space.checked_add(1)?, b.register_index),
        })
    }

    fn remap_cbv(&mut self, binding: &D3DBinding) -> Option<VulkanCbvBinding> {
        Some(VulkanCbvBinding::Buffer(VulkanBinding::direct(
            binding.register_space,
            binding.register_index,
        )))
    }

    fn remap_vertex_input(&mut self, input: &D3DVertexInput<'_>) -> Option<VulkanVertexInput> {
        Some(VulkanVertexInput {
            location: input.start_row,
        })
    }

    fn remap_stream_output(&mut self, _output: &D3DStreamOutput<'_>) -> Option<VulkanStreamOutput> {
        Some(VulkanStreamOutput::default())
    }

    fn root_constant_word_count(&self) -> u32 {
        0
    }
}

impl<T: ResourceRemapper + ?Sized> ResourceRemapper for &mut T {
    fn remap_srv(&mut self, binding: &D3DBinding) -> Option<VulkanBinding> {
        (**self).remap_srv(binding)
    }

    fn remap_sampler(&mut self, binding: &D3DBinding) -> Option<VulkanBinding> {
        (**self).remap_sampler(binding)
    }

    fn remap_uav(&mut self, binding: &D3DUavBinding) -> Option<VulkanUavBinding> {
        (**self).remap_uav(binding)
    }

    fn remap_cbv(&mut self, binding: &D3DBinding) -> Option<VulkanCbvBinding> {
        (**self).remap_cbv(binding)
    }

    fn remap_vertex_input(&mut self, input: &D3DVertexInput<'_>) -> Option<VulkanVertexInput> {
        (**self).remap_vertex_input(input)
    }

    fn remap_stream_output(&mut self, output: &D3DStreamOutput<'_>) -> Option<VulkanStreamOutput> {
        (**self).remap_stream_output(output)
    }

    fn root_constant_word_count(&self) -> u32 {
        (**self).root_constant_word_count()
    }
}

/// Policy that keeps every default.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityRemapper;

impl ResourceRemapper for IdentityRemapper {}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(space: u32, register: u32) -> D3DBinding {
        D3DBinding {
            stage: ShaderStage::Pixel,
            kind: ResourceKind::Texture2D,
            resource_index: 0,
            register_space: space,
            register_index: register,
            range_size: 1,
        }
    }

    #[test]
    fn identity_maps_space_and_register() {
        let mut remapper = IdentityRemapper;
        assert_eq!(
            remapper.remap_srv(&binding(2, 5)),
            Some(VulkanBinding::direct(2, 5))
        );
        let uav = remapper
            .remap_uav(&D3DUavBinding {
                binding: binding(1, 3),
                counter: true,
            })
            .expect("uav");
        assert_eq!(uav.counter, VulkanBinding::direct(2, 3));
        assert_eq!(remapper.root_constant_word_count(), 0);
        let so = remapper
            .remap_stream_output(&D3DStreamOutput {
                semantic: "TEXCOORD",
                semantic_index: 0,
            })
            .expect("stream output");
        assert!(!so.enable);
    }

    #[test]
    fn identity_rejects_a_counter_past_the_last_space() {
        let mut remapper = IdentityRemapper;
        assert_eq!(
            remapper.remap_uav(&D3DUavBinding {
                binding: binding(u32::MAX, 0),
                counter: true,
            }),
            None
        );
    }
}
