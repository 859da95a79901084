//! Local root signatures and the shader record buffer they describe.

use spirv::{Capability, Decoration, StorageClass};
use tracing::debug;

use crate::dxil::ResourceClass;

use super::context::{ConvertContext, RootConstants, ShaderRecordBuffer};

/// Descriptor count of a table entry with an unbounded range.
pub const UNBOUNDED_DESCRIPTORS: u32 = u32::MAX;

/// One entry of a ray-tracing local root signature.
///
/// Registration order defines the shader record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalRootSignatureEntry {
    Constants {
        register_space: u32,
        register_index: u32,
        num_words: u32,
    },
    Descriptor {
        class: ResourceClass,
        register_space: u32,
        register_index: u32,
    },
    Table {
        class: ResourceClass,
        register_space: u32,
        register_index: u32,
        /// [`UNBOUNDED_DESCRIPTORS`] for an unbounded range.
        num_descriptors: u32,
        offset_in_heap: u32,
    },
}

/// First entry covering `(class, space, register)`.
pub(crate) fn find_local_root_signature_entry(
    entries: &[LocalRootSignatureEntry],
    class: ResourceClass,
    space: u32,
    register: u32,
) -> Option<usize> {
    entries.iter().position(|entry| match *entry {
        LocalRootSignatureEntry::Constants {
            register_space,
            register_index,
            ..
        } => class == ResourceClass::Cbv && register_space == space && register_index == register,
        LocalRootSignatureEntry::Descriptor {
            class: entry_class,
            register_space,
            register_index,
        } => entry_class == class && register_space == space && register_index == register,
        LocalRootSignatureEntry::Table {
            class: entry_class,
            register_space,
            register_index,
            num_descriptors,
            ..
        } => {
            entry_class == class
                && register_space == space
                && register >= register_index
                && (num_descriptors == UNBOUNDED_DESCRIPTORS
                    || register - register_index < num_descriptors)
        }
    })
}

impl ConvertContext<'_> {
    /// Declares the `registers` block when the policy reports root constants.
    pub fn emit_root_constants(&mut self) {
        let num_words = self.remapper.root_constant_word_count();
        if num_words == 0 {
            return;
        }
        let u32_type = self.builder.uint_type(32);
        let members = vec![u32_type; num_words as usize];
        let block = self.builder.struct_type(&members, "RootConstants");
        for i in 0..num_words {
            self.builder
                .decorate_member(block, i, Decoration::Offset, &[4 * i]);
        }
        self.builder.decorate(block, Decoration::Block, &[]);

        let storage = if let Some(ubo) = self.options.inline_ubo {
            let var = self.builder.variable(StorageClass::Uniform, block, "registers");
            self.builder
                .decorate(var, Decoration::DescriptorSet, &[ubo.descriptor_set]);
            self.builder.decorate(var, Decoration::Binding, &[ubo.binding]);
            self.root_constants = Some(RootConstants {
                var_id: var,
                storage: StorageClass::Uniform,
                num_words,
            });
            StorageClass::Uniform
        } else {
            let var = self
                .builder
                .variable(StorageClass::PushConstant, block, "registers");
            self.root_constants = Some(RootConstants {
                var_id: var,
                storage: StorageClass::PushConstant,
                num_words,
            });
            StorageClass::PushConstant
        };
        debug!(num_words, ?storage, "declared root constants");
    }

    /// Declares the `SBT` block laid out from the local root signature. Ray-tracing stages only.
    pub fn emit_shader_record_buffer(&mut self) {
        if self.local_root_signature.is_empty() || !self.is_ray_tracing() {
            return;
        }
        let u32_type = self.builder.uint_type(32);
        let mut member_types = Vec::with_capacity(self.local_root_signature.len());
        let mut offsets = Vec::with_capacity(self.local_root_signature.len());
        let mut offset = 0u32;

        for entry in self.local_root_signature {
            match *entry {
                LocalRootSignatureEntry::Constants { num_words, .. } => {
                    member_types.push(self.builder.array_type(u32_type, num_words, 4));
                    offsets.push(offset);
                    offset += 4 * num_words;
                }
                LocalRootSignatureEntry::Descriptor { .. } => {
                    self.builder.add_capability(Capability::Int64);
                    member_types.push(self.builder.uint_type(64));
                    offset = align_up(offset, 8);
                    offsets.push(offset);
                    offset += 8;
                }
                LocalRootSignatureEntry::Table { .. } => {
                    member_types.push(self.builder.vector_type(u32_type, 2));
                    offset = align_up(offset, 8);
                    offsets.push(offset);
                    offset += 8;
                }
            }
        }

        let block = self.builder.struct_type(&member_types, "SBTBlock");
        self.builder.decorate(block, Decoration::Block, &[]);
        for (i, &member_offset) in offsets.iter().enumerate() {
            self.builder
                .decorate_member(block, i as u32, Decoration::Offset, &[member_offset]);
        }
        let var = self
            .builder
            .variable(StorageClass::ShaderRecordBufferKHR, block, "SBT");
        debug!(entries = offsets.len(), size = offset, "declared shader record buffer");
        self.shader_record_buffer = Some(ShaderRecordBuffer {
            var_id: var,
            member_types,
        });
    }
}

fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(class: ResourceClass, space: u32, base: u32, count: u32) -> LocalRootSignatureEntry {
        LocalRootSignatureEntry::Table {
            class,
            register_space: space,
            register_index: base,
            num_descriptors: count,
            offset_in_heap: 0,
        }
    }

    #[test]
    fn table_entries_cover_their_register_range() {
        let entries = [table(ResourceClass::Srv, 0, 4, 2)];
        assert_eq!(
            find_local_root_signature_entry(&entries, ResourceClass::Srv, 0, 4),
            Some(0)
        );
        assert_eq!(
            find_local_root_signature_entry(&entries, ResourceClass::Srv, 0, 5),
            Some(0)
        );
        assert_eq!(
            find_local_root_signature_entry(&entries, ResourceClass::Srv, 0, 6),
            None
        );
        assert_eq!(
            find_local_root_signature_entry(&entries, ResourceClass::Srv, 0, 3),
            None
        );
        assert_eq!(
            find_local_root_signature_entry(&entries, ResourceClass::Uav, 0, 4),
            None
        );
    }

    #[test]
    fn unbounded_tables_match_any_higher_register() {
        let entries = [table(ResourceClass::Uav, 1, 0, UNBOUNDED_DESCRIPTORS)];
        assert_eq!(
            find_local_root_signature_entry(&entries, ResourceClass::Uav, 1, 1000),
            Some(0)
        );
        assert_eq!(
            find_local_root_signature_entry(&entries, ResourceClass::Uav, 2, 0),
            None
        );
    }

    #[test]
    fn constants_only_match_cbvs_and_first_match_wins() {
        let entries = [
            LocalRootSignatureEntry::Constants {
                register_space: 0,
                register_index: 1,
                num_words: 4,
            },
            LocalRootSignatureEntry::Descriptor {
                class: ResourceClass::Cbv,
                register_space: 0,
                register_index: 1,
            },
        ];
        assert_eq!(
            find_local_root_signature_entry(&entries, ResourceClass::Cbv, 0, 1),
            Some(0)
        );
        assert_eq!(
            find_local_root_signature_entry(&entries, ResourceClass::Srv, 0, 1),
            None
        );
    }

    #[test]
    fn alignment() {
        assert_eq!(align_up(12, 8), 16);
        assert_eq!(align_up(16, 8), 16);
        assert_eq!(align_up(0, 8), 0);
    }
}
