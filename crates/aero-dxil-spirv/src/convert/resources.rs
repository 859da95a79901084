//! Resource declarations.
//!
//! Walks the `dx.resources` lists, asks the binding policy (or the local root signature) where
//! each range lives, and declares the matching SPIR-V objects. The resulting
//! [`ResourceReference`] tables are what handle creation reads later.

use spirv::{Capability, Decoration, Dim, ImageFormat, StorageClass};
use tracing::{debug, error};

use crate::dxil::{
    ComponentType, MdNodeId, MdOperand, Module, ResourceClass, ResourceKind, ValueId, ValueKind,
    RESOURCES_METADATA,
};
use crate::error::{ConvertError, Result};
use crate::remap::{
    D3DBinding, D3DUavBinding, ResourceRemapper, ShaderStage, VulkanBinding, VulkanCbvBinding,
    VulkanUavBinding,
};
use crate::spv::Id;

use super::bindless::BindlessKey;
use super::context::{ConvertContext, GlobalResourceRef, ResourceReference, UavAccess};
use super::root_signature::{
    find_local_root_signature_entry, LocalRootSignatureEntry, UNBOUNDED_DESCRIPTORS,
};

/// One entry of a resource list.
#[derive(Debug, Clone)]
pub(crate) struct ResourceRecord<'m> {
    pub index: u32,
    pub global: Option<ValueId>,
    pub name: &'m str,
    pub space: u32,
    pub register: u32,
    pub range_size: u32,
    pub kind: ResourceKind,
    pub component_type: ComponentType,
    pub stride: u32,
    /// Constant buffer size in bytes.
    pub cbv_size: u32,
    pub globally_coherent: bool,
    pub has_counter: bool,
}

impl ResourceRecord<'_> {
    fn d3d_binding(&self, stage: ShaderStage) -> D3DBinding {
        D3DBinding {
            stage,
            kind: self.kind,
            resource_index: self.index,
            register_space: self.space,
            register_index: self.register,
            range_size: self.range_size,
        }
    }
}

/// `[srvs, uavs, cbvs, samplers]` lists of the module; absent lists are `None`.
pub(crate) fn resource_lists(module: &Module) -> Result<[Option<MdNodeId>; 4]> {
    let Some(&root) = module
        .named_metadata(RESOURCES_METADATA)
        .and_then(|nodes| nodes.first())
    else {
        return Ok([None; 4]);
    };
    Ok([
        module.md_child(root, 0)?,
        module.md_child(root, 1)?,
        module.md_child(root, 2)?,
        module.md_child(root, 3)?,
    ])
}

pub(crate) fn parse_resource_records(
    module: &Module,
    list: MdNodeId,
    class: ResourceClass,
) -> Result<Vec<ResourceRecord<'_>>> {
    module
        .md_children(list)?
        .into_iter()
        .map(|node| parse_resource_record(module, node, class))
        .collect()
}

fn parse_resource_record(
    module: &Module,
    node: MdNodeId,
    class: ResourceClass,
) -> Result<ResourceRecord<'_>> {
    let global = match module.md_operand(node, 1) {
        Some(MdOperand::Value(value))
            if matches!(module.value(*value).kind, ValueKind::Global(_)) =>
        {
            Some(*value)
        }
        _ => None,
    };
    let name = match module.md_operand(node, 2) {
        Some(MdOperand::String(name)) => name.as_str(),
        _ => "",
    };

    let mut record = ResourceRecord {
        index: module.md_u32(node, 0)?,
        global,
        name,
        space: module.md_u32(node, 3)?,
        register: module.md_u32(node, 4)?,
        range_size: module.md_u32(node, 5)?,
        kind: ResourceKind::Invalid,
        component_type: ComponentType::U32,
        stride: 0,
        cbv_size: 0,
        globally_coherent: false,
        has_counter: false,
    };

    let tags = match class {
        ResourceClass::Srv | ResourceClass::Uav => {
            let raw = module.md_u32(node, 6)?;
            record.kind = ResourceKind::from_raw(raw)
                .ok_or_else(|| ConvertError::malformed(format!("unknown resource kind {raw}")))?;
            if class == ResourceClass::Uav {
                record.globally_coherent = module.md_bool(node, 7)?;
                record.has_counter = module.md_bool(node, 8)?;
                module.md_child(node, 10)?
            } else {
                module.md_child(node, 8)?
            }
        }
        ResourceClass::Cbv => {
            record.kind = ResourceKind::CBuffer;
            record.cbv_size = module.md_u32(node, 6)?;
            None
        }
        ResourceClass::Sampler => {
            record.kind = ResourceKind::Sampler;
            None
        }
    };

    // Tag 0 carries the element type of typed resources, tag 1 the structure stride.
    if let Some(tags) = tags {
        if module.md_u32(tags, 0)? == 0 {
            let raw = module.md_u32(tags, 1)?;
            record.component_type = ComponentType::from_raw(raw)
                .ok_or_else(|| ConvertError::malformed(format!("unknown component type {raw}")))?;
        } else {
            record.stride = module.md_u32(tags, 1)?;
        }
    }
    Ok(record)
}

/// Replays the resource walk against `remapper` without declaring anything.
pub(crate) fn scan_resources(
    remapper: &mut dyn ResourceRemapper,
    module: &Module,
    stage: ShaderStage,
) -> Result<()> {
    let [srvs, uavs, cbvs, samplers] = resource_lists(module)?;
    if let Some(list) = srvs {
        scan_srvs(remapper, module, list, stage)?;
    }
    if let Some(list) = uavs {
        scan_uavs(remapper, module, list, stage)?;
    }
    if let Some(list) = cbvs {
        scan_cbvs(remapper, module, list, stage)?;
    }
    if let Some(list) = samplers {
        scan_samplers(remapper, module, list, stage)?;
    }
    Ok(())
}

pub(crate) fn scan_srvs(
    remapper: &mut dyn ResourceRemapper,
    module: &Module,
    list: MdNodeId,
    stage: ShaderStage,
) -> Result<()> {
    for record in parse_resource_records(module, list, ResourceClass::Srv)? {
        remapper
            .remap_srv(&record.d3d_binding(stage))
            .ok_or_else(|| policy_rejected("SRV", &record))?;
    }
    Ok(())
}

pub(crate) fn scan_uavs(
    remapper: &mut dyn ResourceRemapper,
    module: &Module,
    list: MdNodeId,
    stage: ShaderStage,
) -> Result<()> {
    for record in parse_resource_records(module, list, ResourceClass::Uav)? {
        remapper
            .remap_uav(&D3DUavBinding {
                binding: record.d3d_binding(stage),
                counter: record.has_counter,
            })
            .ok_or_else(|| policy_rejected("UAV", &record))?;
    }
    Ok(())
}

pub(crate) fn scan_cbvs(
    remapper: &mut dyn ResourceRemapper,
    module: &Module,
    list: MdNodeId,
    stage: ShaderStage,
) -> Result<()> {
    for record in parse_resource_records(module, list, ResourceClass::Cbv)? {
        remapper
            .remap_cbv(&record.d3d_binding(stage))
            .ok_or_else(|| policy_rejected("CBV", &record))?;
    }
    Ok(())
}

pub(crate) fn scan_samplers(
    remapper: &mut dyn ResourceRemapper,
    module: &Module,
    list: MdNodeId,
    stage: ShaderStage,
) -> Result<()> {
    for record in parse_resource_records(module, list, ResourceClass::Sampler)? {
        remapper
            .remap_sampler(&record.d3d_binding(stage))
            .ok_or_else(|| policy_rejected("sampler", &record))?;
    }
    Ok(())
}

fn policy_rejected(class: &str, record: &ResourceRecord<'_>) -> ConvertError {
    error!(
        class,
        index = record.index,
        space = record.space,
        register = record.register,
        "binding policy rejected resource"
    );
    ConvertError::rejected(format!(
        "{class} {} (space {}, register {})",
        record.index, record.space, record.register
    ))
}

fn table_must_be_bindless(class: &str, record: &ResourceRecord<'_>) -> ConvertError {
    error!(class, index = record.index, "table SBT entries must be bindless");
    ConvertError::rejected(format!(
        "{class} {} lives in a descriptor table but was not mapped to a heap",
        record.index
    ))
}

fn store_reference(table: &mut Vec<Option<ResourceReference>>, index: u32, reference: ResourceReference) {
    let index = index as usize;
    if table.len() <= index {
        table.resize(index + 1, None);
    }
    table[index] = Some(reference);
}

/// How a resource range is placed once the local root signature and policy are consulted.
enum Placement {
    /// Inline in the shader record (root descriptor or root constants).
    ShaderRecord(usize),
    /// Descriptor-table entry; always a heap.
    Table { entry: usize, base_offset: u32 },
    Policy,
}

impl ConvertContext<'_> {
    /// Registers resource globals so library-style handle creation can find them.
    pub fn emit_resources_global_mapping(&mut self) -> Result<()> {
        let module = self.module;
        let lists = resource_lists(module)?;
        let classes = [
            ResourceClass::Srv,
            ResourceClass::Uav,
            ResourceClass::Cbv,
            ResourceClass::Sampler,
        ];
        for (list, class) in lists.into_iter().zip(classes) {
            let Some(list) = list else { continue };
            for record in parse_resource_records(module, list, class)? {
                if let Some(global) = record.global {
                    self.global_resource_mapping.insert(
                        global,
                        GlobalResourceRef {
                            class,
                            index: record.index,
                            offset: None,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    pub fn emit_resources(&mut self) -> Result<()> {
        self.emit_root_constants();
        self.emit_shader_record_buffer();

        let [srvs, uavs, cbvs, samplers] = resource_lists(self.module)?;
        if let Some(list) = srvs {
            self.emit_srvs(list)?;
        }
        if let Some(list) = uavs {
            self.emit_uavs(list)?;
        }
        if let Some(list) = cbvs {
            self.emit_cbvs(list)?;
        }
        if let Some(list) = samplers {
            self.emit_samplers(list)?;
        }
        Ok(())
    }

    pub fn emit_srvs(&mut self, list: MdNodeId) -> Result<()> {
        for record in parse_resource_records(self.module, list, ResourceClass::Srv)? {
            self.emit_srv(&record)?;
        }
        Ok(())
    }

    pub fn emit_uavs(&mut self, list: MdNodeId) -> Result<()> {
        for record in parse_resource_records(self.module, list, ResourceClass::Uav)? {
            self.emit_uav(&record)?;
        }
        Ok(())
    }

    pub fn emit_cbvs(&mut self, list: MdNodeId) -> Result<()> {
        for record in parse_resource_records(self.module, list, ResourceClass::Cbv)? {
            self.emit_cbv(&record)?;
        }
        Ok(())
    }

    pub fn emit_samplers(&mut self, list: MdNodeId) -> Result<()> {
        for record in parse_resource_records(self.module, list, ResourceClass::Sampler)? {
            self.emit_sampler(&record)?;
        }
        Ok(())
    }

    /// Only ray-tracing stages read resources from the shader record.
    fn placement(&self, class: ResourceClass, record: &ResourceRecord<'_>) -> Placement {
        if !self.is_ray_tracing() {
            return Placement::Policy;
        }
        match find_local_root_signature_entry(
            self.local_root_signature,
            class,
            record.space,
            record.register,
        ) {
            Some(entry) => match self.local_root_signature[entry] {
                LocalRootSignatureEntry::Table {
                    register_index,
                    offset_in_heap,
                    ..
                } => Placement::Table {
                    entry,
                    base_offset: offset_in_heap + (record.register - register_index),
                },
                _ => Placement::ShaderRecord(entry),
            },
            None => Placement::Policy,
        }
    }

    /// Capabilities implied by a descriptor array of `range_size` elements.
    fn declare_range_capabilities(&mut self, range_size: u32, dynamic_indexing: Capability, needs_extension: bool) {
        if range_size == 1 {
            return;
        }
        if range_size == UNBOUNDED_DESCRIPTORS {
            self.builder.add_extension("SPV_EXT_descriptor_indexing");
            self.builder.add_capability(Capability::RuntimeDescriptorArray);
        }
        if needs_extension {
            self.builder.add_extension("SPV_EXT_descriptor_indexing");
        }
        self.builder.add_capability(dynamic_indexing);
    }

    /// Wraps a descriptor type in the array shape of its range.
    fn range_type(&mut self, element: Id, range_size: u32) -> Id {
        match range_size {
            1 => element,
            UNBOUNDED_DESCRIPTORS => self.builder.runtime_array_type(element, 0),
            len => self.builder.array_type(element, len, 0),
        }
    }

    fn descriptor_variable(&mut self, storage: StorageClass, pointee: Id, name: &str, binding: VulkanBinding) -> Id {
        let var = self.builder.variable(storage, pointee, name);
        self.builder
            .decorate(var, Decoration::DescriptorSet, &[binding.descriptor_set]);
        self.builder
            .decorate(var, Decoration::Binding, &[binding.binding]);
        var
    }

    /// Heap reference of a policy-mapped bindless range.
    fn heap_reference(
        &self,
        var_id: Id,
        record: &ResourceRecord<'_>,
        binding: VulkanBinding,
    ) -> ResourceReference {
        ResourceReference {
            push_constant_member: binding.bindless.root_constant_word,
            base_offset: binding.bindless.heap_root_offset,
            stride: record.stride,
            bindless: true,
            base_resource_is_array: record.range_size != 1,
            bind_register: record.register,
            ..ResourceReference::new(var_id, record.kind, record.component_type)
        }
    }

    fn table_reference(
        &self,
        var_id: Id,
        record: &ResourceRecord<'_>,
        entry: usize,
        base_offset: u32,
    ) -> ResourceReference {
        ResourceReference {
            base_offset,
            stride: record.stride,
            bindless: true,
            base_resource_is_array: record.range_size != 1,
            bind_register: record.register,
            local_root_signature_entry: Some(entry),
            ..ResourceReference::new(var_id, record.kind, record.component_type)
        }
    }

    fn shader_record_reference(&self, record: &ResourceRecord<'_>, entry: usize) -> Result<ResourceReference> {
        let var_id = self
            .shader_record_buffer
            .as_ref()
            .map(|sbt| sbt.var_id)
            .ok_or_else(|| ConvertError::internal("shader record buffer was not declared"))?;
        Ok(ResourceReference {
            stride: record.stride,
            base_resource_is_array: record.range_size != 1,
            bind_register: record.register,
            local_root_signature_entry: Some(entry),
            ..ResourceReference::new(var_id, record.kind, record.component_type)
        })
    }

    fn emit_srv(&mut self, record: &ResourceRecord<'_>) -> Result<()> {
        let buffer = record.kind.is_buffer();
        self.declare_range_capabilities(
            record.range_size,
            if buffer {
                Capability::UniformTexelBufferArrayDynamicIndexing
            } else {
                Capability::SampledImageArrayDynamicIndexing
            },
            buffer,
        );

        let placement = self.placement(ResourceClass::Srv, record);
        let binding = match placement {
            Placement::ShaderRecord(_) => VulkanBinding::default(),
            _ => self
                .remapper
                .remap_srv(&record.d3d_binding(self.stage))
                .ok_or_else(|| policy_rejected("SRV", record))?,
        };

        let key = BindlessKey {
            class: ResourceClass::Srv,
            component: record.component_type,
            kind: record.kind,
            format: ImageFormat::Unknown,
            descriptor_set: binding.descriptor_set,
            binding: binding.binding,
            uav_read: false,
            uav_written: false,
            uav_coherent: false,
            counters: false,
        };

        let reference = match placement {
            Placement::Table { entry, base_offset } => {
                if !binding.bindless.use_heap {
                    return Err(table_must_be_bindless("SRV", record));
                }
                let var = self.create_bindless_heap_variable(key)?;
                self.table_reference(var, record, entry, base_offset)
            }
            Placement::ShaderRecord(entry) => {
                if !record.kind.is_raw_or_structured() {
                    return Err(ConvertError::unsupported(
                        "SRV root descriptors must be raw or structured buffers",
                    ));
                }
                self.shader_record_reference(record, entry)?
            }
            Placement::Policy if binding.bindless.use_heap => {
                let var = self.create_bindless_heap_variable(key)?;
                self.heap_reference(var, record, binding)
            }
            Placement::Policy => {
                let element = if record.kind == ResourceKind::RTAccelerationStructure {
                    self.builder.acceleration_structure_type()
                } else {
                    self.resource_image_type(record.kind, record.component_type, 1, ImageFormat::Unknown)?
                };
                let ty = self.range_type(element, record.range_size);
                let var = self.descriptor_variable(StorageClass::UniformConstant, ty, record.name, binding);
                ResourceReference {
                    stride: record.stride,
                    base_resource_is_array: record.range_size != 1,
                    bind_register: record.register,
                    ..ResourceReference::new(var, record.kind, record.component_type)
                }
            }
        };

        debug!(
            index = record.index,
            name = record.name,
            set = binding.descriptor_set,
            binding = binding.binding,
            bindless = reference.bindless,
            "remapped SRV"
        );
        store_reference(&mut self.srvs, record.index, reference);
        Ok(())
    }

    /// Storage format of a UAV: raw views are `R32ui`; typed views that are read need a format.
    fn uav_format(&self, record: &ResourceRecord<'_>, access: UavAccess) -> ImageFormat {
        if record.kind.is_raw_or_structured() {
            return ImageFormat::R32ui;
        }
        if !access.contains(UavAccess::READ) {
            return ImageFormat::Unknown;
        }
        match record.component_type {
            ComponentType::U32 => ImageFormat::R32ui,
            ComponentType::I32 => ImageFormat::R32i,
            ComponentType::F32 => ImageFormat::R32f,
            _ => ImageFormat::Unknown,
        }
    }

    fn emit_uav(&mut self, record: &ResourceRecord<'_>) -> Result<()> {
        let access = self
            .uav_access
            .get(&record.index)
            .copied()
            .unwrap_or_default();
        let format = self.uav_format(record, access);

        let buffer = record.kind.is_buffer();
        self.declare_range_capabilities(
            record.range_size,
            if buffer {
                Capability::StorageTexelBufferArrayDynamicIndexing
            } else {
                Capability::StorageImageArrayDynamicIndexing
            },
            buffer,
        );

        let placement = self.placement(ResourceClass::Uav, record);
        let binding = match placement {
            Placement::ShaderRecord(_) => VulkanUavBinding::default(),
            _ => self
                .remapper
                .remap_uav(&D3DUavBinding {
                    binding: record.d3d_binding(self.stage),
                    counter: record.has_counter,
                })
                .ok_or_else(|| policy_rejected("UAV", record))?,
        };

        let key = BindlessKey {
            class: ResourceClass::Uav,
            component: record.component_type,
            kind: record.kind,
            format,
            descriptor_set: binding.buffer.descriptor_set,
            binding: binding.buffer.binding,
            uav_read: access.contains(UavAccess::READ),
            uav_written: access.contains(UavAccess::WRITTEN),
            uav_coherent: record.globally_coherent,
            counters: false,
        };

        let (reference, counter) = match placement {
            Placement::Table { entry, base_offset } => {
                if !binding.buffer.bindless.use_heap {
                    return Err(table_must_be_bindless("UAV", record));
                }
                let var = self.create_bindless_heap_variable(key)?;
                let reference = self.table_reference(var, record, entry, base_offset);
                let counter = if record.has_counter {
                    if !binding.counter.bindless.use_heap {
                        return Err(table_must_be_bindless("UAV counter", record));
                    }
                    let counter_var = self.create_bindless_heap_variable(BindlessKey::counters(
                        binding.counter.descriptor_set,
                        binding.counter.binding,
                    ))?;
                    Some(ResourceReference {
                        stride: 4,
                        ..self.table_reference(counter_var, record, entry, base_offset)
                    })
                } else {
                    None
                };
                (reference, counter)
            }
            Placement::ShaderRecord(entry) => {
                if !record.kind.is_raw_or_structured() {
                    return Err(ConvertError::unsupported(
                        "UAV root descriptors must be raw or structured buffers",
                    ));
                }
                (self.shader_record_reference(record, entry)?, None)
            }
            Placement::Policy if binding.buffer.bindless.use_heap => {
                let var = self.create_bindless_heap_variable(key)?;
                let reference = self.heap_reference(var, record, binding.buffer);
                let counter = if record.has_counter {
                    if !binding.counter.bindless.use_heap {
                        error!(index = record.index, "bindless UAV with a non-bindless counter");
                        return Err(ConvertError::rejected(format!(
                            "UAV {} mixes a bindless buffer with a non-bindless counter",
                            record.index
                        )));
                    }
                    let counter_var = self.create_bindless_heap_variable(BindlessKey::counters(
                        binding.counter.descriptor_set,
                        binding.counter.binding,
                    ))?;
                    Some(ResourceReference {
                        stride: 4,
                        ..self.heap_reference(counter_var, record, binding.counter)
                    })
                } else {
                    None
                };
                (reference, counter)
            }
            Placement::Policy => {
                let element = self.resource_image_type(record.kind, record.component_type, 2, format)?;
                let ty = self.range_type(element, record.range_size);
                let var = self.descriptor_variable(StorageClass::UniformConstant, ty, record.name, binding.buffer);
                if !access.contains(UavAccess::READ) {
                    self.builder.decorate(var, Decoration::NonReadable, &[]);
                }
                if !access.contains(UavAccess::WRITTEN) {
                    self.builder.decorate(var, Decoration::NonWritable, &[]);
                }
                if record.globally_coherent {
                    self.builder.decorate(var, Decoration::Coherent, &[]);
                }
                let reference = ResourceReference {
                    stride: record.stride,
                    base_resource_is_array: record.range_size != 1,
                    bind_register: record.register,
                    ..ResourceReference::new(var, record.kind, record.component_type)
                };

                let counter = if record.has_counter {
                    if binding.counter.bindless.use_heap {
                        error!(index = record.index, "bindless UAV counter on a non-bindless UAV");
                        return Err(ConvertError::rejected(format!(
                            "UAV {} mixes a non-bindless buffer with a bindless counter",
                            record.index
                        )));
                    }
                    let u32_type = self.builder.uint_type(32);
                    self.builder.add_capability(Capability::ImageBuffer);
                    let counter_image = self.builder.image_type(
                        u32_type,
                        Dim::DimBuffer,
                        false,
                        false,
                        false,
                        2,
                        ImageFormat::R32ui,
                    );
                    let counter_type = self.range_type(counter_image, record.range_size);
                    let name = if record.name.is_empty() {
                        String::new()
                    } else {
                        format!("{}Counter", record.name)
                    };
                    let counter_var = self.descriptor_variable(
                        StorageClass::UniformConstant,
                        counter_type,
                        &name,
                        binding.counter,
                    );
                    Some(ResourceReference {
                        stride: 4,
                        base_resource_is_array: record.range_size != 1,
                        bind_register: record.register,
                        ..ResourceReference::new(counter_var, ResourceKind::TypedBuffer, ComponentType::U32)
                    })
                } else {
                    None
                };
                (reference, counter)
            }
        };

        debug!(
            index = record.index,
            name = record.name,
            set = binding.buffer.descriptor_set,
            binding = binding.buffer.binding,
            ?format,
            counter = counter.is_some(),
            "remapped UAV"
        );
        store_reference(&mut self.uavs, record.index, reference);
        if let Some(counter) = counter {
            store_reference(&mut self.uav_counters, record.index, counter);
        }
        Ok(())
    }

    fn emit_cbv(&mut self, record: &ResourceRecord<'_>) -> Result<()> {
        let placement = self.placement(ResourceClass::Cbv, record);
        let binding = match placement {
            Placement::ShaderRecord(_) => VulkanCbvBinding::Buffer(VulkanBinding::default()),
            _ => self
                .remapper
                .remap_cbv(&record.d3d_binding(self.stage))
                .ok_or_else(|| policy_rejected("CBV", record))?,
        };

        let ssbo = matches!(binding, VulkanCbvBinding::Buffer(b) if b.bindless.use_heap)
            && self.options.bindless_cbv_ssbo_emulation;
        self.declare_range_capabilities(
            record.range_size,
            if ssbo {
                Capability::StorageBufferArrayDynamicIndexing
            } else {
                Capability::UniformBufferArrayDynamicIndexing
            },
            false,
        );

        let key = |b: VulkanBinding| BindlessKey {
            class: ResourceClass::Cbv,
            component: ComponentType::Invalid,
            kind: ResourceKind::CBuffer,
            format: ImageFormat::Unknown,
            descriptor_set: b.descriptor_set,
            binding: b.binding,
            uav_read: false,
            uav_written: false,
            uav_coherent: false,
            counters: false,
        };

        let reference = match (placement, binding) {
            (Placement::Table { entry, base_offset }, VulkanCbvBinding::Buffer(b)) if b.bindless.use_heap => {
                let var = self.create_bindless_heap_variable(key(b))?;
                self.table_reference(var, record, entry, base_offset)
            }
            (Placement::Table { .. }, _) => return Err(table_must_be_bindless("CBV", record)),
            (Placement::ShaderRecord(entry), _) => self.shader_record_reference(record, entry)?,
            (Placement::Policy, VulkanCbvBinding::PushConstant { offset_in_words }) => {
                let root = self.root_constants.ok_or_else(|| {
                    error!(index = record.index, "push-constant CBV without root constants");
                    ConvertError::rejected(format!(
                        "CBV {} maps to root constants, but the policy reports none",
                        record.index
                    ))
                })?;
                ResourceReference {
                    push_constant_member: offset_in_words,
                    push_constant: true,
                    ..ResourceReference::new(root.var_id, record.kind, ComponentType::Invalid)
                }
            }
            (Placement::Policy, VulkanCbvBinding::Buffer(b)) if b.bindless.use_heap => {
                let var = self.create_bindless_heap_variable(key(b))?;
                self.heap_reference(var, record, b)
            }
            (Placement::Policy, VulkanCbvBinding::Buffer(b)) => {
                let vec4_count = record.cbv_size.div_ceil(16).max(1);
                let f32_type = self.builder.float_type(32);
                let vec4 = self.builder.vector_type(f32_type, 4);
                let array = self.builder.array_type(vec4, vec4_count, 16);
                let block = self.get_struct_type(&[array], record.name);
                self.builder
                    .decorate_member(block, 0, Decoration::Offset, &[0]);
                self.builder.decorate(block, Decoration::Block, &[]);
                let ty = self.range_type(block, record.range_size);
                let var = self.descriptor_variable(StorageClass::Uniform, ty, record.name, b);
                ResourceReference {
                    base_resource_is_array: record.range_size != 1,
                    bind_register: record.register,
                    ..ResourceReference::new(var, record.kind, ComponentType::Invalid)
                }
            }
        };

        debug!(
            index = record.index,
            name = record.name,
            ?binding,
            "remapped CBV"
        );
        store_reference(&mut self.cbvs, record.index, reference);
        Ok(())
    }

    fn emit_sampler(&mut self, record: &ResourceRecord<'_>) -> Result<()> {
        // Sampled-image dynamic indexing also covers sampler arrays.
        self.declare_range_capabilities(
            record.range_size,
            Capability::SampledImageArrayDynamicIndexing,
            false,
        );

        let placement = self.placement(ResourceClass::Sampler, record);
        // Samplers can only live in descriptor tables.
        if let Placement::ShaderRecord(_) = placement {
            return Err(table_must_be_bindless("sampler", record));
        }
        let binding = self
            .remapper
            .remap_sampler(&record.d3d_binding(self.stage))
            .ok_or_else(|| policy_rejected("sampler", record))?;

        let key = BindlessKey {
            class: ResourceClass::Sampler,
            component: ComponentType::Invalid,
            kind: ResourceKind::Sampler,
            format: ImageFormat::Unknown,
            descriptor_set: binding.descriptor_set,
            binding: binding.binding,
            uav_read: false,
            uav_written: false,
            uav_coherent: false,
            counters: false,
        };

        let reference = match placement {
            Placement::Table { entry, base_offset } => {
                if !binding.bindless.use_heap {
                    return Err(table_must_be_bindless("sampler", record));
                }
                let var = self.create_bindless_heap_variable(key)?;
                self.table_reference(var, record, entry, base_offset)
            }
            Placement::ShaderRecord(_) => return Err(table_must_be_bindless("sampler", record)),
            Placement::Policy if binding.bindless.use_heap => {
                let var = self.create_bindless_heap_variable(key)?;
                self.heap_reference(var, record, binding)
            }
            Placement::Policy => {
                let sampler = self.builder.sampler_type();
                let ty = self.range_type(sampler, record.range_size);
                let var = self.descriptor_variable(StorageClass::UniformConstant, ty, record.name, binding);
                ResourceReference {
                    base_resource_is_array: record.range_size != 1,
                    bind_register: record.register,
                    ..ResourceReference::new(var, record.kind, ComponentType::Invalid)
                }
            }
        };

        debug!(
            index = record.index,
            name = record.name,
            set = binding.descriptor_set,
            binding = binding.binding,
            "remapped sampler"
        );
        store_reference(&mut self.samplers, record.index, reference);
        Ok(())
    }

    pub fn resource_reference(&self, class: ResourceClass, index: u32) -> Result<ResourceReference> {
        let table = match class {
            ResourceClass::Srv => &self.srvs,
            ResourceClass::Uav => &self.uavs,
            ResourceClass::Cbv => &self.cbvs,
            ResourceClass::Sampler => &self.samplers,
        };
        table
            .get(index as usize)
            .copied()
            .flatten()
            .ok_or_else(|| {
                ConvertError::malformed(format!("{class:?} {index} is not declared in dx.resources"))
            })
    }
}
