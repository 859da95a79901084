mod common;

use aero_dxil_spirv::dxil::{
    ComponentType, DxOp, InstructionKind, ResourceClass, ResourceKind, ShaderKind, Type,
};
use aero_dxil_spirv::remap::{
    D3DBinding, D3DUavBinding, ResourceRemapper, VulkanBinding, VulkanUavBinding,
};
use aero_dxil_spirv::spv::TypeDecl;
use aero_dxil_spirv::{ConvertError, Converter, UNBOUNDED_DESCRIPTORS};
use common::{init_tracing, res_ret_type, Resource, ShaderBuilder};
use pretty_assertions::assert_eq;
use spirv::{Capability, Decoration, ImageFormat, StorageClass};

const SRV: u32 = 0;
const UAV: u32 = 1;

/// Maps every SRV and sampler into a descriptor heap and records each request.
#[derive(Default)]
struct HeapRemapper {
    srv_requests: Vec<(u32, u32)>,
    sampler_requests: Vec<(u32, u32)>,
    reject_srvs: bool,
    direct: bool,
}

impl ResourceRemapper for HeapRemapper {
    fn remap_srv(&mut self, binding: &D3DBinding) -> Option<VulkanBinding> {
        self.srv_requests
            .push((binding.register_space, binding.register_index));
        if self.reject_srvs {
            return None;
        }
        Some(if self.direct {
            VulkanBinding::direct(binding.register_space, binding.register_index)
        } else {
            VulkanBinding::heap(1, 0, 0, binding.register_index)
        })
    }

    fn remap_sampler(&mut self, binding: &D3DBinding) -> Option<VulkanBinding> {
        self.sampler_requests
            .push((binding.register_space, binding.register_index));
        Some(if self.direct {
            VulkanBinding::direct(binding.register_space, binding.register_index)
        } else {
            VulkanBinding::heap(2, 0, 0, binding.register_index)
        })
    }

    fn root_constant_word_count(&self) -> u32 {
        4
    }
}

fn image_format_of(converted: &aero_dxil_spirv::ConvertedFunction, name: &str) -> ImageFormat {
    let var = converted
        .builder
        .variable_by_name(name)
        .unwrap_or_else(|| panic!("no variable named {name}"));
    match converted.builder.type_decl(var.pointee) {
        Some(TypeDecl::Image { format, .. }) => *format,
        other => panic!("{name} is not an image: {other:?}"),
    }
}

fn u32_buffer_uav(b: &mut ShaderBuilder) {
    b.uav(Resource {
        component: ComponentType::U32,
        ..Resource::typed(0, "counters", 0, ResourceKind::TypedBuffer)
    });
}

#[test]
fn unread_u32_uav_has_no_declared_format() {
    let mut b = ShaderBuilder::compute(1, 1, 1);
    u32_buffer_uav(&mut b);
    b.ret();
    let module = b.finish();

    let converted = Converter::new(&module).convert_entry_point().unwrap();
    assert_eq!(image_format_of(&converted, "counters"), ImageFormat::Unknown);
}

#[test]
fn one_load_forces_the_r32ui_format() {
    init_tracing();
    let mut b = ShaderBuilder::compute(1, 1, 1);
    u32_buffer_uav(&mut b);
    let handle = b.create_handle(UAV, 0, 0);
    let index = b.module.const_i32(3);
    let unused = b.module.undef(Type::i32());
    b.dx_call(DxOp::BufferLoad, res_ret_type(Type::i32()), &[handle, index, unused]);
    b.ret();
    let module = b.finish();

    let converted = Converter::new(&module).convert_entry_point().unwrap();
    assert_eq!(image_format_of(&converted, "counters"), ImageFormat::R32ui);
}

#[test]
fn residency_status_requests_sparse_residency_once() {
    let mut b = ShaderBuilder::compute(1, 1, 1);
    b.srv(Resource::typed(0, "texels", 0, ResourceKind::TypedBuffer));
    let handle = b.create_handle(SRV, 0, 0);
    let index = b.module.const_i32(0);
    let unused = b.module.undef(Type::i32());
    let load = b
        .dx_call(DxOp::BufferLoad, res_ret_type(Type::Float), &[handle, index, unused])
        .unwrap();
    for _ in 0..2 {
        b.module.push(
            b.main,
            b.block,
            Type::i32(),
            InstructionKind::ExtractValue {
                aggregate: load,
                indices: vec![4],
            },
        );
    }
    b.ret();
    let module = b.finish();

    let converted = Converter::new(&module).convert_entry_point().unwrap();
    let sparse = converted
        .builder
        .capabilities()
        .iter()
        .filter(|&&c| c == Capability::SparseResidency)
        .count();
    assert_eq!(sparse, 1);
}

#[test]
fn unbounded_ranges_declare_runtime_arrays_once() {
    let mut b = ShaderBuilder::compute(1, 1, 1);
    for (index, name) in ["a", "b"].into_iter().enumerate() {
        b.srv(Resource {
            space: index as u32,
            range_size: UNBOUNDED_DESCRIPTORS,
            ..Resource::typed(index as u32, name, 0, ResourceKind::Texture2D)
        });
    }
    b.ret();
    let module = b.finish();

    let converted = Converter::new(&module).convert_entry_point().unwrap();
    let capabilities = converted.builder.capabilities();
    let runtime = capabilities
        .iter()
        .filter(|&&c| c == Capability::RuntimeDescriptorArray)
        .count();
    assert_eq!(runtime, 1);
    assert!(converted
        .builder
        .has_extension("SPV_EXT_descriptor_indexing"));
}

#[test]
fn single_descriptors_need_no_dynamic_indexing() {
    let mut b = ShaderBuilder::compute(1, 1, 1);
    b.srv(Resource::typed(0, "tex", 0, ResourceKind::Texture2D));
    b.ret();
    let module = b.finish();

    let converted = Converter::new(&module).convert_entry_point().unwrap();
    assert!(!converted
        .builder
        .has_capability(Capability::SampledImageArrayDynamicIndexing));
    assert!(!converted
        .builder
        .has_capability(Capability::RuntimeDescriptorArray));
}

#[test]
fn heap_declarations_are_shared_by_matching_resources() {
    let mut b = ShaderBuilder::compute(1, 1, 1);
    b.srv(Resource::typed(0, "albedo", 0, ResourceKind::Texture2D));
    b.srv(Resource::typed(1, "normal", 1, ResourceKind::Texture2D));
    b.srv(Resource {
        component: ComponentType::U32,
        ..Resource::typed(2, "ids", 2, ResourceKind::Texture2D)
    });
    b.ret();
    let module = b.finish();

    let mut remapper = HeapRemapper::default();
    let mut converter = Converter::new(&module);
    converter.set_resource_remapper(&mut remapper);
    let converted = converter.convert_entry_point().unwrap();

    let heaps = converted
        .builder
        .variables()
        .iter()
        .filter(|v| v.storage == StorageClass::UniformConstant)
        .count();
    assert_eq!(heaps, 2);
    assert!(converted
        .builder
        .variables()
        .iter()
        .any(|v| v.storage == StorageClass::PushConstant));
}

#[test]
fn rejected_srv_aborts_the_conversion() {
    let mut b = ShaderBuilder::compute(1, 1, 1);
    b.srv(Resource::typed(0, "tex", 0, ResourceKind::Texture2D));
    b.ret();
    let module = b.finish();

    let mut remapper = HeapRemapper {
        reject_srvs: true,
        ..Default::default()
    };
    let mut converter = Converter::new(&module);
    converter.set_resource_remapper(&mut remapper);
    let err = converter.convert_entry_point().unwrap_err();
    assert!(matches!(err, ConvertError::PolicyRejected(_)), "{err}");
}

#[test]
fn scanning_consults_the_policy_for_every_resource() {
    let mut b = ShaderBuilder::compute(1, 1, 1);
    b.srv(Resource::typed(0, "a", 4, ResourceKind::Texture2D));
    b.srv(Resource {
        space: 2,
        ..Resource::typed(1, "b", 0, ResourceKind::Texture3D)
    });
    b.ret();
    let module = b.finish();

    let mut remapper = HeapRemapper::default();
    let mut converter = Converter::new(&module);
    converter.set_resource_remapper(&mut remapper);
    converter.scan_resources().unwrap();
    drop(converter);
    assert_eq!(remapper.srv_requests, [(0, 4), (2, 0)]);
}

fn ray_generation_with_srvs() -> aero_dxil_spirv::dxil::Module {
    let mut b = ShaderBuilder::new(ShaderKind::RayGeneration);
    b.srv(Resource {
        stride: 4,
        ..Resource::typed(0, "root_srv", 0, ResourceKind::RawBuffer)
    });
    b.srv(Resource::typed(1, "table_srv", 5, ResourceKind::Texture2D));
    b.srv(Resource {
        space: 1,
        ..Resource::typed(2, "global_srv", 0, ResourceKind::Texture2D)
    });
    b.ret();
    b.finish()
}

#[test]
fn local_root_signature_entries_bypass_direct_remapping() {
    let module = ray_generation_with_srvs();
    let mut remapper = HeapRemapper::default();
    let mut converter = Converter::new(&module);
    converter.set_resource_remapper(&mut remapper);
    converter.add_local_root_descriptor(ResourceClass::Srv, 0, 0);
    converter.add_local_root_descriptor_table(ResourceClass::Srv, 0, 5, UNBOUNDED_DESCRIPTORS, 16);
    let converted = converter.convert_entry_point().unwrap();
    drop(converter);

    // The root descriptor is never shown to the policy; the table entry still needs a heap.
    assert_eq!(remapper.srv_requests, [(0, 5), (1, 0)]);
    let sbt = converted
        .builder
        .variable_by_name("SBT")
        .expect("shader record buffer is declared");
    assert_eq!(sbt.storage, StorageClass::ShaderRecordBufferKHR);
}

#[test]
fn table_entries_must_map_to_a_heap() {
    let module = ray_generation_with_srvs();
    let mut remapper = HeapRemapper {
        direct: true,
        ..Default::default()
    };
    let mut converter = Converter::new(&module);
    converter.set_resource_remapper(&mut remapper);
    converter.add_local_root_descriptor_table(ResourceClass::Srv, 0, 5, 1, 0);
    let err = converter.convert_entry_point().unwrap_err();
    assert!(matches!(err, ConvertError::PolicyRejected(_)), "{err}");
}

#[test]
fn compute_shaders_ignore_the_local_root_signature() {
    let mut b = ShaderBuilder::compute(1, 1, 1);
    b.srv(Resource::typed(0, "tex", 5, ResourceKind::Texture2D));
    b.ret();
    let module = b.finish();

    let mut remapper = HeapRemapper {
        direct: true,
        ..Default::default()
    };
    let mut converter = Converter::new(&module);
    converter.set_resource_remapper(&mut remapper);
    converter.add_local_root_constants(0, 1, 4);
    converter.add_local_root_descriptor_table(ResourceClass::Srv, 0, 5, 1, 0);
    let converted = converter.convert_entry_point().unwrap();
    drop(converter);

    assert_eq!(remapper.srv_requests, [(0, 5)]);
    let builder = &converted.builder;
    assert!(builder.variable_by_name("SBT").is_none());
    let tex = builder.variable_by_name("tex").unwrap();
    assert_eq!(tex.storage, StorageClass::UniformConstant);
    assert_eq!(
        builder.decoration_literals(tex.id, Decoration::DescriptorSet),
        Some(&[0][..])
    );
    assert_eq!(
        builder.decoration_literals(tex.id, Decoration::Binding),
        Some(&[5][..])
    );
}

fn ray_generation_with_sampler(register: u32) -> aero_dxil_spirv::dxil::Module {
    let mut b = ShaderBuilder::new(ShaderKind::RayGeneration);
    b.sampler(Resource::typed(0, "smp", register, ResourceKind::Sampler));
    b.ret();
    b.finish()
}

#[test]
fn samplers_cannot_be_root_descriptors() {
    let module = ray_generation_with_sampler(2);
    let mut remapper = HeapRemapper::default();
    let mut converter = Converter::new(&module);
    converter.set_resource_remapper(&mut remapper);
    converter.add_local_root_descriptor(ResourceClass::Sampler, 0, 2);
    let err = converter.convert_entry_point().unwrap_err();
    drop(converter);

    assert!(matches!(err, ConvertError::PolicyRejected(_)), "{err}");
    assert!(remapper.sampler_requests.is_empty());
}

#[test]
fn sampler_tables_still_ask_for_a_heap() {
    let module = ray_generation_with_sampler(0);
    let mut remapper = HeapRemapper::default();
    let mut converter = Converter::new(&module);
    converter.set_resource_remapper(&mut remapper);
    converter.add_local_root_descriptor_table(
        ResourceClass::Sampler,
        0,
        0,
        UNBOUNDED_DESCRIPTORS,
        0,
    );
    converter.convert_entry_point().unwrap();
    drop(converter);

    assert_eq!(remapper.sampler_requests, [(0, 0)]);
}

/// Places the UAV buffer and its counter on opposite sides of the heap.
struct SplitCounterRemapper {
    bindless_buffer: bool,
}

impl ResourceRemapper for SplitCounterRemapper {
    fn remap_uav(&mut self, binding: &D3DUavBinding) -> Option<VulkanUavBinding> {
        let b = &binding.binding;
        let heap = VulkanBinding::heap(3, 0, 0, b.register_index);
        let direct = VulkanBinding::direct(b.register_space, b.register_index);
        Some(if self.bindless_buffer {
            VulkanUavBinding {
                buffer: heap,
                counter: direct,
            }
        } else {
            VulkanUavBinding {
                buffer: direct,
                counter: heap,
            }
        })
    }

    fn root_constant_word_count(&self) -> u32 {
        4
    }
}

#[test]
fn uav_buffer_and_counter_must_agree_on_the_heap() {
    for bindless_buffer in [true, false] {
        let mut b = ShaderBuilder::compute(1, 1, 1);
        b.uav(Resource {
            component: ComponentType::U32,
            has_counter: true,
            ..Resource::typed(0, "appended", 0, ResourceKind::TypedBuffer)
        });
        b.ret();
        let module = b.finish();

        let mut converter = Converter::new(&module);
        converter.set_resource_remapper(SplitCounterRemapper { bindless_buffer });
        let err = converter.convert_entry_point().unwrap_err();
        assert!(
            matches!(err, ConvertError::PolicyRejected(_)),
            "bindless buffer {bindless_buffer}: {err}"
        );
    }
}

#[test]
fn identity_policy_rejects_a_counter_in_the_last_space() {
    let mut b = ShaderBuilder::compute(1, 1, 1);
    b.uav(Resource {
        component: ComponentType::U32,
        space: u32::MAX,
        has_counter: true,
        ..Resource::typed(0, "appended", 0, ResourceKind::TypedBuffer)
    });
    b.ret();
    let module = b.finish();

    let err = Converter::new(&module).convert_entry_point().unwrap_err();
    assert!(matches!(err, ConvertError::PolicyRejected(_)), "{err}");
}
