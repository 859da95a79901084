mod common;

use aero_dxil_spirv::dxil::{
    DxOp, MdOperand, Semantic, ShaderKind, ShaderPropertyTag, Terminator, Type,
};
use aero_dxil_spirv::remap::{
    D3DStreamOutput, D3DVertexInput, ResourceRemapper, VulkanStreamOutput, VulkanVertexInput,
};
use aero_dxil_spirv::{ConvertError, ConverterOption, Converter};
use common::{init_tracing, Element, ShaderBuilder};
use pretty_assertions::assert_eq;
use spirv::{BuiltIn, Capability, Decoration, ExecutionMode, Op};

/// Shifts vertex inputs by a fixed number of locations and captures every output.
struct VertexPolicy {
    location_bias: Option<u32>,
    capture: bool,
}

impl ResourceRemapper for VertexPolicy {
    fn remap_vertex_input(&mut self, input: &D3DVertexInput<'_>) -> Option<VulkanVertexInput> {
        self.location_bias.map(|bias| VulkanVertexInput {
            location: input.start_row + bias,
        })
    }

    fn remap_stream_output(&mut self, output: &D3DStreamOutput<'_>) -> Option<VulkanStreamOutput> {
        Some(VulkanStreamOutput {
            enable: self.capture,
            offset: 16 * output.semantic_index,
            stride: 32,
            buffer_index: 1,
        })
    }
}

/// Vertex shader copying `TEXCOORD.y` into `SV_Position.x`.
fn passthrough_vertex_shader() -> aero_dxil_spirv::dxil::Module {
    let mut b = ShaderBuilder::new(ShaderKind::Vertex);
    b.input(Element::user(0, "TEXCOORD", 2, 2));
    b.output(Element::system(0, "SV_Position", Semantic::Position, 4));
    b.output(Element {
        semantic_index: 1,
        ..Element::user(1, "COLOR", 1, 4)
    });

    let element = b.module.const_i32(0);
    let row = b.module.const_i32(0);
    let y = b.module.const_i8(1);
    let x = b.module.const_i8(0);
    let vertex = b.module.undef(Type::i32());
    let value = b
        .dx_call(DxOp::LoadInput, Type::Float, &[element, row, y, vertex])
        .unwrap();
    b.dx_call(DxOp::StoreOutput, Type::Void, &[element, row, x, value]);
    b.ret();
    b.finish()
}

#[test]
fn vertex_inputs_take_the_policy_location() {
    init_tracing();
    let module = passthrough_vertex_shader();
    let mut converter = Converter::new(&module);
    converter.set_resource_remapper(VertexPolicy {
        location_bias: Some(5),
        capture: false,
    });
    let converted = converter.convert_entry_point().unwrap();
    let builder = &converted.builder;

    let texcoord = builder.variable_by_name("TEXCOORD").unwrap().id;
    assert_eq!(
        builder.decoration_literals(texcoord, Decoration::Location),
        Some(&[7][..])
    );
    let position = builder.variable_by_name("SV_Position").unwrap().id;
    assert_eq!(builder.builtin_of(position), Some(BuiltIn::Position));
    let color = builder.variable_by_name("COLOR_1").unwrap().id;
    assert_eq!(
        builder.decoration_literals(color, Decoration::Location),
        Some(&[1][..])
    );

    let interface = &builder.entry_point().unwrap().interface;
    assert!(interface.contains(&texcoord) && interface.contains(&position));

    let ops: Vec<_> = converted
        .pool
        .node(converted.entry)
        .ir
        .operations
        .iter()
        .map(|op| op.op)
        .collect();
    assert_eq!(
        ops,
        [Op::AccessChain, Op::Load, Op::AccessChain, Op::Store]
    );
}

#[test]
fn rejected_vertex_inputs_abort_the_conversion() {
    let module = passthrough_vertex_shader();
    let mut converter = Converter::new(&module);
    converter.set_resource_remapper(VertexPolicy {
        location_bias: None,
        capture: false,
    });
    let err = converter.convert_entry_point().unwrap_err();
    assert!(matches!(err, ConvertError::PolicyRejected(_)), "{err}");
}

#[test]
fn captured_outputs_enable_transform_feedback() {
    let module = passthrough_vertex_shader();
    let mut converter = Converter::new(&module);
    converter.set_resource_remapper(VertexPolicy {
        location_bias: Some(0),
        capture: true,
    });
    let converted = converter.convert_entry_point().unwrap();
    let builder = &converted.builder;

    assert!(builder.has_capability(Capability::TransformFeedback));
    assert!(builder.execution_mode_literals(ExecutionMode::Xfb).is_some());
    let color = builder.variable_by_name("COLOR_1").unwrap().id;
    assert_eq!(builder.decoration_literals(color, Decoration::Offset), Some(&[16][..]));
    assert_eq!(builder.decoration_literals(color, Decoration::XfbStride), Some(&[32][..]));
    assert_eq!(builder.decoration_literals(color, Decoration::XfbBuffer), Some(&[1][..]));
}

#[test]
fn default_policy_captures_nothing() {
    let module = passthrough_vertex_shader();
    let converted = Converter::new(&module).convert_entry_point().unwrap();
    assert!(!converted.builder.has_capability(Capability::TransformFeedback));
}

fn pixel_shader_with_targets(rows: &[u32]) -> aero_dxil_spirv::dxil::Module {
    let mut b = ShaderBuilder::new(ShaderKind::Pixel);
    for (id, &row) in rows.iter().enumerate() {
        b.output(Element {
            semantic_index: row,
            start_row: row,
            ..Element::system(id as u32, "SV_Target", Semantic::Target, 4)
        });
    }
    b.ret();
    b.finish()
}

#[test]
fn dual_source_targets_share_location_zero() {
    let module = pixel_shader_with_targets(&[0, 1]);
    let mut converter = Converter::new(&module);
    converter.set_option(ConverterOption::DualSourceBlending(true));
    let converted = converter.convert_entry_point().unwrap();
    let builder = &converted.builder;

    for (name, index) in [("SV_Target", 0), ("SV_Target_1", 1)] {
        let var = builder.variable_by_name(name).unwrap().id;
        assert_eq!(builder.decoration_literals(var, Decoration::Location), Some(&[0][..]));
        assert_eq!(builder.decoration_literals(var, Decoration::Index), Some(&[index][..]));
    }
}

#[test]
fn dual_source_rejects_a_third_target() {
    let module = pixel_shader_with_targets(&[0, 2]);
    let mut converter = Converter::new(&module);
    converter.set_option(ConverterOption::DualSourceBlending(true));
    let err = converter.convert_entry_point().unwrap_err();
    assert!(matches!(err, ConvertError::Unsupported(_)), "{err}");
}

#[test]
fn render_targets_use_their_row_as_location() {
    let module = pixel_shader_with_targets(&[0, 2]);
    let converted = Converter::new(&module).convert_entry_point().unwrap();
    let var = converted.builder.variable_by_name("SV_Target_2").unwrap().id;
    assert_eq!(
        converted.builder.decoration_literals(var, Decoration::Location),
        Some(&[2][..])
    );
}

fn assert_patch_location(
    converted: &aero_dxil_spirv::ConvertedFunction,
    name: &str,
    location: u32,
) {
    let builder = &converted.builder;
    let var = builder.variable_by_name(name).unwrap().id;
    assert_eq!(
        builder.decoration_literals(var, Decoration::Location),
        Some(&[location][..])
    );
    assert!(builder.has_decoration(var, Decoration::Patch));
}

#[test]
fn hull_patch_constants_follow_the_control_points() {
    let mut b = ShaderBuilder::new(ShaderKind::Hull);
    b.output(Element::user(0, "CP", 2, 4));
    b.patch_constant(Element::user(0, "EDGE", 0, 4));
    b.ret();
    let patch = b.module.add_function("patch_constants", Type::Void, vec![]);
    let patch_block = b.module.add_block(patch, "entry");
    b.module
        .set_terminator(patch, patch_block, Terminator::Ret { value: None });
    let patch_value = b.module.function(patch).value;
    let mut state = vec![Some(MdOperand::Value(patch_value))];
    for v in [3, 3, 2, 1, 3] {
        state.push(Some(MdOperand::Value(b.module.const_i32(v))));
    }
    let state = b.module.add_metadata(state);
    b.property(ShaderPropertyTag::HSState, MdOperand::Node(state));
    let module = b.finish();

    let converted = Converter::new(&module).convert_entry_point().unwrap();
    assert_patch_location(&converted, "EDGE", 3);
}

#[test]
fn domain_patch_constants_follow_the_control_points() {
    let mut b = ShaderBuilder::new(ShaderKind::Domain);
    b.input(Element {
        rows: 2,
        ..Element::user(0, "CP", 1, 4)
    });
    b.patch_constant(Element::user(0, "EDGE", 0, 4));
    // Triangle domain, three input control points.
    let state = b.tuple(&[2, 3]);
    b.property(ShaderPropertyTag::DSState, MdOperand::Node(state));
    b.ret();
    let module = b.finish();

    let converted = Converter::new(&module).convert_entry_point().unwrap();
    assert_patch_location(&converted, "EDGE", 3);
}
