mod common;

use aero_dxil_spirv::cfg::{SwitchCase, Terminator};
use aero_dxil_spirv::dxil::{
    BinaryOp, DxOp, InstructionKind, MdOperand, Predicate, ShaderKind, ShaderPropertyTag,
    Terminator as DxTerminator, Type, ValueId,
};
use aero_dxil_spirv::spv::Operand;
use aero_dxil_spirv::{ConvertError, Converter};
use common::{init_tracing, ShaderBuilder};
use pretty_assertions::assert_eq;
use spirv::{ExecutionMode, Op};

fn thread_id_x(b: &mut ShaderBuilder) -> ValueId {
    let x = b.module.const_i32(0);
    b.dx_call(DxOp::ThreadId, Type::i32(), &[x])
        .expect("thread id is a value")
}

#[test]
fn diamond_phi_incoming_values_name_their_predecessor_nodes() {
    init_tracing();
    let mut b = ShaderBuilder::compute(64, 1, 1);
    let main = b.main;
    let entry = b.block;
    let then_block = b.module.add_block(main, "then");
    let else_block = b.module.add_block(main, "else");
    let merge_block = b.module.add_block(main, "merge");

    let tid = thread_id_x(&mut b);
    let zero = b.module.const_i32(0);
    let cond = b.module.push(
        main,
        entry,
        Type::i1(),
        InstructionKind::Compare {
            predicate: Predicate::IcmpEq,
            lhs: tid,
            rhs: zero,
        },
    );
    b.module.set_terminator(
        main,
        entry,
        DxTerminator::CondBr {
            condition: cond,
            true_block: then_block,
            false_block: else_block,
        },
    );
    b.module
        .set_terminator(main, then_block, DxTerminator::Br { target: merge_block });
    b.module
        .set_terminator(main, else_block, DxTerminator::Br { target: merge_block });
    let one = b.module.const_i32(1);
    let two = b.module.const_i32(2);
    b.module.push(
        main,
        merge_block,
        Type::i32(),
        InstructionKind::Phi {
            incoming: vec![(one, then_block), (two, else_block)],
        },
    );
    b.module
        .set_terminator(main, merge_block, DxTerminator::Ret { value: None });
    let module = b.finish();

    let mut converted = Converter::new(&module).convert_entry_point().unwrap();
    let pool = &mut converted.pool;
    assert_eq!(pool.len(), 4);

    let names: Vec<_> = pool.ids().map(|id| pool.node(id).name.clone()).collect();
    assert_eq!(names, ["main.entry", "main.then", "main.else", "main.merge"]);
    let ids: Vec<_> = pool.ids().collect();
    let (entry, then_node, else_node, merge) = (ids[0], ids[1], ids[2], ids[3]);

    match pool.node(entry).ir.terminator.clone() {
        Some(Terminator::Condition {
            true_block,
            false_block,
            ..
        }) => {
            assert_eq!(true_block, then_node);
            assert_eq!(false_block, else_node);
        }
        other => panic!("unexpected entry terminator {other:?}"),
    }

    let phi = &pool.node(merge).ir.phi;
    assert_eq!(phi.len(), 1);
    let blocks: Vec<_> = phi[0].incoming.iter().map(|i| i.block).collect();
    assert_eq!(blocks, [then_node, else_node]);
    let constants: Vec<_> = phi[0]
        .incoming
        .iter()
        .map(|i| converted.builder.constant_value(i.id))
        .collect();
    assert_eq!(constants, [Some(1), Some(2)]);

    let pool = &mut converted.pool;
    assert_eq!(pool.immediate_dominator(merge), entry);
    assert!(pool.dominates(entry, merge));
    assert!(!pool.dominates(then_node, merge));
}

#[test]
fn loop_phi_refers_forward_to_the_latch_value() {
    let mut b = ShaderBuilder::compute(1, 1, 1);
    let main = b.main;
    let entry = b.block;
    let header = b.module.add_block(main, "header");
    let body = b.module.add_block(main, "body");
    let exit = b.module.add_block(main, "exit");

    b.module
        .set_terminator(main, entry, DxTerminator::Br { target: header });

    let zero = b.module.const_i32(0);
    let one = b.module.const_i32(1);
    let ten = b.module.const_i32(10);
    let counter = b.module.push(
        main,
        header,
        Type::i32(),
        InstructionKind::Phi {
            incoming: vec![(zero, entry)],
        },
    );
    let done = b.module.push(
        main,
        header,
        Type::i1(),
        InstructionKind::Compare {
            predicate: Predicate::IcmpUlt,
            lhs: counter,
            rhs: ten,
        },
    );
    b.module.set_terminator(
        main,
        header,
        DxTerminator::CondBr {
            condition: done,
            true_block: body,
            false_block: exit,
        },
    );
    let next = b.module.push(
        main,
        body,
        Type::i32(),
        InstructionKind::Binary {
            op: BinaryOp::Add,
            lhs: counter,
            rhs: one,
        },
    );
    b.module
        .set_terminator(main, body, DxTerminator::Br { target: header });
    b.module
        .set_terminator(main, exit, DxTerminator::Ret { value: None });

    b.module.add_phi_incoming(main, header, counter, next, body);
    let module = b.finish();

    let mut converted = Converter::new(&module).convert_entry_point().unwrap();
    let ids: Vec<_> = converted.pool.ids().collect();
    let (entry_node, header_node, body_node) = (ids[0], ids[1], ids[2]);

    let phi = converted.pool.node(header_node).ir.phi[0].clone();
    assert_eq!(phi.incoming[0].block, entry_node);
    assert_eq!(phi.incoming[1].block, body_node);

    let add = converted
        .pool
        .node(body_node)
        .ir
        .operations
        .iter()
        .find(|op| op.op == Op::IAdd)
        .cloned()
        .expect("loop body increments the counter");
    assert_eq!(add.id, Some(phi.incoming[1].id));
    assert!(add.operands.contains(&Operand::Id(phi.id)));

    let pool = &mut converted.pool;
    assert!(pool.dominates(header_node, body_node));
    assert!(pool.can_backtrace_to(body_node, header_node));
}

#[test]
fn switch_cases_keep_their_literal_values() {
    let mut b = ShaderBuilder::compute(1, 1, 1);
    let main = b.main;
    let entry = b.block;
    let a = b.module.add_block(main, "a");
    let c = b.module.add_block(main, "c");
    let fallback = b.module.add_block(main, "default");

    let tid = thread_id_x(&mut b);
    let three = b.module.const_i32(3);
    let seven = b.module.const_i32(7);
    b.module.set_terminator(
        main,
        entry,
        DxTerminator::Switch {
            condition: tid,
            default: fallback,
            cases: vec![(three, a), (seven, c)],
        },
    );
    for block in [a, c, fallback] {
        b.module
            .set_terminator(main, block, DxTerminator::Ret { value: None });
    }
    let module = b.finish();

    let converted = Converter::new(&module).convert_entry_point().unwrap();
    let entry_node = converted.entry;
    let Some(Terminator::Switch { default, cases, .. }) =
        converted.pool.node(entry_node).ir.terminator.clone()
    else {
        panic!("entry does not end in a switch");
    };
    assert_eq!(converted.pool.node(default).name, "main.default");
    let values: Vec<_> = cases.iter().map(|SwitchCase { value, .. }| *value).collect();
    assert_eq!(values, [3, 7]);
    assert_eq!(converted.pool.node(entry_node).succ().len(), 3);
}

#[test]
fn unreachable_blocks_abort_the_conversion() {
    let mut b = ShaderBuilder::compute(1, 1, 1);
    let (main, entry) = (b.main, b.block);
    b.module
        .set_terminator(main, entry, DxTerminator::Unreachable);
    let module = b.finish();

    let err = Converter::new(&module).convert_entry_point().unwrap_err();
    assert!(matches!(err, ConvertError::Unsupported(_)), "{err}");
}

fn hull_shader(output_control_points: u32, partitioning: u32) -> aero_dxil_spirv::dxil::Module {
    let mut b = ShaderBuilder::new(ShaderKind::Hull);
    b.ret();
    let patch = b.module.add_function("patch_constants", Type::Void, vec![]);
    let patch_block = b.module.add_block(patch, "entry");
    b.module
        .set_terminator(patch, patch_block, DxTerminator::Ret { value: None });

    let patch_value = b.module.function(patch).value;
    let mut state = vec![Some(MdOperand::Value(patch_value))];
    // input control points, output control points, domain (tri), partitioning, output topology (cw)
    for v in [3, output_control_points, 2, partitioning, 3] {
        state.push(Some(MdOperand::Value(b.module.const_i32(v))));
    }
    let state = b.module.add_metadata(state);
    b.property(ShaderPropertyTag::HSState, MdOperand::Node(state));
    b.finish()
}

#[test]
fn hull_main_runs_patch_constants_once_after_a_barrier() {
    let module = hull_shader(3, 1);
    let converted = Converter::new(&module).convert_entry_point().unwrap();

    let names: Vec<_> = converted
        .builder
        .functions()
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(names, ["hull_main", "patch_main"]);
    assert_eq!(converted.leaf_functions.len(), 2);
    assert_eq!(
        converted.pool.node(converted.leaf_functions[1].entry).name,
        "patch_constants.entry"
    );

    let entry = converted.pool.node(converted.entry);
    let ops: Vec<_> = entry.ir.operations.iter().map(|op| op.op).collect();
    assert_eq!(
        ops,
        [Op::FunctionCall, Op::Load, Op::IEqual, Op::ControlBarrier]
    );
    let Some(Terminator::Condition {
        true_block,
        false_block,
        ..
    }) = entry.ir.terminator.clone()
    else {
        panic!("hull entry does not branch on the invocation id");
    };
    let patch = converted.pool.node(true_block);
    assert_eq!(patch.name, "patch");
    assert_eq!(
        patch.ir.operations[0].operands[0],
        Operand::Id(converted.leaf_functions[1].function_id)
    );
    assert_eq!(
        patch.ir.terminator,
        Some(Terminator::Branch {
            target: false_block
        })
    );
    assert_eq!(
        converted.pool.node(false_block).ir.terminator,
        Some(Terminator::Return { value: None })
    );
    assert_eq!(
        converted
            .builder
            .execution_mode_literals(ExecutionMode::OutputVertices),
        Some(&[3][..])
    );
}

#[test]
fn single_control_point_hull_calls_both_functions_inline() {
    let module = hull_shader(1, 1);
    let converted = Converter::new(&module).convert_entry_point().unwrap();
    let entry = converted.pool.node(converted.entry);
    let calls = entry
        .ir
        .operations
        .iter()
        .filter(|op| op.op == Op::FunctionCall)
        .count();
    assert_eq!(calls, 2);
    assert_eq!(entry.ir.terminator, Some(Terminator::Return { value: None }));
}

#[test]
fn pow2_partitioning_falls_back_to_equal_spacing() {
    init_tracing();
    let module = hull_shader(3, 2);
    let converted = Converter::new(&module).convert_entry_point().unwrap();
    assert!(converted
        .builder
        .execution_mode_literals(ExecutionMode::SpacingEqual)
        .is_some());
}
