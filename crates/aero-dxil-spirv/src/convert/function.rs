//! Function bodies to graph nodes, plus the generated hull shader entry.

use std::collections::VecDeque;

use hashbrown::HashSet;
use spirv::{BuiltIn, Op};
use tracing::debug;

use crate::cfg::{CfgNodePool, NodeId, Phi, PhiIncoming, SwitchCase, Terminator};
use crate::dxil::{BlockId, FunctionId, InstructionKind, Terminator as DxTerminator};
use crate::error::{ConvertError, Result};
use crate::spv::Id;

use super::context::ConvertContext;
use super::LeafFunction;

const SCOPE_WORKGROUP: u32 = 2;
const SCOPE_INVOCATION: u32 = 4;

impl ConvertContext<'_> {
    fn node_for_block(&mut self, pool: &mut CfgNodePool, function: FunctionId, block: BlockId) -> NodeId {
        if let Some(&node) = self.block_to_node.get(&(function, block)) {
            return node;
        }
        let module = self.module;
        let func = module.function(function);
        let name = match &func.block(block).name {
            Some(name) if !name.is_empty() => format!("{}.{name}", func.name),
            _ => format!("{}.{}", func.name, block.index()),
        };
        let node = pool.create_named_node(&name);
        self.block_to_node.insert((function, block), node);
        node
    }

    /// Translates every block reachable from the entry block of `function`, breadth first.
    ///
    /// Discovery and emission share one pass: a block is emitted when it is dequeued, and nodes
    /// for successors and phi predecessors are created on first mention, so every edge and
    /// incoming block already has a node when it is recorded.
    ///
    /// Returns the node of the entry block.
    pub fn convert_function(&mut self, pool: &mut CfgNodePool, function: FunctionId) -> Result<NodeId> {
        let module = self.module;
        let func = module.function(function);
        let entry_block = func.block_ids().next().ok_or_else(|| {
            ConvertError::malformed(format!("function {} has no body", func.name))
        })?;

        self.current_function = Some(function);
        let entry = self.node_for_block(pool, function, entry_block);

        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([entry_block]);
        visited.insert(entry_block);

        while let Some(block_id) = queue.pop_front() {
            let node = self.node_for_block(pool, function, block_id);
            let block = func.block(block_id);
            debug!(function = %func.name, block = block_id.index(), "translating block");

            // Sampled images are not reused across blocks; a later block may not be dominated.
            self.combined_image_sampler_cache.clear();

            let mut phis = Vec::new();
            for instruction in &block.instructions {
                if let InstructionKind::Phi { incoming } = &instruction.kind {
                    let result = instruction.result.ok_or_else(|| {
                        ConvertError::internal("phi without a result value")
                    })?;
                    let id = self.get_id_for_value(result)?;
                    let type_id = self.get_type_id_for_value(result)?;
                    self.id_to_type.insert(id, type_id);
                    let mut phi = Phi {
                        id,
                        type_id,
                        incoming: Vec::with_capacity(incoming.len()),
                    };
                    for &(value, pred) in incoming {
                        phi.incoming.push(PhiIncoming {
                            block: self.node_for_block(pool, function, pred),
                            id: self.get_id_for_value(value)?,
                        });
                    }
                    phis.push(phi);
                } else {
                    self.emit_instruction(instruction)?;
                }
            }

            let terminator = block.terminator.as_ref().ok_or_else(|| {
                ConvertError::malformed(format!(
                    "block {} of {} has no terminator",
                    block_id.index(),
                    func.name
                ))
            })?;
            for succ in terminator.successors() {
                if visited.insert(succ) {
                    queue.push_back(succ);
                }
            }
            let terminator = self.translate_terminator(pool, function, node, terminator)?;

            let ir = &mut pool.node_mut(node).ir;
            ir.phi = phis;
            ir.operations = self.take_ops();
            pool.set_terminator(node, terminator);
        }

        self.current_function = None;
        Ok(entry)
    }

    fn translate_terminator(
        &mut self,
        pool: &mut CfgNodePool,
        function: FunctionId,
        node: NodeId,
        terminator: &DxTerminator,
    ) -> Result<Terminator> {
        let target = |ctx: &mut Self, pool: &mut CfgNodePool, block: BlockId| {
            let succ = ctx.node_for_block(pool, function, block);
            pool.add_branch(node, succ);
            succ
        };
        Ok(match terminator {
            DxTerminator::Br { target: block } => Terminator::Branch {
                target: target(self, pool, *block),
            },
            DxTerminator::CondBr {
                condition,
                true_block,
                false_block,
            } => Terminator::Condition {
                condition: self.get_id_for_value(*condition)?,
                true_block: target(self, pool, *true_block),
                false_block: target(self, pool, *false_block),
            },
            DxTerminator::Switch {
                condition,
                default,
                cases,
            } => {
                let condition = self.get_id_for_value(*condition)?;
                let default = target(self, pool, *default);
                let mut translated = Vec::with_capacity(cases.len());
                for &(value, block) in cases {
                    translated.push(SwitchCase {
                        value: self.const_u32_operand(value, "switch case")?,
                        node: target(self, pool, block),
                    });
                }
                Terminator::Switch {
                    condition,
                    default,
                    cases: translated,
                }
            }
            DxTerminator::Ret { value } => Terminator::Return {
                value: value.map(|v| self.get_id_for_value(v)).transpose()?,
            },
            DxTerminator::Unreachable => {
                return Err(ConvertError::unsupported("unreachable terminator"))
            }
        })
    }

    fn emit_call_leaf(&mut self, function: Id) {
        let void_type = self.builder.void_type();
        self.emit(Op::FunctionCall, void_type, &[function]);
    }

    /// Builds the hull entry: the control-point function runs per invocation, then invocation 0
    /// runs the patch-constant function once every control point is written.
    ///
    /// Returns the entry node and the two leaf functions it calls.
    pub fn build_hull_main(&mut self, pool: &mut CfgNodePool) -> Result<(NodeId, Vec<LeafFunction>)> {
        let patch_function = self.exec_meta.patch_constant_function.ok_or_else(|| {
            ConvertError::internal("hull shader without a patch constant function")
        })?;

        let entry = pool.create_named_node("entry");
        pool.set_entry(entry);

        let hull_main = self.builder.declare_function("hull_main");
        let patch_main = self.builder.declare_function("patch_main");

        let hull_entry = self.convert_function(pool, self.entry.function)?;
        let patch_entry = self.convert_function(pool, patch_function)?;

        self.emit_call_leaf(hull_main);
        if self.exec_meta.stage_output_num_vertex > 1 {
            let invocation_id = self
                .builder
                .builtin_shader_input(BuiltIn::InvocationId)
                .ok_or_else(|| ConvertError::internal("InvocationId input unavailable"))?;
            let u32_type = self.builder.uint_type(32);
            let bool_type = self.builder.bool_type();
            let invocation = self.emit(Op::Load, u32_type, &[invocation_id]);
            let zero = self.builder.constant_u32(0);
            let is_first = self.emit(Op::IEqual, bool_type, &[invocation, zero]);

            let execution = self.builder.constant_u32(SCOPE_WORKGROUP);
            let memory = self.builder.constant_u32(SCOPE_INVOCATION);
            let semantics = self.builder.constant_u32(0);
            self.emit_void(Op::ControlBarrier, &[execution, memory, semantics]);
            pool.node_mut(entry).ir.operations = self.take_ops();

            let patch = pool.create_named_node("patch");
            let merge = pool.create_named_node("merge");
            pool.add_branch(entry, patch);
            pool.add_branch(entry, merge);
            pool.add_branch(patch, merge);
            pool.set_terminator(
                entry,
                Terminator::Condition {
                    condition: is_first,
                    true_block: patch,
                    false_block: merge,
                },
            );

            self.emit_call_leaf(patch_main);
            pool.node_mut(patch).ir.operations = self.take_ops();
            pool.set_terminator(patch, Terminator::Branch { target: merge });
            pool.set_terminator(merge, Terminator::Return { value: None });
        } else {
            self.emit_call_leaf(patch_main);
            pool.node_mut(entry).ir.operations = self.take_ops();
            pool.set_terminator(entry, Terminator::Return { value: None });
        }

        Ok((
            entry,
            vec![
                LeafFunction {
                    entry: hull_entry,
                    function_id: hull_main,
                },
                LeafFunction {
                    entry: patch_entry,
                    function_id: patch_main,
                },
            ],
        ))
    }
}
