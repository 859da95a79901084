use crate::spv::{Id, Operation};

/// Index of a node in its [`super::CfgNodePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchCase {
    pub value: u32,
    pub node: NodeId,
}

/// How control leaves a node. Read by the structurizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Branch {
        target: NodeId,
    },
    Condition {
        condition: Id,
        true_block: NodeId,
        false_block: NodeId,
    },
    Switch {
        condition: Id,
        default: NodeId,
        cases: Vec<SwitchCase>,
    },
    Return {
        value: Option<Id>,
    },
}

impl Terminator {
    pub fn is_switch(&self) -> bool {
        matches!(self, Self::Switch { .. })
    }

    /// Rewrites every field naming `from` to name `to` instead.
    pub(crate) fn retarget(&mut self, from: NodeId, to: NodeId) {
        let patch = |n: &mut NodeId| {
            if *n == from {
                *n = to;
            }
        };
        match self {
            Self::Branch { target } => patch(target),
            Self::Condition {
                true_block,
                false_block,
                ..
            } => {
                patch(true_block);
                patch(false_block);
            }
            Self::Switch { default, cases, .. } => {
                patch(default);
                for case in cases {
                    patch(&mut case.node);
                }
            }
            Self::Return { .. } => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhiIncoming {
    pub block: NodeId,
    pub id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phi {
    pub id: Id,
    pub type_id: Id,
    pub incoming: Vec<PhiIncoming>,
}

/// Per-node instruction payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeIr {
    pub phi: Vec<Phi>,
    pub operations: Vec<Operation>,
    /// Assigned once, after the node's operations are emitted.
    pub terminator: Option<Terminator>,
}

#[derive(Debug, Clone, Default)]
pub struct CfgNode {
    pub name: String,

    pub(crate) succ: Vec<NodeId>,
    pub(crate) pred: Vec<NodeId>,
    pub(crate) succ_back_edge: Option<NodeId>,
    pub(crate) pred_back_edge: Option<NodeId>,
    pub(crate) headers: Vec<NodeId>,

    /// `Some(self)` for the entry node and for unreachable nodes.
    pub(crate) immediate_dominator: Option<NodeId>,
    /// Depth-first post-order number. The entry has the highest number.
    pub(crate) post_visit_order: Option<u32>,

    pub ir: NodeIr,
}

impl CfgNode {
    pub fn succ(&self) -> &[NodeId] {
        &self.succ
    }

    pub fn pred(&self) -> &[NodeId] {
        &self.pred
    }

    pub fn succ_back_edge(&self) -> Option<NodeId> {
        self.succ_back_edge
    }

    pub fn pred_back_edge(&self) -> Option<NodeId> {
        self.pred_back_edge
    }

    pub fn headers(&self) -> &[NodeId] {
        &self.headers
    }

    pub fn post_visit_order(&self) -> Option<u32> {
        self.post_visit_order
    }

    /// Cached immediate dominator, without computing it.
    pub fn cached_immediate_dominator(&self) -> Option<NodeId> {
        self.immediate_dominator
    }

    pub(crate) fn add_unique_succ(&mut self, node: NodeId) {
        if !self.succ.contains(&node) {
            self.succ.push(node);
        }
    }

    pub(crate) fn add_unique_pred(&mut self, node: NodeId) {
        if !self.pred.contains(&node) {
            self.pred.push(node);
        }
    }
}
