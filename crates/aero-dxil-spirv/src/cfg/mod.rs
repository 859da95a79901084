//! Control-flow graph handed to the structurizer: node arena, terminators, phi records and the
//! dominance queries that operate on them.

mod node;
mod pool;

pub use node::{CfgNode, NodeId, NodeIr, Phi, PhiIncoming, SwitchCase, Terminator};
pub use pool::CfgNodePool;
