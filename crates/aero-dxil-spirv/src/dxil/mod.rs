//! In-memory model of a parsed DXIL module.
//!
//! The translator only reads this model. Bitcode parsing is a separate concern; tests assemble
//! modules through the builder methods on [`Module`].

mod enums;
mod instruction;
mod metadata;
mod module;
mod types;
mod value;

pub use enums::*;
pub use instruction::{
    AtomicRmwOp, BinaryOp, CastOp, Instruction, InstructionKind, Predicate, Terminator,
};
pub use metadata::{MdNode, MdNodeId, MdOperand};
pub use module::{BasicBlock, Function, GlobalVariable, Module};
pub use types::{AddressSpace, Type};
pub use value::{BlockId, Constant, FunctionId, GlobalId, Value, ValueId, ValueKind};

/// Named metadata holding the `[srvs, uavs, cbvs, samplers]` resource lists.
pub const RESOURCES_METADATA: &str = "dx.resources";
/// Named metadata holding entry-point tuples.
pub const ENTRY_POINTS_METADATA: &str = "dx.entryPoints";
/// Named metadata holding `[kind, major, minor]`.
pub const SHADER_MODEL_METADATA: &str = "dx.shaderModel";

/// Prefix shared by all DXIL intrinsic declarations.
pub const DX_OP_PREFIX: &str = "dx.op";
