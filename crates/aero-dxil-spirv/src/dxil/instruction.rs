use super::value::{BlockId, FunctionId, ValueId};
use super::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FPToUI,
    FPToSI,
    UIToFP,
    SIToFP,
    FPTrunc,
    FPExt,
    PtrToInt,
    IntToPtr,
    BitCast,
    AddrSpaceCast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Predicate {
    FcmpFalse,
    FcmpOeq,
    FcmpOgt,
    FcmpOge,
    FcmpOlt,
    FcmpOle,
    FcmpOne,
    FcmpOrd,
    FcmpUno,
    FcmpUeq,
    FcmpUgt,
    FcmpUge,
    FcmpUlt,
    FcmpUle,
    FcmpUne,
    FcmpTrue,
    IcmpEq,
    IcmpNe,
    IcmpUgt,
    IcmpUge,
    IcmpUlt,
    IcmpUle,
    IcmpSgt,
    IcmpSge,
    IcmpSlt,
    IcmpSle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicRmwOp {
    Xchg,
    Add,
    Sub,
    And,
    Nand,
    Or,
    Xor,
    Max,
    Min,
    UMax,
    UMin,
}

/// Non-terminator instruction bodies.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    Binary {
        op: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    FNeg {
        operand: ValueId,
    },
    Cast {
        op: CastOp,
        operand: ValueId,
    },
    GetElementPtr {
        base: ValueId,
        indices: Vec<ValueId>,
        in_bounds: bool,
    },
    Load {
        ptr: ValueId,
    },
    Store {
        ptr: ValueId,
        value: ValueId,
    },
    Compare {
        predicate: Predicate,
        lhs: ValueId,
        rhs: ValueId,
    },
    ExtractValue {
        aggregate: ValueId,
        indices: Vec<u32>,
    },
    Alloca {
        allocated: Type,
        array_size: ValueId,
    },
    Select {
        condition: ValueId,
        true_value: ValueId,
        false_value: ValueId,
    },
    AtomicRmw {
        op: AtomicRmwOp,
        ptr: ValueId,
        value: ValueId,
    },
    CmpXchg {
        ptr: ValueId,
        comparator: ValueId,
        new_value: ValueId,
    },
    ShuffleVector {
        lhs: ValueId,
        rhs: ValueId,
        /// Negative entries are undefined lanes.
        mask: Vec<i32>,
    },
    ExtractElement {
        vector: ValueId,
        index: ValueId,
    },
    InsertElement {
        vector: ValueId,
        value: ValueId,
        index: ValueId,
    },
    Phi {
        incoming: Vec<(ValueId, BlockId)>,
    },
    Call {
        callee: FunctionId,
        args: Vec<ValueId>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Value produced by the instruction; `None` for void results.
    pub result: Option<ValueId>,
    pub kind: InstructionKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Br {
        target: BlockId,
    },
    CondBr {
        condition: ValueId,
        true_block: BlockId,
        false_block: BlockId,
    },
    Switch {
        condition: ValueId,
        default: BlockId,
        cases: Vec<(ValueId, BlockId)>,
    },
    Ret {
        value: Option<ValueId>,
    },
    Unreachable,
}

impl Terminator {
    /// Successors in operand order: default before cases for switches, true before false for
    /// conditional branches.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Self::Br { target } => vec![*target],
            Self::CondBr {
                true_block,
                false_block,
                ..
            } => vec![*true_block, *false_block],
            Self::Switch { default, cases, .. } => std::iter::once(*default)
                .chain(cases.iter().map(|(_, block)| *block))
                .collect(),
            Self::Ret { .. } | Self::Unreachable => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_successors_list_default_first() {
        let term = Terminator::Switch {
            condition: ValueId(0),
            default: BlockId(3),
            cases: vec![(ValueId(1), BlockId(1)), (ValueId(2), BlockId(2))],
        };
        assert_eq!(term.successors(), vec![BlockId(3), BlockId(1), BlockId(2)]);
        assert!(Terminator::Ret { value: None }.successors().is_empty());
    }
}
