//! Target-side IR: operation records stored in graph nodes, and the builder that owns module-level
//! declarations (types, constants, variables, decorations, capabilities).
//!
//! Binary encoding is left to the consumer; everything here is plain data.

mod builder;

pub use builder::{
    ConstantDecl, DecorationRecord, EntryPoint, LeafFunctionDecl, SpirvBuilder, TypeDecl, Variable,
};
pub use spirv::Word as Id;

/// An operand of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Id(Id),
    Literal(u32),
}

/// One target instruction inside a function body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub op: spirv::Op,
    pub id: Option<Id>,
    pub type_id: Option<Id>,
    pub operands: Vec<Operand>,
}

impl Operation {
    /// Operation without a result (stores, barriers, calls to void functions).
    pub fn new(op: spirv::Op) -> Self {
        Self {
            op,
            id: None,
            type_id: None,
            operands: Vec::new(),
        }
    }

    pub fn with_result(op: spirv::Op, id: Id, type_id: Id) -> Self {
        Self {
            op,
            id: Some(id),
            type_id: Some(type_id),
            operands: Vec::new(),
        }
    }

    pub fn add_id(&mut self, id: Id) -> &mut Self {
        self.operands.push(Operand::Id(id));
        self
    }

    pub fn add_ids(&mut self, ids: &[Id]) -> &mut Self {
        self.operands.extend(ids.iter().copied().map(Operand::Id));
        self
    }

    pub fn add_literal(&mut self, literal: u32) -> &mut Self {
        self.operands.push(Operand::Literal(literal));
        self
    }

    pub fn add_literals(&mut self, literals: &[u32]) -> &mut Self {
        self.operands
            .extend(literals.iter().copied().map(Operand::Literal));
        self
    }

    /// Id operands in order.
    pub fn id_operands(&self) -> impl Iterator<Item = Id> + '_ {
        self.operands.iter().filter_map(|o| match o {
            Operand::Id(id) => Some(*id),
            Operand::Literal(_) => None,
        })
    }

    pub fn literal_operands(&self) -> impl Iterator<Item = u32> + '_ {
        self.operands.iter().filter_map(|o| match o {
            Operand::Literal(v) => Some(*v),
            Operand::Id(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_kinds_are_kept_apart() {
        let mut op = Operation::with_result(spirv::Op::CompositeExtract, 10, 2);
        op.add_id(7).add_literals(&[1, 3]);
        assert_eq!(op.id_operands().collect::<Vec<_>>(), vec![7]);
        assert_eq!(op.literal_operands().collect::<Vec<_>>(), vec![1, 3]);
    }
}
