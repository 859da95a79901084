use super::types::Type;

/// Index of a value in [`super::Module`]'s value arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub(crate) u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub(crate) u32);

impl FunctionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a basic block inside its owning function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(pub(crate) u32);

impl GlobalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Integer bits, zero-extended to 64 bits.
    Int(u64),
    Float(f64),
    /// `zeroinitializer` / null of any type.
    Null,
    /// Vector or array constant.
    Aggregate(Vec<ValueId>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    Argument { function: FunctionId, index: u32 },
    /// Result of an instruction in `function`.
    Instruction { function: FunctionId },
    Constant(Constant),
    Undef,
    Global(GlobalId),
    Function(FunctionId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub ty: Type,
    pub kind: ValueKind,
    pub name: Option<String>,
}

impl Value {
    pub fn as_constant(&self) -> Option<&Constant> {
        match &self.kind {
            ValueKind::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// Integer constant bits, truncated to the value's width.
    pub fn as_const_int(&self) -> Option<u64> {
        match (&self.kind, &self.ty) {
            (ValueKind::Constant(Constant::Int(bits)), Type::Int(width)) => {
                Some(if *width >= 64 {
                    *bits
                } else {
                    bits & ((1u64 << width) - 1)
                })
            }
            (ValueKind::Constant(Constant::Null), Type::Int(_)) => Some(0),
            _ => None,
        }
    }

    pub fn as_const_float(&self) -> Option<f64> {
        match &self.kind {
            ValueKind::Constant(Constant::Float(v)) => Some(*v),
            ValueKind::Constant(Constant::Null) if self.ty.is_float() => Some(0.0),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ValueKind::Constant(_) | ValueKind::Undef)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_int_is_masked_to_width() {
        let v = Value {
            ty: Type::i16(),
            kind: ValueKind::Constant(Constant::Int(0x1_ffff)),
            name: None,
        };
        assert_eq!(v.as_const_int(), Some(0xffff));
    }

    #[test]
    fn null_reads_as_zero() {
        let v = Value {
            ty: Type::i32(),
            kind: ValueKind::Constant(Constant::Null),
            name: None,
        };
        assert_eq!(v.as_const_int(), Some(0));
        assert!(v.is_constant());
    }
}
