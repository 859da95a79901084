use std::fmt;

/// DXIL address spaces as encoded in pointer types.
///
/// Every pointer carries its address space explicitly; the translator never has to recover it
/// from the pointee type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    /// Function-local memory (allocas) and private globals.
    Thread,
    /// Device memory (resource handles in library shaders).
    Device,
    /// Legacy constant-buffer memory.
    CBuffer,
    /// `groupshared` memory.
    GroupShared,
}

impl AddressSpace {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Thread,
            1 => Self::Device,
            2 => Self::CBuffer,
            3 => Self::GroupShared,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    /// Integer of the given bit width. Width 1 is the boolean type.
    Int(u32),
    Half,
    Float,
    Double,
    Vector { element: Box<Type>, len: u32 },
    Array { element: Box<Type>, len: u32 },
    Struct { name: Option<String>, members: Vec<Type> },
    Pointer { pointee: Box<Type>, address_space: AddressSpace },
    /// Function type; only used for callee values.
    Function { ret: Box<Type>, params: Vec<Type> },
}

impl Type {
    pub fn i1() -> Self {
        Self::Int(1)
    }

    pub fn i8() -> Self {
        Self::Int(8)
    }

    pub fn i16() -> Self {
        Self::Int(16)
    }

    pub fn i32() -> Self {
        Self::Int(32)
    }

    pub fn i64() -> Self {
        Self::Int(64)
    }

    pub fn vector(element: Type, len: u32) -> Self {
        Self::Vector {
            element: Box::new(element),
            len,
        }
    }

    pub fn array(element: Type, len: u32) -> Self {
        Self::Array {
            element: Box::new(element),
            len,
        }
    }

    pub fn pointer(pointee: Type, address_space: AddressSpace) -> Self {
        Self::Pointer {
            pointee: Box::new(pointee),
            address_space,
        }
    }

    pub fn named_struct(name: &str, members: Vec<Type>) -> Self {
        Self::Struct {
            name: Some(name.to_owned()),
            members,
        }
    }

    /// Integer bit width, or `None` for non-integer types.
    pub fn int_width(&self) -> Option<u32> {
        match self {
            Self::Int(width) => Some(*width),
            _ => None,
        }
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Self::Int(1))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Half | Self::Float | Self::Double)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Self::Pointer { .. })
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Self::Pointer { pointee, .. } => Some(pointee),
            _ => None,
        }
    }

    pub fn address_space(&self) -> Option<AddressSpace> {
        match self {
            Self::Pointer { address_space, .. } => Some(*address_space),
            _ => None,
        }
    }

    /// Scalar type of a vector, or the type itself.
    pub fn scalar(&self) -> &Type {
        match self {
            Self::Vector { element, .. } => element,
            other => other,
        }
    }

    pub fn vector_len(&self) -> Option<u32> {
        match self {
            Self::Vector { len, .. } => Some(*len),
            _ => None,
        }
    }

    pub fn struct_members(&self) -> Option<&[Type]> {
        match self {
            Self::Struct { members, .. } => Some(members),
            _ => None,
        }
    }

    pub fn struct_name(&self) -> Option<&str> {
        match self {
            Self::Struct { name, .. } => name.as_deref(),
            _ => None,
        }
    }

    /// Strips any number of array levels.
    pub fn innermost_element(&self) -> &Type {
        let mut ty = self;
        while let Self::Array { element, .. } = ty {
            ty = element;
        }
        ty
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Int(width) => write!(f, "i{width}"),
            Self::Half => write!(f, "half"),
            Self::Float => write!(f, "float"),
            Self::Double => write!(f, "double"),
            Self::Vector { element, len } => write!(f, "<{len} x {element}>"),
            Self::Array { element, len } => write!(f, "[{len} x {element}]"),
            Self::Struct {
                name: Some(name), ..
            } => write!(f, "%{name}"),
            Self::Struct { name: None, members } => {
                write!(f, "{{ ")?;
                for (i, member) in members.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{member}")?;
                }
                write!(f, " }}")
            }
            Self::Pointer {
                pointee,
                address_space,
            } => write!(f, "{pointee} addrspace({address_space:?})*"),
            Self::Function { ret, params } => {
                write!(f, "{ret} (")?;
                for (i, param) in params.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_space_round_trips_raw_values() {
        assert_eq!(AddressSpace::from_raw(0), Some(AddressSpace::Thread));
        assert_eq!(AddressSpace::from_raw(3), Some(AddressSpace::GroupShared));
        assert_eq!(AddressSpace::from_raw(7), None);
    }

    #[test]
    fn display_matches_llvm_spelling() {
        let ty = Type::pointer(Type::array(Type::Float, 4), AddressSpace::GroupShared);
        assert_eq!(ty.to_string(), "[4 x float] addrspace(GroupShared)*");
        assert_eq!(Type::vector(Type::i32(), 2).to_string(), "<2 x i32>");
    }

    #[test]
    fn innermost_element_strips_nested_arrays() {
        let ty = Type::array(Type::array(Type::Half, 2), 3);
        assert_eq!(ty.innermost_element(), &Type::Half);
    }
}
