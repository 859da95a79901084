use super::module::Module;
use super::value::ValueId;
use crate::error::{ConvertError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MdNodeId(pub(crate) u32);

#[derive(Debug, Clone, PartialEq)]
pub enum MdOperand {
    Node(MdNodeId),
    String(String),
    /// A constant or function value wrapped as metadata.
    Value(ValueId),
}

/// Metadata tuple. Operands may be null.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MdNode {
    pub operands: Vec<Option<MdOperand>>,
}

/// Typed operand access. Missing or mistyped required operands are
/// [`ConvertError::MalformedMetadata`].
impl Module {
    pub fn md_node(&self, node: MdNodeId) -> &MdNode {
        &self.metadata[node.0 as usize]
    }

    pub fn md_len(&self, node: MdNodeId) -> usize {
        self.md_node(node).operands.len()
    }

    pub fn md_operand(&self, node: MdNodeId, index: usize) -> Option<&MdOperand> {
        self.md_node(node).operands.get(index).and_then(Option::as_ref)
    }

    pub fn md_value(&self, node: MdNodeId, index: usize) -> Result<ValueId> {
        match self.md_operand(node, index) {
            Some(MdOperand::Value(v)) => Ok(*v),
            other => Err(ConvertError::malformed(format!(
                "operand {index} of !{} is not a value (found {other:?})",
                node.0
            ))),
        }
    }

    pub fn md_u64(&self, node: MdNodeId, index: usize) -> Result<u64> {
        let value = self.md_value(node, index)?;
        self.value(value).as_const_int().ok_or_else(|| {
            ConvertError::malformed(format!(
                "operand {index} of !{} is not an integer constant",
                node.0
            ))
        })
    }

    pub fn md_u32(&self, node: MdNodeId, index: usize) -> Result<u32> {
        self.md_u64(node, index).map(|v| v as u32)
    }

    pub fn md_bool(&self, node: MdNodeId, index: usize) -> Result<bool> {
        self.md_u64(node, index).map(|v| v != 0)
    }

    pub fn md_string(&self, node: MdNodeId, index: usize) -> Result<&str> {
        match self.md_operand(node, index) {
            Some(MdOperand::String(s)) => Ok(s),
            other => Err(ConvertError::malformed(format!(
                "operand {index} of !{} is not a string (found {other:?})",
                node.0
            ))),
        }
    }

    /// Optional child node. Null operands and out-of-range indices read as `None`.
    pub fn md_child(&self, node: MdNodeId, index: usize) -> Result<Option<MdNodeId>> {
        match self.md_operand(node, index) {
            None => Ok(None),
            Some(MdOperand::Node(child)) => Ok(Some(*child)),
            Some(other) => Err(ConvertError::malformed(format!(
                "operand {index} of !{} is not a node (found {other:?})",
                node.0
            ))),
        }
    }

    /// Child node that must be present.
    pub fn md_required_child(&self, node: MdNodeId, index: usize) -> Result<MdNodeId> {
        self.md_child(node, index)?.ok_or_else(|| {
            ConvertError::malformed(format!("operand {index} of !{} is missing", node.0))
        })
    }

    /// Child nodes of a list tuple, skipping null entries.
    pub fn md_children(&self, node: MdNodeId) -> Result<Vec<MdNodeId>> {
        let mut out = Vec::with_capacity(self.md_len(node));
        for i in 0..self.md_len(node) {
            if let Some(child) = self.md_child(node, i)? {
                out.push(child);
            }
        }
        Ok(out)
    }
}
