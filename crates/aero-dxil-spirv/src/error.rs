use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConvertError>;

/// Failure while translating a DXIL entry point.
///
/// Every failure aborts the current entry point; the partially built SPIR-V module is discarded
/// by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    /// A metadata tuple is missing a required operand or has the wrong shape.
    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    /// The input uses a construct that has no translation.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The binding policy or local root signature refused a resource.
    #[error("binding rejected: {0}")]
    PolicyRejected(String),

    /// The input contradicts an assumption made by an earlier translation stage.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMetadata(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub(crate) fn rejected(msg: impl Into<String>) -> Self {
        Self::PolicyRejected(msg.into())
    }

    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
