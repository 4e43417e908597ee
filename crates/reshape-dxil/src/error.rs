use reshape_dxbc::DxbcError;
use reshape_il::IlError;
use thiserror::Error;

use crate::scan::DxilBlockType;

pub type Result<T> = std::result::Result<T, DxilError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DxilError {
    #[error("malformed DXIL header: {context}")]
    MalformedHeader { context: String },

    #[error("truncated bitstream: {context}")]
    TruncatedStream { context: String },

    #[error("module block {found:?} appears after {previous:?}")]
    OrderingViolation {
        previous: DxilBlockType,
        found: DxilBlockType,
    },

    #[error("unresolved value reference: {context}")]
    UnresolvedIdentifier { context: String },

    #[error("basic block {block} of function {function} has no terminator")]
    UnterminatedBlock { function: String, block: u32 },

    #[error("unsupported construct: {context}")]
    UnsupportedConstruct { context: String },

    #[error(transparent)]
    Il(#[from] IlError),

    #[error(transparent)]
    Container(#[from] DxbcError),
}

impl DxilError {
    pub(crate) fn malformed_header(context: impl Into<String>) -> Self {
        Self::MalformedHeader {
            context: context.into(),
        }
    }

    pub(crate) fn truncated(context: impl Into<String>) -> Self {
        Self::TruncatedStream {
            context: context.into(),
        }
    }

    pub(crate) fn unresolved(context: impl Into<String>) -> Self {
        Self::UnresolvedIdentifier {
            context: context.into(),
        }
    }

    pub(crate) fn unsupported(context: impl Into<String>) -> Self {
        Self::UnsupportedConstruct {
            context: context.into(),
        }
    }
}
