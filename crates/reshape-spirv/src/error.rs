use reshape_il::IlError;
use thiserror::Error;

use crate::scan::SpvBlockType;

pub type Result<T> = std::result::Result<T, SpvError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpvError {
    #[error("malformed SPIR-V header: {context}")]
    MalformedHeader { context: String },

    #[error("truncated SPIR-V stream: {context}")]
    TruncatedStream { context: String },

    #[error("{found:?} instruction at word {offset} appears after the {previous:?} section")]
    OrderingViolation {
        previous: SpvBlockType,
        found: SpvBlockType,
        offset: usize,
    },

    #[error("unresolved identifier %{id}: {context}")]
    UnresolvedIdentifier { id: u32, context: String },

    #[error("basic block %{block} of function %{function} has no terminator")]
    UnterminatedBlock { function: u32, block: u32 },

    #[error("unsupported construct: {context}")]
    UnsupportedConstruct { context: String },

    #[error(transparent)]
    Il(#[from] IlError),
}

impl SpvError {
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

    pub(crate) fn unresolved(id: u32, context: impl Into<String>) -> Self {
        Self::UnresolvedIdentifier {
            id,
            context: context.into(),
        }
    }

    pub(crate) fn unsupported(context: impl Into<String>) -> Self {
        Self::UnsupportedConstruct {
            context: context.into(),
        }
    }
}
