use thiserror::Error;

/// Errors produced while scanning or stitching a DXBC container.
///
/// Each variant carries a human-readable context string describing where parsing failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DxbcError {
    #[error("malformed DXBC header: {context}")]
    MalformedHeader { context: String },
    #[error("malformed DXBC chunk offsets: {context}")]
    MalformedOffsets { context: String },
    #[error("DXBC data out of bounds: {context}")]
    OutOfBounds { context: String },
    #[error("invalid DXBC chunk: {context}")]
    InvalidChunk { context: String },
    #[error("failed to sign DXBC container: {context}")]
    Signing { context: String },
}

impl DxbcError {
    pub(crate) fn malformed_header(context: impl Into<String>) -> Self {
        Self::MalformedHeader {
            context: context.into(),
        }
    }

    pub(crate) fn malformed_offsets(context: impl Into<String>) -> Self {
        Self::MalformedOffsets {
            context: context.into(),
        }
    }

    pub(crate) fn out_of_bounds(context: impl Into<String>) -> Self {
        Self::OutOfBounds {
            context: context.into(),
        }
    }

    pub fn invalid_chunk(context: impl Into<String>) -> Self {
        Self::InvalidChunk {
            context: context.into(),
        }
    }

    pub fn signing(context: impl Into<String>) -> Self {
        Self::Signing {
            context: context.into(),
        }
    }

    /// The context string without the variant prefix.
    pub fn context(&self) -> &str {
        match self {
            Self::MalformedHeader { context }
            | Self::MalformedOffsets { context }
            | Self::OutOfBounds { context }
            | Self::InvalidChunk { context }
            | Self::Signing { context } => context,
        }
    }
}
