use thiserror::Error;

use crate::Id;

pub type Result<T> = std::result::Result<T, IlError>;

/// Errors raised while building or rewriting an IL [`crate::Program`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IlError {
    #[error("identifier {id} is outside the identifier bound {bound}")]
    UnresolvedIdentifier { id: Id, bound: u32 },

    #[error("block {block} is already terminated; instructions cannot be appended after a terminator")]
    BlockFrozen { block: Id },

    #[error("block {block} has no terminator")]
    UnterminatedBlock { block: Id },

    #[error("function {0} does not exist")]
    UnknownFunction(Id),

    #[error("block {block} does not exist in function {function}")]
    UnknownBlock { function: Id, block: Id },

    #[error("instruction index {index} is out of range for block {block} ({len} instructions)")]
    InstructionOutOfRange { block: Id, index: usize, len: usize },

    #[error("value {0} has no known type")]
    UntypedValue(Id),

    #[error("type {0} cannot be used here: {1}")]
    TypeMismatch(Id, &'static str),

    #[error("block {block} cannot be split: {reason}")]
    UnsupportedSplit { block: Id, reason: &'static str },

    #[error("feature dependency cycle involving `{0}`")]
    FeatureCycle(String),

    #[error("feature `{feature}` depends on unregistered feature `{dependency}`")]
    MissingDependency { feature: String, dependency: String },

    #[error("feature `{feature}` failed: {reason}")]
    Feature { feature: String, reason: String },
}
