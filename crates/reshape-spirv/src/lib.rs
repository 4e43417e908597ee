//! SPIR-V backend: decodes a SPIR-V module into the reshape IL and writes instrumented programs
//! back.
//!
//! [`SpvPhysicalBlockScan`] splits the word stream into its logical sections, enforcing their
//! order. [`SpvModule`] decodes the sections into a [`reshape_il::Program`] and re-encodes it on
//! [`SpvModule::recompile`]. Sections the IL does not model are copied through, and functions
//! nobody touched are copied word for word. Export instructions are lowered to atomic appends
//! into texel buffers placed as described by an [`ExportLayout`].

#![forbid(unsafe_code)]

pub mod codes;
mod error;
mod export;
mod module;
mod parse;
mod recompile;
mod scan;
mod stream;

/// Builders for synthetic SPIR-V modules in tests.
///
/// Only available for this crate's own tests or with the `test-utils` feature.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crate::error::{Result, SpvError};
pub use crate::export::{ExportLayout, INTERNAL_NAME_PREFIX};
pub use crate::module::SpvModule;
pub use crate::scan::{
    SpvBlockType, SpvHeader, SpvInstruction, SpvInstructions, SpvPhysicalBlockScan, SpvSection,
};
pub use crate::stream::{words_to_bytes, SpvStream};
