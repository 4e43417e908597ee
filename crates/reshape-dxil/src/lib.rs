//! DXIL backend: decodes the LLVM bitcode of a `DXIL` chunk into the reshape IL and writes
//! instrumented programs back.
//!
//! [`DxilPhysicalBlockScan`] parses the program header and the bitstream into a block tree,
//! enforcing the module's section order. [`DxilModule`] decodes that tree into a
//! [`reshape_il::Program`] and re-encodes it on [`DxilModule::compile`]; only function bodies that
//! changed are rebuilt, and a program nobody touched compiles to its original bytes. Resource size
//! queries and exports are lowered onto `dx.op` intrinsics, with exports written to UAVs placed as
//! described by a [`reshape_il::ExportLayout`].
//! [`DxilContainer`] does the same for a whole DXBC container.

#![forbid(unsafe_code)]

pub mod bitstream;
pub mod codes;
mod container;
mod decode;
mod encode;
mod error;
mod header;
mod layout;
mod lower;
mod module;
mod scan;

/// Builders for synthetic DXIL programs in tests.
///
/// Only available for this crate's own tests or with the `test-utils` feature.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crate::container::DxilContainer;
pub use crate::error::{DxilError, Result};
pub use crate::header::{DxilProgramHeader, DXIL_MAGIC, PROGRAM_HEADER_LEN};
pub use crate::module::DxilModule;
pub use crate::scan::{DxilBlockType, DxilPhysicalBlockScan};
