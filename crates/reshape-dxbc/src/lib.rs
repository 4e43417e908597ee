//! A bounds-checked scanner and stitcher for DirectX shader containers (`DXBC`).
//!
//! [`DxbcPhysicalBlockScan`] splits a container into typed sections without copying. Sections
//! that get rewritten (typically the `DXIL` chunk) are given an output stream, and
//! [`DxbcPhysicalBlockScan::stitch`] reassembles the container with fresh offsets, a zeroed
//! checksum and an optional [`ContainerSigner`].

#![forbid(unsafe_code)]

mod dxbc;
mod error;
mod fourcc;
mod scan;
mod stitch;

/// Helpers for building synthetic DXBC blobs in tests.
///
/// Only available for this crate's own tests or with the `test-utils` feature.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(feature = "md5")]
pub use crate::dxbc::compute_md5_checksum;
pub use crate::dxbc::{DxbcChunk, DxbcFile, DxbcHeader};
pub use crate::error::DxbcError;
pub use crate::fourcc::FourCC;
pub use crate::scan::{DxbcBlockType, DxbcPhysicalBlockScan, DxbcSection};
#[cfg(feature = "md5")]
pub use crate::stitch::Md5Signer;
pub use crate::stitch::{ContainerSigner, UnsignedContainer};
