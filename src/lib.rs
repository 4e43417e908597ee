//! Load-time shader instrumentation.
//!
//! This crate re-exports the workspace members so embedders can depend on a single package:
//!
//! - [`il`]: the format-independent program model and instrumentation framework.
//! - [`spirv`], [`dxbc`], [`dxil`]: container scanners, decoders and encoders.
//! - [`features`]: instrumentation features built on [`il::Feature`].
//! - [`pipeline`]: the instrumenter, caches and the asynchronous pipeline scheduler.

#![forbid(unsafe_code)]

pub use reshape_dxbc as dxbc;
pub use reshape_dxil as dxil;
pub use reshape_features as features;
pub use reshape_il as il;
pub use reshape_pipeline as pipeline;
pub use reshape_spirv as spirv;
