//! Drives instrumentation end to end.
//!
//! [`ShaderInstrumenter`] detects a shader's container format, decodes it, runs the active
//! features and re-encodes it, falling back to the original bytes when anything fails. Around it
//! sit the asynchronous pieces: [`ShaderCompiler`] builds instrumented variants on a worker pool
//! through an [`InstrumentationCache`], [`PipelineCompiler`] recreates pipelines through a
//! [`PipelineBackend`], and [`InstrumentationController`] chains the two for a feature set
//! change. Both compilers hand out [`Ticket`]s that can be polled via [`CommitCounters`].

#![forbid(unsafe_code)]

mod cache;
mod config;
mod controller;
mod error;
mod instrument;
mod native;
mod pipeline_compiler;
mod registry;
pub mod scheduler;
mod shader_compiler;

pub use crate::cache::{CacheKey, CachedShader, InstrumentationCache};
pub use crate::config::{
    SchedulerConfig, ShutdownMode, CHUNK_DIVISOR_VAR, MAX_WORKERS_VAR, SHUTDOWN_VAR,
};
pub use crate::controller::{InstrumentationController, PipelineDescription};
pub use crate::error::{ConfigError, ControllerError, InstrumentError, NativeCompileFailure};
pub use crate::instrument::{
    InstrumentOutcome, PassthroughReason, ShaderFormat, ShaderInstrumenter,
};
pub use crate::native::{
    NativePipeline, PipelineBackend, PipelineHandle, PipelineJob, PipelineKind, PipelineStage,
};
pub use crate::pipeline_compiler::{BatchCompletion, BatchStatus, PipelineCompiler, PipelineResult};
pub use crate::registry::{ShaderHandle, ShaderRegistry};
pub use crate::scheduler::{CommitCounters, Ticket, WorkerPool};
pub use crate::shader_compiler::{ShaderCompiler, ShaderCompletion, ShaderJob, ShaderResult};
