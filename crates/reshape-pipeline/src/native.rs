use std::sync::Arc;

use reshape_il::FeatureBitSet;

use crate::error::NativeCompileFailure;
use crate::registry::ShaderHandle;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineHandle(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

/// One shader stage of a pipeline, with the binary the native call should consume.
#[derive(Debug, Clone)]
pub struct PipelineStage {
    pub shader: ShaderHandle,
    pub bytes: Arc<[u8]>,
}

/// A single pipeline creation request.
#[derive(Debug, Clone)]
pub struct PipelineJob {
    pub pipeline: PipelineHandle,
    pub kind: PipelineKind,
    pub stages: Vec<PipelineStage>,
    /// Features the stage binaries were instrumented with.
    pub feature_bit_set: FeatureBitSet,
}

/// Opaque object returned by the native backend.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NativePipeline(pub u64);

/// The driver-side pipeline factory. Called from scheduler worker threads.
pub trait PipelineBackend: Send + Sync + 'static {
    fn create_pipeline(&self, job: &PipelineJob) -> Result<NativePipeline, NativeCompileFailure>;
}
