use std::sync::Arc;

use reshape_il::InstrumentationConfig;

use crate::cache::{CacheKey, CachedShader, InstrumentationCache};
use crate::config::{SchedulerConfig, ShutdownMode};
use crate::instrument::{InstrumentOutcome, ShaderInstrumenter};
use crate::registry::ShaderHandle;
use crate::scheduler::{BatchScheduler, CommitCounters, Ticket};

/// Request to build one instrumented variant of a shader.
#[derive(Debug, Clone)]
pub struct ShaderJob {
    pub shader: ShaderHandle,
    pub bytes: Arc<[u8]>,
    pub config: InstrumentationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderResult {
    pub shader: ShaderHandle,
    pub config: InstrumentationConfig,
    /// The instrumented binary, or the original one if instrumentation fell back.
    pub bytes: Arc<[u8]>,
    pub instrumented: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderCompletion {
    pub ticket: Ticket,
    pub results: Vec<ShaderResult>,
}

/// Instruments shaders on a worker pool, consulting an [`InstrumentationCache`] first.
pub struct ShaderCompiler {
    instrumenter: Arc<ShaderInstrumenter>,
    cache: Arc<InstrumentationCache>,
    scheduler: BatchScheduler<ShaderJob, ShaderResult>,
}

impl ShaderCompiler {
    pub fn new(
        instrumenter: Arc<ShaderInstrumenter>,
        cache: Arc<InstrumentationCache>,
        config: SchedulerConfig,
    ) -> Self {
        let scheduler = BatchScheduler::new("reshape-shader", config, {
            let instrumenter = Arc::clone(&instrumenter);
            let cache = Arc::clone(&cache);
            move |job: &ShaderJob| compile(&instrumenter, &cache, job)
        });
        Self {
            instrumenter,
            cache,
            scheduler,
        }
    }

    pub fn instrumenter(&self) -> &ShaderInstrumenter {
        &self.instrumenter
    }

    pub fn cache(&self) -> &InstrumentationCache {
        &self.cache
    }

    pub fn push<F>(&self, jobs: Vec<ShaderJob>, callback: F) -> Ticket
    where
        F: FnOnce(ShaderCompletion) + Send + 'static,
    {
        self.scheduler.push(
            jobs,
            Box::new(move |ticket, results| callback(ShaderCompletion { ticket, results })),
        )
    }

    pub fn counters(&self) -> &CommitCounters {
        self.scheduler.counters()
    }

    pub fn shutdown(self, mode: ShutdownMode) {
        self.scheduler.shutdown(mode);
    }
}

fn compile(
    instrumenter: &ShaderInstrumenter,
    cache: &InstrumentationCache,
    job: &ShaderJob,
) -> ShaderResult {
    let key = CacheKey::new(&job.bytes, &job.config);
    let cached = cache.get_or_insert_with(key, || {
        match instrumenter.instrument(&job.bytes, job.shader.0, &job.config) {
            InstrumentOutcome::Instrumented(bytes) => CachedShader {
                bytes: bytes.into(),
                instrumented: true,
            },
            InstrumentOutcome::Passthrough { reason } => {
                tracing::debug!(shader = job.shader.0, ?reason, "shader passed through");
                CachedShader {
                    bytes: Arc::clone(&job.bytes),
                    instrumented: false,
                }
            }
        }
    });
    ShaderResult {
        shader: job.shader,
        config: job.config,
        bytes: cached.bytes,
        instrumented: cached.instrumented,
    }
}
