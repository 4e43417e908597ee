use std::collections::BTreeSet;
use std::sync::Arc;

use reshape_il::InstrumentationConfig;

use crate::cache::InstrumentationCache;
use crate::config::{SchedulerConfig, ShutdownMode};
use crate::error::ControllerError;
use crate::instrument::ShaderInstrumenter;
use crate::native::{PipelineBackend, PipelineHandle, PipelineJob, PipelineKind, PipelineStage};
use crate::pipeline_compiler::{BatchCompletion, PipelineCompiler};
use crate::registry::{ShaderHandle, ShaderRegistry};
use crate::scheduler::Ticket;
use crate::shader_compiler::{ShaderCompiler, ShaderJob};

/// A pipeline to (re)create, naming its shaders in stage order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescription {
    pub pipeline: PipelineHandle,
    pub kind: PipelineKind,
    pub shaders: Vec<ShaderHandle>,
}

/// Drives a feature set change: builds the missing shader variants, then recreates the
/// pipelines that use them.
pub struct InstrumentationController<B: PipelineBackend> {
    registry: Arc<ShaderRegistry>,
    shaders: ShaderCompiler,
    pipelines: Arc<PipelineCompiler<B>>,
}

impl<B: PipelineBackend> InstrumentationController<B> {
    pub fn new(instrumenter: ShaderInstrumenter, backend: B, config: SchedulerConfig) -> Self {
        Self {
            registry: Arc::new(ShaderRegistry::new()),
            shaders: ShaderCompiler::new(
                Arc::new(instrumenter),
                Arc::new(InstrumentationCache::new()),
                config,
            ),
            pipelines: Arc::new(PipelineCompiler::new(backend, config)),
        }
    }

    pub fn registry(&self) -> &ShaderRegistry {
        &self.registry
    }

    pub fn shader_compiler(&self) -> &ShaderCompiler {
        &self.shaders
    }

    pub fn pipeline_compiler(&self) -> &PipelineCompiler<B> {
        &self.pipelines
    }

    pub fn register_shader(&self, bytes: impl Into<Arc<[u8]>>) -> ShaderHandle {
        self.registry.register(bytes)
    }

    /// Instruments every shader of `pipelines` that has no variant for `config` yet, then
    /// pushes the pipelines with the new variants. `callback` receives the pipeline batch.
    ///
    /// Returns the shader compiler ticket; the pipeline ticket arrives with the completion.
    pub fn instrument<F>(
        &self,
        pipelines: Vec<PipelineDescription>,
        config: InstrumentationConfig,
        callback: F,
    ) -> Result<Ticket, ControllerError>
    where
        F: FnOnce(BatchCompletion) + Send + 'static,
    {
        let mut missing = BTreeSet::new();
        for description in &pipelines {
            for &shader in &description.shaders {
                if !self.registry.contains(shader) {
                    return Err(ControllerError::UnknownShader(shader));
                }
                if self.registry.variant(shader, &config).is_none() {
                    missing.insert(shader);
                }
            }
        }

        let jobs: Vec<ShaderJob> = missing
            .into_iter()
            .filter_map(|shader| {
                let bytes = self.registry.original(shader)?;
                Some(ShaderJob {
                    shader,
                    bytes,
                    config,
                })
            })
            .collect();
        tracing::debug!(
            pipelines = pipelines.len(),
            shaders = jobs.len(),
            "instrumenting feature set"
        );

        let registry = Arc::clone(&self.registry);
        let compiler = Arc::clone(&self.pipelines);
        let ticket = self.shaders.push(jobs, move |completion| {
            for result in completion.results {
                registry.add_variant(result.shader, result.config, result.bytes);
            }
            let jobs = pipeline_jobs(&registry, &pipelines, &config);
            compiler.push(jobs, callback);
        });
        Ok(ticket)
    }

    pub fn shutdown(self, mode: ShutdownMode) {
        self.shaders.shutdown(mode);
        if let Ok(pipelines) = Arc::try_unwrap(self.pipelines) {
            pipelines.shutdown(mode);
        }
    }
}

fn pipeline_jobs(
    registry: &ShaderRegistry,
    pipelines: &[PipelineDescription],
    config: &InstrumentationConfig,
) -> Vec<PipelineJob> {
    pipelines
        .iter()
        .map(|description| PipelineJob {
            pipeline: description.pipeline,
            kind: description.kind,
            stages: description
                .shaders
                .iter()
                .filter_map(|&shader| {
                    Some(PipelineStage {
                        shader,
                        bytes: registry.resolve(shader, config)?,
                    })
                })
                .collect(),
            feature_bit_set: config.feature_bit_set,
        })
        .collect()
}
