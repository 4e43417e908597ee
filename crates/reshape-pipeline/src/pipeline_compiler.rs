use std::sync::{Arc, MutexGuard};

use crate::config::{SchedulerConfig, ShutdownMode};
use crate::error::NativeCompileFailure;
use crate::native::{NativePipeline, PipelineBackend, PipelineJob};
use crate::scheduler::{BatchScheduler, CommitCounters, Ticket};

pub type PipelineResult = Result<NativePipeline, NativeCompileFailure>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    Succeeded,
    Failed { failures: usize },
}

/// Everything a batch produced, delivered once to its callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCompletion {
    pub ticket: Ticket,
    /// One entry per pushed job, in push order.
    pub results: Vec<PipelineResult>,
    pub status: BatchStatus,
}

impl BatchCompletion {
    fn new(ticket: Ticket, results: Vec<PipelineResult>) -> Self {
        let failures = results.iter().filter(|r| r.is_err()).count();
        let status = if failures == 0 {
            BatchStatus::Succeeded
        } else {
            BatchStatus::Failed { failures }
        };
        Self {
            ticket,
            results,
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Succeeded
    }
}

/// Asynchronous pipeline creation over a [`PipelineBackend`].
pub struct PipelineCompiler<B: PipelineBackend> {
    backend: Arc<B>,
    scheduler: BatchScheduler<PipelineJob, PipelineResult>,
}

impl<B: PipelineBackend> PipelineCompiler<B> {
    pub fn new(backend: B, config: SchedulerConfig) -> Self {
        let backend = Arc::new(backend);
        let scheduler = BatchScheduler::new("reshape-pipeline", config, {
            let backend = Arc::clone(&backend);
            move |job: &PipelineJob| compile(backend.as_ref(), job)
        });
        Self { backend, scheduler }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Queues `jobs` and returns the ticket that covers them. `callback` runs once on a worker
    /// thread after the last job finished, whether or not any failed.
    pub fn push<F>(&self, jobs: Vec<PipelineJob>, callback: F) -> Ticket
    where
        F: FnOnce(BatchCompletion) + Send + 'static,
    {
        self.scheduler.push(
            jobs,
            Box::new(move |ticket, results| callback(BatchCompletion::new(ticket, results))),
        )
    }

    pub fn counters(&self) -> &CommitCounters {
        self.scheduler.counters()
    }

    pub fn commit(&self) -> Ticket {
        self.counters().commit()
    }

    pub fn is_commit_pushed(&self, ticket: Ticket) -> bool {
        self.counters().is_commit_pushed(ticket)
    }

    pub fn pending_commits(&self, ticket: Ticket) -> u64 {
        self.counters().pending_commits(ticket)
    }

    pub fn lock_completion_step(&self) -> MutexGuard<'_, ()> {
        self.counters().lock_completion_step()
    }

    pub fn shutdown(self, mode: ShutdownMode) {
        self.scheduler.shutdown(mode);
    }
}

fn compile<B: PipelineBackend>(backend: &B, job: &PipelineJob) -> PipelineResult {
    let result = backend.create_pipeline(job);
    if let Err(err) = &result {
        tracing::warn!(pipeline = job.pipeline.0, %err, "pipeline creation failed");
    }
    result
}
