//! Worker pools and commit bookkeeping shared by the shader and pipeline compilers.
//!
//! Work is pushed in batches. Each batch takes a [`Ticket`] from the compiler's
//! [`CommitCounters`], is split into chunks that workers pop from a FIFO, and fires its callback
//! exactly once when the last chunk finishes. A batch's jobs reach the complete counter only after
//! its callback has returned, so the counter never exceeds the ticket of the latest finished batch.
//! The counter sums jobs across batches, so when batches finish out of order a ticket can read as
//! pushed before its own callback has run.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::config::{SchedulerConfig, ShutdownMode};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Position in a compiler's commit sequence.
///
/// A batch of `n` jobs advances the commit index by `n`; its ticket is the index after the
/// advance.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(pub u64);

#[derive(Debug, Default)]
pub struct CommitCounters {
    commit_index: AtomicU64,
    complete_counter: AtomicU64,
    completion_step: Mutex<()>,
}

impl CommitCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `jobs` commits and returns the ticket that covers them.
    pub fn register(&self, jobs: u64) -> Ticket {
        Ticket(self.commit_index.fetch_add(jobs, Ordering::AcqRel) + jobs)
    }

    /// Head of the commit sequence.
    pub fn commit(&self) -> Ticket {
        Ticket(self.commit_index.load(Ordering::Acquire))
    }

    pub fn completed(&self) -> u64 {
        self.complete_counter.load(Ordering::Acquire)
    }

    pub fn complete(&self, jobs: u64) {
        self.complete_counter.fetch_add(jobs, Ordering::AcqRel);
    }

    /// Whether `ticket` jobs have finished in total, across every batch.
    pub fn is_commit_pushed(&self, ticket: Ticket) -> bool {
        ticket.0 <= self.completed()
    }

    pub fn pending_commits(&self, ticket: Ticket) -> u64 {
        ticket.0.saturating_sub(self.completed())
    }

    /// Blocks batch callbacks until the guard is dropped, so a caller can aggregate results
    /// from several tickets without a callback interleaving.
    pub fn lock_completion_step(&self) -> MutexGuard<'_, ()> {
        lock(&self.completion_step)
    }
}

struct Queue<T> {
    items: VecDeque<T>,
    exit: bool,
}

struct Shared<T> {
    queue: Mutex<Queue<T>>,
    wake: Condvar,
}

type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;

/// FIFO of work items served by up to `max_workers` lazily spawned threads.
pub struct WorkerPool<T: Send + 'static> {
    name: &'static str,
    max_workers: usize,
    shutdown_mode: ShutdownMode,
    shared: Arc<Shared<T>>,
    handler: Handler<T>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new<F>(name: &'static str, config: &SchedulerConfig, handler: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            name,
            max_workers: config.max_workers.max(1),
            shutdown_mode: config.shutdown,
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    items: VecDeque::new(),
                    exit: false,
                }),
                wake: Condvar::new(),
            }),
            handler: Arc::new(handler),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, items: impl IntoIterator<Item = T>) {
        let queued = {
            let mut queue = lock(&self.shared.queue);
            queue.items.extend(items);
            queue.items.len()
        };
        if queued == 0 {
            return;
        }
        self.prepare_workers(queued);
        self.shared.wake.notify_all();
    }

    pub fn worker_count(&self) -> usize {
        lock(&self.workers).len()
    }

    pub fn queued(&self) -> usize {
        lock(&self.shared.queue).items.len()
    }

    pub fn shutdown(mut self, mode: ShutdownMode) {
        self.stop(mode);
    }

    fn prepare_workers(&self, queued: usize) {
        let mut workers = lock(&self.workers);
        let wanted = self.max_workers.min(queued);
        while workers.len() < wanted {
            let index = workers.len();
            let shared = Arc::clone(&self.shared);
            let handler = Arc::clone(&self.handler);
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", self.name))
                .spawn(move || worker_loop(&shared, handler.as_ref()));
            match spawned {
                Ok(handle) => {
                    tracing::trace!(pool = self.name, worker = index, "spawned worker");
                    workers.push(handle);
                }
                Err(err) => {
                    tracing::warn!(pool = self.name, %err, "failed to spawn worker");
                    break;
                }
            }
        }
        let starved = workers.is_empty();
        drop(workers);

        if starved {
            self.run_inline();
        }
    }

    /// Serves the queue on the calling thread when no worker could be spawned.
    fn run_inline(&self) {
        loop {
            let Some(item) = lock(&self.shared.queue).items.pop_front() else {
                return;
            };
            (self.handler)(item);
        }
    }

    fn stop(&mut self, mode: ShutdownMode) {
        {
            let mut queue = lock(&self.shared.queue);
            if queue.exit {
                return;
            }
            queue.exit = true;
            if mode == ShutdownMode::Detach && !queue.items.is_empty() {
                tracing::trace!(
                    pool = self.name,
                    dropped = queue.items.len(),
                    "discarding queued work"
                );
                queue.items.clear();
            }
        }
        self.shared.wake.notify_all();

        let workers = std::mem::take(
            self.workers
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        match mode {
            ShutdownMode::Drain => {
                for handle in workers {
                    if handle.join().is_err() {
                        tracing::warn!(pool = self.name, "worker panicked");
                    }
                }
            }
            ShutdownMode::Detach => drop(workers),
        }
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.stop(self.shutdown_mode);
    }
}

fn worker_loop<T>(shared: &Shared<T>, handler: &(dyn Fn(T) + Send + Sync)) {
    loop {
        let item = {
            let mut queue = lock(&shared.queue);
            loop {
                if let Some(item) = queue.items.pop_front() {
                    break item;
                }
                if queue.exit {
                    tracing::trace!("worker exiting");
                    return;
                }
                queue = shared
                    .wake
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        handler(item);
    }
}

pub(crate) type BatchCallback<R> = Box<dyn FnOnce(Ticket, Vec<R>) + Send>;

struct Batch<R> {
    ticket: Ticket,
    jobs: u64,
    pending: AtomicUsize,
    results: Mutex<Vec<Option<R>>>,
    callback: Mutex<Option<BatchCallback<R>>>,
}

pub(crate) struct Chunk<J, R> {
    batch: Arc<Batch<R>>,
    offset: usize,
    jobs: Vec<J>,
}

/// Chunked batch execution over a [`WorkerPool`], with per-job results delivered in push order.
pub(crate) struct BatchScheduler<J: Send + 'static, R: Send + 'static> {
    config: SchedulerConfig,
    counters: Arc<CommitCounters>,
    pool: WorkerPool<Chunk<J, R>>,
}

impl<J: Send + 'static, R: Send + 'static> BatchScheduler<J, R> {
    pub(crate) fn new<F>(name: &'static str, config: SchedulerConfig, run: F) -> Self
    where
        F: Fn(&J) -> R + Send + Sync + 'static,
    {
        let counters = Arc::new(CommitCounters::new());
        let pool: WorkerPool<Chunk<J, R>> = WorkerPool::new(name, &config, {
            let counters = Arc::clone(&counters);
            move |chunk: Chunk<J, R>| run_chunk(&counters, chunk, &run)
        });
        Self {
            config,
            counters,
            pool,
        }
    }

    pub(crate) fn counters(&self) -> &CommitCounters {
        &self.counters
    }

    pub(crate) fn push(&self, jobs: Vec<J>, callback: BatchCallback<R>) -> Ticket {
        let total = jobs.len();
        let ticket = self.counters.register(total as u64);
        if total == 0 {
            let _step = self.counters.lock_completion_step();
            callback(ticket, Vec::new());
            return ticket;
        }

        let chunk_size = self.config.chunk_size(total);
        let batch = Arc::new(Batch {
            ticket,
            jobs: total as u64,
            pending: AtomicUsize::new(total.div_ceil(chunk_size)),
            results: Mutex::new((0..total).map(|_| None).collect()),
            callback: Mutex::new(Some(callback)),
        });

        let mut chunks = Vec::with_capacity(total.div_ceil(chunk_size));
        let mut jobs = jobs.into_iter();
        let mut offset = 0;
        while offset < total {
            let chunk: Vec<J> = jobs.by_ref().take(chunk_size).collect();
            let len = chunk.len();
            chunks.push(Chunk {
                batch: Arc::clone(&batch),
                offset,
                jobs: chunk,
            });
            offset += len;
        }
        tracing::trace!(jobs = total, chunks = chunks.len(), ticket = ticket.0, "queued batch");
        self.pool.push(chunks);
        ticket
    }

    pub(crate) fn shutdown(self, mode: ShutdownMode) {
        self.pool.shutdown(mode);
    }
}

fn run_chunk<J, R, F>(counters: &CommitCounters, chunk: Chunk<J, R>, run: &F)
where
    F: Fn(&J) -> R,
{
    let Chunk { batch, offset, jobs } = chunk;
    let results: Vec<R> = jobs.iter().map(|job| run(job)).collect();
    {
        let mut slots = lock(&batch.results);
        for (slot, result) in slots.iter_mut().skip(offset).zip(results) {
            *slot = Some(result);
        }
    }

    if batch.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
        // Every slot is filled once the last chunk has stored its results.
        let results: Vec<R> = std::mem::take(&mut *lock(&batch.results))
            .into_iter()
            .flatten()
            .collect();
        let callback = lock(&batch.callback).take();
        let _step = counters.lock_completion_step();
        if let Some(callback) = callback {
            callback(batch.ticket, results);
        }
        counters.complete(batch.jobs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn config(max_workers: usize) -> SchedulerConfig {
        SchedulerConfig {
            max_workers,
            chunk_divisor: 1,
            shutdown: ShutdownMode::Drain,
        }
    }

    #[test]
    fn workers_spawn_lazily_up_to_the_cap() {
        let pool = WorkerPool::new("lazy", &config(4), |_: u32| {});
        assert_eq!(pool.worker_count(), 0);
        pool.push([1]);
        assert_eq!(pool.worker_count(), 1);
        pool.push(0..16);
        assert!(pool.worker_count() <= 4);
        pool.shutdown(ShutdownMode::Drain);
    }

    #[test]
    fn single_worker_runs_in_fifo_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pool = WorkerPool::new("fifo", &config(1), {
            let seen = Arc::clone(&seen);
            move |item: u32| lock(&seen).push(item)
        });
        pool.push(0..10);
        pool.push(10..20);
        pool.shutdown(ShutdownMode::Drain);
        assert_eq!(*lock(&seen), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn drain_finishes_queued_work() {
        let count = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new("drain", &config(3), {
            let count = Arc::clone(&count);
            move |_: u32| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        pool.push(0..50);
        pool.shutdown(ShutdownMode::Drain);
        assert_eq!(count.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn detach_discards_queued_work() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let gate = Mutex::new(gate_rx);
        let pool = WorkerPool::new("detach", &config(1), move |item: u32| {
            started_tx.send(item).unwrap();
            if item == 0 {
                lock(&gate).recv().unwrap();
            }
            done_tx.send(item).unwrap();
        });

        pool.push([0]);
        assert_eq!(started_rx.recv().unwrap(), 0);
        pool.push([1, 2]);
        pool.shutdown(ShutdownMode::Detach);
        gate_tx.send(()).unwrap();

        assert_eq!(done_rx.recv().unwrap(), 0);
        assert!(
            done_rx.recv_timeout(Duration::from_millis(200)).is_err(),
            "queued items must not run after a detach"
        );
    }

    #[test]
    fn tickets_are_unique_and_counters_monotonic() {
        let counters = CommitCounters::new();
        let a = counters.register(3);
        let b = counters.register(0);
        let c = counters.register(2);
        assert_eq!((a, b, c), (Ticket(3), Ticket(3), Ticket(5)));
        assert_eq!(counters.commit(), Ticket(5));

        assert_eq!(counters.pending_commits(c), 5);
        counters.complete(3);
        assert!(counters.is_commit_pushed(a));
        assert!(!counters.is_commit_pushed(c));
        assert_eq!(counters.pending_commits(c), 2);
        counters.complete(2);
        assert!(counters.is_commit_pushed(c));
        assert_eq!(counters.pending_commits(a), 0);
    }

    #[test]
    fn completed_jobs_are_summed_across_batches() {
        let counters = CommitCounters::new();
        let first = counters.register(2);
        let second = counters.register(2);

        // The second batch finished first and its jobs cover the first ticket.
        counters.complete(2);
        assert!(counters.is_commit_pushed(first));
        assert!(!counters.is_commit_pushed(second));
    }

    #[test]
    fn batches_complete_once_with_results_in_push_order() {
        let scheduler: BatchScheduler<u32, u32> =
            BatchScheduler::new("batch", config(2), |job: &u32| job * 10);
        let (tx, rx) = mpsc::channel();
        let ticket = scheduler.push(
            (0..9).collect(),
            Box::new(move |ticket, results| tx.send((ticket, results)).unwrap()),
        );
        assert_eq!(ticket, Ticket(9));

        let (completed, results) = rx.recv().unwrap();
        assert_eq!(completed, ticket);
        assert_eq!(results, (0..9).map(|i| i * 10).collect::<Vec<_>>());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        scheduler.shutdown(ShutdownMode::Drain);
    }

    #[test]
    fn counters_move_only_after_the_callback_returns() {
        let scheduler: BatchScheduler<u32, u32> =
            BatchScheduler::new("hold", config(2), |job: &u32| *job);
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let ticket = scheduler.push(
            (0..6).collect(),
            Box::new(move |_, _| {
                entered_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            }),
        );

        entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(scheduler.counters().completed(), 0);
        assert!(!scheduler.counters().is_commit_pushed(ticket));

        release_tx.send(()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !scheduler.counters().is_commit_pushed(ticket) {
            assert!(std::time::Instant::now() < deadline, "batch never completed");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(scheduler.counters().completed(), 6);
        scheduler.shutdown(ShutdownMode::Drain);
    }

    #[test]
    fn empty_batches_complete_immediately() {
        let scheduler: BatchScheduler<u32, u32> =
            BatchScheduler::new("empty", config(1), |job: &u32| *job);
        let (tx, rx) = mpsc::channel();
        let ticket = scheduler.push(
            Vec::new(),
            Box::new(move |ticket, results| tx.send((ticket, results.len())).unwrap()),
        );
        assert_eq!(rx.try_recv().unwrap(), (ticket, 0));
        assert!(scheduler.counters().is_commit_pushed(ticket));
    }
}
