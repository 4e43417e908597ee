use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use reshape_il::FeatureBitSet;
use reshape_pipeline::{
    BatchStatus, NativeCompileFailure, NativePipeline, PipelineBackend, PipelineCompiler,
    PipelineHandle, PipelineJob, PipelineKind, SchedulerConfig, ShutdownMode, Ticket,
};

/// Fails every pipeline whose handle is listed, succeeds with `handle * 100` otherwise.
struct Scripted {
    fail: &'static [u64],
    calls: AtomicUsize,
}

impl Scripted {
    fn new(fail: &'static [u64]) -> Self {
        Self {
            fail,
            calls: AtomicUsize::new(0),
        }
    }
}

impl PipelineBackend for Scripted {
    fn create_pipeline(&self, job: &PipelineJob) -> Result<NativePipeline, NativeCompileFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.contains(&job.pipeline.0) {
            Err(NativeCompileFailure::new(format!("pipeline {} rejected", job.pipeline.0)))
        } else {
            Ok(NativePipeline(job.pipeline.0 * 100))
        }
    }
}

fn job(handle: u64) -> PipelineJob {
    PipelineJob {
        pipeline: PipelineHandle(handle),
        kind: PipelineKind::Compute,
        stages: Vec::new(),
        feature_bit_set: FeatureBitSet::NONE,
    }
}

fn config(max_workers: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_workers,
        chunk_divisor: 1,
        shutdown: ShutdownMode::Drain,
    }
}

#[test]
fn one_failure_does_not_abort_its_siblings() {
    let compiler = PipelineCompiler::new(Scripted::new(&[2]), config(2));
    let callbacks = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let ticket = compiler.push(vec![job(1), job(2), job(3)], {
        let callbacks = Arc::clone(&callbacks);
        move |completion| {
            callbacks.fetch_add(1, Ordering::SeqCst);
            tx.send(completion).unwrap();
        }
    });
    assert_eq!(ticket, Ticket(3));

    let completion = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(completion.ticket, ticket);
    assert_eq!(completion.results.len(), 3);
    assert_eq!(completion.results[0], Ok(NativePipeline(100)));
    assert!(completion.results[1].is_err());
    assert_eq!(completion.results[2], Ok(NativePipeline(300)));
    assert_eq!(completion.status, BatchStatus::Failed { failures: 1 });
    assert!(!completion.is_success());

    assert_eq!(compiler.backend().calls.load(Ordering::SeqCst), 3);
    compiler.shutdown(ShutdownMode::Drain);
    assert_eq!(
        callbacks.load(Ordering::SeqCst),
        1,
        "the callback fires exactly once"
    );
}

#[test]
fn tickets_are_pushed_only_after_completion() {
    let compiler = PipelineCompiler::new(Scripted::new(&[]), config(1));
    let (tx, rx) = mpsc::channel();

    let step = compiler.lock_completion_step();
    let ticket = compiler.push((1..=4).map(job).collect(), move |completion| {
        tx.send(completion.ticket).unwrap();
    });
    assert_eq!(compiler.commit(), ticket);
    assert!(
        rx.recv_timeout(Duration::from_millis(200)).is_err(),
        "callbacks wait for the completion step lock"
    );
    assert!(!compiler.is_commit_pushed(ticket));
    assert!(compiler.pending_commits(ticket) > 0);

    drop(step);
    assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), ticket);
    for _ in 0..1000 {
        if compiler.is_commit_pushed(ticket) {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert!(compiler.is_commit_pushed(ticket));
    assert_eq!(compiler.pending_commits(ticket), 0);
}

#[test]
fn counters_stay_monotonic_under_concurrent_pushes() {
    let compiler = Arc::new(PipelineCompiler::new(Scripted::new(&[5, 17]), config(4)));
    let completions = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(AtomicBool::new(false));

    let watcher = {
        let compiler = Arc::clone(&compiler);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut last = 0;
            while !done.load(Ordering::SeqCst) {
                let completed = compiler.counters().completed();
                let commit = compiler.commit().0;
                assert!(completed >= last, "complete counter went backwards");
                assert!(completed <= commit, "completed work that was never committed");
                last = completed;
            }
        })
    };

    let tickets: Vec<Ticket> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let compiler = Arc::clone(&compiler);
                let completions = Arc::clone(&completions);
                scope.spawn(move || {
                    let mut tickets = Vec::new();
                    let mut previous = Ticket(0);
                    for batch in 0..8u64 {
                        let jobs = (0..(batch % 4 + 1))
                            .map(|i| job(t * 100 + batch * 4 + i))
                            .collect();
                        let completions = Arc::clone(&completions);
                        let ticket = compiler.push(jobs, move |completion| {
                            completions.lock().unwrap().push(completion);
                        });
                        assert!(ticket > previous);
                        previous = ticket;
                        tickets.push(ticket);
                    }
                    tickets
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let total: u64 = (0..4).map(|_| (0..8u64).map(|b| b % 4 + 1).sum::<u64>()).sum();
    for _ in 0..10_000 {
        if compiler.counters().completed() == total {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    done.store(true, Ordering::SeqCst);
    watcher.join().unwrap();

    let mut unique = tickets.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), tickets.len(), "tickets are unique");
    assert_eq!(compiler.commit(), Ticket(total));
    assert_eq!(compiler.counters().completed(), total);
    assert_eq!(completions.lock().unwrap().len(), tickets.len());
    assert!(tickets.iter().all(|t| compiler.is_commit_pushed(*t)));
}
