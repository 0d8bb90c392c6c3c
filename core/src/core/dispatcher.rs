//! Bounded work and retry queues with their worker pools.
//!
//! Pairs reach the retry queue only through `RetryQueue`, from primary
//! workers or `Dispatcher::retry`. Retry workers re-run a retried pair
//! themselves until it either settles or runs out of budget, so they never
//! wait on the queue they drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::Context;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::debug;

use super::executor::AttemptExecutor;
use super::retry::RetryTracker;
use super::throttle::ThrottleRef;
use super::tracker::SessionStore;
use super::Attempt;
use crate::{ProgressKind, SinkRef};

/// Run counters, updated by every worker.
#[derive(Debug, Default)]
pub struct AttackStats {
    attempted: AtomicU64,
    found: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
    abandoned: AtomicU64,
}

impl AttackStats {
    /// Pairs that received a verdict.
    pub fn attempted(&self) -> u64 {
        self.attempted.load(Ordering::Relaxed)
    }

    pub fn found(&self) -> u64 {
        self.found.load(Ordering::Relaxed)
    }

    /// Requests that ended without a verdict, retried or not.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Shared collaborators of every worker.
pub struct WorkerContext {
    pub executor: AttemptExecutor,
    pub throttle: ThrottleRef,
    pub retries: RetryTracker,
    pub store: Arc<SessionStore>,
    pub sink: SinkRef,
    pub stats: Arc<AttackStats>,
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Settled,
    Retry,
}

impl WorkerContext {
    /// One pass of `wait -> execute -> (trigger | recover) -> record` for a pair.
    fn process(&self, id: usize, attempt: &Attempt) -> Step {
        self.throttle.wait();

        let err = match self.executor.execute(attempt) {
            Ok(outcome) => {
                if outcome.success {
                    AttackStats::bump(&self.stats.found);
                    self.store.found.mark(attempt);
                    self.sink.on_found(attempt, outcome.status);
                }
                self.store.attempts.mark(attempt);
                self.throttle.mark_recovered();
                AttackStats::bump(&self.stats.attempted);
                self.sink.on_progress(ProgressKind::Attempted);
                return Step::Settled;
            }
            Err(e) => e,
        };

        AttackStats::bump(&self.stats.errors);
        self.sink.on_progress(ProgressKind::Error);

        if !err.is_retryable() {
            self.sink.on_log(
                "error",
                &format!("[Worker {}] Request error for {}: {}", id, attempt, err),
            );
            return Step::Settled;
        }

        self.throttle.trigger();
        if self.retries.should_retry(attempt) {
            debug!("[Worker {}] Retrying {} after: {}", id, attempt, err);
            AttackStats::bump(&self.stats.retries);
            self.sink.on_progress(ProgressKind::Retry);
            return Step::Retry;
        }

        AttackStats::bump(&self.stats.abandoned);
        self.sink.on_progress(ProgressKind::Abandoned);
        self.sink.on_log(
            "warn",
            &format!(
                "[Worker {}] Retry limit ({}) reached for {}, giving up: {}",
                id,
                self.retries.limit(),
                attempt,
                err
            ),
        );
        Step::Settled
    }

    fn abandon(&self, attempt: &Attempt) {
        AttackStats::bump(&self.stats.abandoned);
        self.sink.on_progress(ProgressKind::Abandoned);
        self.sink.on_log("warn", &format!("Retry queue closed, dropping {}", attempt));
    }
}

/// Producer handle of the retry queue, shared by the primary workers and
/// `Dispatcher::retry`.
#[derive(Clone)]
pub struct RetryQueue {
    tx: Sender<Attempt>,
}

impl RetryQueue {
    /// Blocks while the queue is full. Hands the pair back once the queue is
    /// closed.
    pub fn retry(&self, attempt: Attempt) -> Result<(), Attempt> {
        self.tx.send(attempt).map_err(|e| e.0)
    }
}

pub struct Dispatcher {
    ctx: Arc<WorkerContext>,
    work_tx: Option<Sender<Attempt>>,
    work_rx: Receiver<Attempt>,
    retry_queue: Option<RetryQueue>,
    retry_rx: Receiver<Attempt>,
    workers: Vec<JoinHandle<()>>,
    retry_workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Both queues hold at most `capacity` pairs.
    pub fn new(ctx: WorkerContext, capacity: usize) -> Self {
        let (work_tx, work_rx) = bounded(capacity.max(1));
        let (retry_tx, retry_rx) = bounded(capacity.max(1));

        Self {
            ctx: Arc::new(ctx),
            work_tx: Some(work_tx),
            work_rx,
            retry_queue: Some(RetryQueue { tx: retry_tx }),
            retry_rx,
            workers: Vec::new(),
            retry_workers: Vec::new(),
        }
    }

    pub fn stats(&self) -> Arc<AttackStats> {
        Arc::clone(&self.ctx.stats)
    }

    pub fn start_workers(&mut self, n: usize) -> anyhow::Result<()> {
        let retry_queue = self
            .retry_queue
            .clone()
            .context("dispatcher already finished")?;

        for id in 0..n {
            let ctx = Arc::clone(&self.ctx);
            let jobs = self.work_rx.clone();
            let retry_queue = retry_queue.clone();

            let handle = thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || {
                    for attempt in jobs.iter() {
                        if ctx.process(id, &attempt) == Step::Retry {
                            if let Err(dropped) = retry_queue.retry(attempt) {
                                ctx.abandon(&dropped);
                            }
                        }
                    }
                    debug!("[Worker {}] Work queue drained", id);
                })
                .with_context(|| format!("failed to spawn worker {}", id))?;
            self.workers.push(handle);
        }
        Ok(())
    }

    /// At least one retry worker always runs, otherwise a full retry queue
    /// would stall the primary pool.
    pub fn start_retry_workers(&mut self, m: usize) -> anyhow::Result<()> {
        let base = self.retry_workers.len();
        for n in 0..m.max(1) {
            let id = base + n;
            let ctx = Arc::clone(&self.ctx);
            let jobs = self.retry_rx.clone();

            let handle = thread::Builder::new()
                .name(format!("retry-worker-{}", id))
                .spawn(move || {
                    for attempt in jobs.iter() {
                        while ctx.process(id, &attempt) == Step::Retry {}
                    }
                    debug!("[Retry {}] Retry queue drained", id);
                })
                .with_context(|| format!("failed to spawn retry worker {}", id))?;
            self.retry_workers.push(handle);
        }
        Ok(())
    }

    /// Feeds the work queue, blocking while it is full. Returns how many pairs
    /// were queued.
    pub fn distribute(&self, pairs: impl IntoIterator<Item = Attempt>) -> usize {
        let Some(ref tx) = self.work_tx else {
            return 0;
        };

        let mut queued = 0;
        for attempt in pairs {
            if tx.send(attempt).is_err() {
                break;
            }
            queued += 1;
        }
        queued
    }

    /// Queues a pair for the retry pool, the same way a primary worker does
    /// after a retryable error. False once the retry queue is closed.
    pub fn retry(&self, attempt: Attempt) -> bool {
        match self.retry_queue {
            Some(ref queue) => queue.retry(attempt).is_ok(),
            None => false,
        }
    }

    /// Closes the work queue, waits for the primary pool, then closes the retry
    /// queue and waits for the retry pool.
    pub fn finish(mut self) -> Arc<AttackStats> {
        self.work_tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("A worker thread panicked");
            }
        }

        self.retry_queue.take();
        for handle in self.retry_workers.drain(..) {
            if handle.join().is_err() {
                log::error!("A retry worker thread panicked");
            }
        }

        self.stats()
    }
}
