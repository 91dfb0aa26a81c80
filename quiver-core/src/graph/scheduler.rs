//! Job Scheduler
//!
//! Computations that opt into batching hand their re-runs to a
//! deduplicating [`JobQueue`] instead of running synchronously. The first job
//! queued in a turn asks the engine's [`MicrotaskHost`] for a single flush;
//! later jobs in the same turn only join the pending set.
//!
//! # Algorithm
//!
//! 1. `push(job)` inserts the job keyed by its computation ID. Re-queuing an
//!    already pending job is a no-op, which is what coalesces several
//!    writes in one turn into one re-run.
//! 2. If no flush is pending, the flag is raised and a flush microtask is
//!    queued on the host.
//! 3. `flush()` drains the pending set and runs each job. Jobs queued while
//!    flushing are picked up by another drain pass, up to a bounded number
//!    of passes.
//! 4. A reset guard clears the pending set and the flag when the flush
//!    ends, including when a job panics, so the next turn can schedule
//!    again.
//!
//! # Hosts
//!
//! A microtask is a single-fire callback that runs after the current
//! synchronous work finishes. [`LocalMicrotasks`] keeps them in a FIFO that
//! the owner drains explicitly; [`TokioHost`] spawns each one on a
//! current-thread tokio runtime, where a spawned task cannot start until the
//! spawning task yields.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::ReactiveError;
use crate::reactive::{ComputationId, Runner};

/// A deferred callback queued on a [`MicrotaskHost`].
pub type Microtask = Box<dyn FnOnce() + Send>;

/// Something that can run a callback once the current synchronous work has
/// unwound.
pub trait MicrotaskHost: Send + Sync {
    /// Queue `task` to run later, in FIFO order with other queued tasks.
    fn queue_microtask(&self, task: Microtask);
}

/// A FIFO of microtasks drained by its owner.
#[derive(Default)]
pub struct LocalMicrotasks {
    queue: Mutex<VecDeque<Microtask>>,
}

impl LocalMicrotasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run queued tasks until the queue is empty, including tasks queued
    /// by the tasks themselves. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            // Pop under the lock, run without it.
            let next = self.queue.lock().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MicrotaskHost for LocalMicrotasks {
    fn queue_microtask(&self, task: Microtask) {
        self.queue.lock().push_back(task);
    }
}

impl fmt::Debug for LocalMicrotasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMicrotasks")
            .field("queued", &self.len())
            .finish()
    }
}

/// Runs microtasks as tasks on a current-thread tokio runtime.
///
/// The flush runs the next time the task that queued it yields, so every
/// write made before that point lands in the same flush.
///
/// Multi-thread runtimes are rejected: a worker would pick the flush up
/// while the writing task is still running, splitting one turn into several
/// flushes and running computations alongside the writer.
#[derive(Debug, Clone)]
pub struct TokioHost {
    handle: tokio::runtime::Handle,
}

impl TokioHost {
    /// Host flushes on the runtime behind `handle`.
    ///
    /// Returns [`ReactiveError::Host`] unless the runtime is current-thread.
    pub fn new(handle: tokio::runtime::Handle) -> Result<Self, ReactiveError> {
        match handle.runtime_flavor() {
            tokio::runtime::RuntimeFlavor::CurrentThread => Ok(Self { handle }),
            flavor => Err(ReactiveError::Host(format!(
                "{flavor:?} runtime cannot defer microtasks to the end of a turn"
            ))),
        }
    }

    /// Use the runtime of the calling context.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Result<Self, ReactiveError> {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl MicrotaskHost for TokioHost {
    fn queue_microtask(&self, task: Microtask) {
        self.handle.spawn(async move { task() });
    }
}

/// A unit of deferred work, deduplicated by computation ID.
#[derive(Clone)]
pub struct Job {
    id: ComputationId,
    run: Arc<dyn Fn() + Send + Sync>,
}

impl Job {
    /// A job that calls `run`, coalesced with other jobs sharing `id`.
    pub fn new<F>(id: ComputationId, run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id,
            run: Arc::new(run),
        }
    }

    /// The computation this job re-runs; the deduplication key.
    pub fn id(&self) -> ComputationId {
        self.id
    }

    /// Run the job once, now.
    pub fn run(&self) {
        (self.run)();
    }
}

/// A queued re-run. A runner disposed after it was queued is skipped.
impl From<Runner> for Job {
    fn from(runner: Runner) -> Self {
        Self::new(runner.id(), move || {
            if !runner.is_disposed() {
                runner.run();
            }
        })
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("id", &self.id).finish()
    }
}

/// Deduplicating pending set plus the flush-pending flag.
#[derive(Default)]
pub(crate) struct JobQueue {
    pending: Mutex<IndexMap<ComputationId, Job>>,
    flush_pending: AtomicBool,
}

/// Clears the queue when a flush ends, however it ends.
struct FlushReset<'a> {
    queue: &'a JobQueue,
}

impl Drop for FlushReset<'_> {
    fn drop(&mut self) {
        let leftovers = std::mem::take(&mut *self.queue.pending.lock());
        if !leftovers.is_empty() {
            warn!(
                dropped = leftovers.len(),
                "job queue flush ended with jobs still pending"
            );
        }
        self.queue.flush_pending.store(false, Ordering::Release);
    }
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a job to the pending set.
    ///
    /// Returns `true` when the caller must queue a flush, i.e. when no flush
    /// was pending yet.
    pub(crate) fn push(&self, job: Job) -> bool {
        self.pending.lock().entry(job.id()).or_insert(job);
        !self.flush_pending.swap(true, Ordering::AcqRel)
    }

    /// Run pending jobs, draining at most `max_passes` times.
    ///
    /// Returns the number of jobs run. Panics from jobs propagate to the
    /// caller after the queue has been reset.
    pub(crate) fn flush(&self, max_passes: usize) -> usize {
        let _reset = FlushReset { queue: self };
        let mut ran = 0;

        for pass in 0..max_passes {
            let batch: Vec<Job> = self
                .pending
                .lock()
                .drain(..)
                .map(|(_, job)| job)
                .collect();
            if batch.is_empty() {
                break;
            }

            debug!(pass, jobs = batch.len(), "flushing job queue");
            for job in batch {
                job.run();
                ran += 1;
            }
        }

        ran
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn is_flush_pending(&self) -> bool {
        self.flush_pending.load(Ordering::Acquire)
    }
}
