//! Fixed-size worker pool over an unbounded blocking queue.
//!
//! Split into focused submodules:
//! - `handle`: job completion handles and jobs handed back on shutdown
//! - `worker`: the worker thread loop

mod handle;
mod worker;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::error::ExecError;
use crate::executor::{Executor, Job};
use crate::fault::{default_fault_handler, FaultHandler};
use crate::interrupt::Interrupter;
use crate::queue::{BlockingQueue, PriorityQueue, UnboundedQueue};
use crate::types::{PoolConfig, QueueOrdering};

pub use handle::{JobHandle, JobOutcome, PendingJob, QueuedJob};
use handle::JobState;

/// Priority given to jobs submitted without one.
pub const DEFAULT_PRIORITY: i64 = 0;

/// State shared between pool handles and worker threads.
pub(crate) struct PoolCore {
    name: String,
    suppress_rejections: bool,
    queue: Arc<dyn BlockingQueue<QueuedJob>>,
    fault_handler: FaultHandler,
    seq: AtomicU64,
    shutdown: AtomicBool,
    /// Interrupters of workers currently running a job, by worker index.
    running: Mutex<HashMap<usize, Interrupter>>,
    active: AtomicUsize,
    completed: AtomicU64,
    live_workers: Mutex<usize>,
    terminated: Condvar,
}

impl PoolCore {
    fn worker_exited(&self) {
        let mut live = self.live_workers.lock();
        *live -= 1;
        if *live == 0 {
            info!(pool = %self.name, "pool terminated");
            self.terminated.notify_all();
        }
    }

    fn begin_shutdown(&self) -> bool {
        let first = !self.shutdown.swap(true, Ordering::SeqCst);
        self.queue.close();
        first
    }
}

struct PoolInner {
    core: Arc<PoolCore>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        // Workers finish the queue on their own; nobody is left to join them.
        self.core.begin_shutdown();
    }
}

/// Fluent builder for a [`FixedPool`].
pub struct PoolBuilder {
    config: PoolConfig,
    fault_handler: FaultHandler,
}

impl PoolBuilder {
    /// Route job panics to `handler` instead of the logging default.
    pub fn fault_handler(mut self, handler: FaultHandler) -> Self {
        self.fault_handler = handler;
        self
    }

    /// Spawn the worker threads.
    pub fn build(self) -> Result<FixedPool, ExecError> {
        let queue: Arc<dyn BlockingQueue<QueuedJob>> = match self.config.ordering {
            QueueOrdering::Fifo => Arc::new(UnboundedQueue::new()),
            QueueOrdering::Priority => Arc::new(PriorityQueue::new()),
        };
        FixedPool::spawn(self.config, queue, self.fault_handler)
    }
}

/// A bounded set of persistent worker threads draining one shared queue.
///
/// Cloning yields another handle to the same pool. When the last handle is
/// dropped the pool shuts down gracefully.
#[derive(Clone)]
pub struct FixedPool {
    inner: Arc<PoolInner>,
}

impl FixedPool {
    /// Create a pool from config with the logging fault handler.
    pub fn new(config: PoolConfig) -> Result<Self, ExecError> {
        Self::builder(config).build()
    }

    /// Start building a pool from `config`, e.g. to set a fault handler.
    pub fn builder(config: PoolConfig) -> PoolBuilder {
        PoolBuilder {
            config,
            fault_handler: default_fault_handler(),
        }
    }

    fn spawn(
        config: PoolConfig,
        queue: Arc<dyn BlockingQueue<QueuedJob>>,
        fault_handler: FaultHandler,
    ) -> Result<Self, ExecError> {
        let workers = config.resolved_workers();
        let core = Arc::new(PoolCore {
            name: config.name.clone(),
            suppress_rejections: config.suppress_rejections,
            queue,
            fault_handler,
            seq: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            running: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            live_workers: Mutex::new(0),
            terminated: Condvar::new(),
        });

        let mut threads = Vec::with_capacity(workers);
        for index in 0..workers {
            let worker_core = Arc::clone(&core);
            *core.live_workers.lock() += 1;
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.name, index))
                .spawn(move || worker::run(worker_core, index));
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    *core.live_workers.lock() -= 1;
                    core.begin_shutdown();
                    return Err(ExecError::Spawn(e));
                }
            }
        }

        info!(
            pool = %config.name,
            workers,
            ordering = ?config.ordering,
            "pool started"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                core,
                threads: Mutex::new(threads),
            }),
        })
    }

    fn core(&self) -> &PoolCore {
        &self.inner.core
    }

    pub fn name(&self) -> &str {
        &self.core().name
    }

    /// Queue `f` at the default priority.
    pub fn submit<F>(&self, f: F) -> Result<JobHandle, ExecError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(DEFAULT_PRIORITY, Box::new(f), false)
    }

    /// Queue `f` with an explicit priority. Lower values run first on a
    /// priority-ordered pool. Cancelling the returned handle also removes
    /// the job from the queue.
    pub fn submit_prioritized<F>(&self, priority: i64, f: F) -> Result<JobHandle, ExecError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(priority, Box::new(f), true)
    }

    fn enqueue(&self, priority: i64, job: Job, removable: bool) -> Result<JobHandle, ExecError> {
        let core = self.core();
        if core.shutdown.load(Ordering::SeqCst) {
            return self.reject();
        }

        let state = Arc::new(JobState::new());
        let seq = core.seq.fetch_add(1, Ordering::Relaxed);
        let queued = QueuedJob {
            seq,
            priority,
            job,
            state: Arc::clone(&state),
        };

        if core.queue.offer(queued).is_err() {
            return self.reject();
        }

        Ok(if removable {
            JobHandle::removable(state, &core.queue, seq)
        } else {
            JobHandle::new(state)
        })
    }

    fn reject(&self) -> Result<JobHandle, ExecError> {
        let core = self.core();
        if core.suppress_rejections {
            debug!(pool = %core.name, "discarding job submitted after shutdown");
            Ok(JobHandle::discarded())
        } else {
            warn!(pool = %core.name, "rejecting job submitted after shutdown");
            Err(ExecError::rejected(&core.name))
        }
    }

    /// Stop accepting jobs. Queued jobs still run before workers exit.
    pub fn shutdown(&self) {
        if self.core().begin_shutdown() {
            info!(pool = %self.name(), queued = self.queued_count(), "pool shutting down");
        }
    }

    /// Stop accepting jobs, hand back everything still queued, and
    /// interrupt workers that are mid-job.
    pub fn shutdown_now(&self) -> Vec<PendingJob> {
        let core = self.core();
        core.begin_shutdown();

        let pending: Vec<PendingJob> = core
            .queue
            .drain()
            .into_iter()
            .filter(|job| job.state.is_queued())
            .map(PendingJob::new)
            .collect();

        let running: Vec<Interrupter> = core.running.lock().values().cloned().collect();
        for interrupter in &running {
            interrupter.interrupt();
        }

        info!(
            pool = %core.name,
            returned = pending.len(),
            interrupted = running.len(),
            "pool shut down immediately"
        );
        pending
    }

    pub fn is_shutdown(&self) -> bool {
        self.core().shutdown.load(Ordering::SeqCst)
    }

    /// Shut down and every worker has exited.
    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && *self.core().live_workers.lock() == 0
    }

    /// Block until every worker has exited or `timeout` elapses.
    /// Returns whether the pool terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let core = self.core();
        let deadline = Instant::now() + timeout;
        let mut live = core.live_workers.lock();
        while *live > 0 {
            if core.terminated.wait_until(&mut live, deadline).timed_out() {
                return *live == 0;
            }
        }
        true
    }

    /// Graceful shutdown followed by joining every worker thread.
    pub fn join(&self) {
        self.shutdown();
        let threads: Vec<JoinHandle<()>> = self.inner.threads.lock().drain(..).collect();
        for handle in threads {
            if handle.join().is_err() {
                warn!(pool = %self.name(), "worker thread panicked outside a job");
            }
        }
    }

    /// Workers currently running a job.
    pub fn active_count(&self) -> usize {
        self.core().active.load(Ordering::SeqCst)
    }

    /// Jobs waiting in the queue, including cancelled ones not yet skipped.
    pub fn queued_count(&self) -> usize {
        self.core().queue.len()
    }

    /// Jobs that ran to completion or panicked.
    pub fn completed_count(&self) -> u64 {
        self.core().completed.load(Ordering::Relaxed)
    }

    /// Worker threads spawned and not yet joined.
    pub fn worker_count(&self) -> usize {
        self.inner.threads.lock().len()
    }
}

impl Executor for FixedPool {
    fn name(&self) -> &str {
        FixedPool::name(self)
    }

    fn execute(&self, job: Job) -> Result<(), ExecError> {
        self.enqueue(DEFAULT_PRIORITY, job, false).map(|_| ())
    }

    fn execute_prioritized(&self, priority: i64, job: Job) -> Result<(), ExecError> {
        self.enqueue(priority, job, true).map(|_| ())
    }

    fn shutdown(&self) {
        FixedPool::shutdown(self);
    }

    fn is_shutdown(&self) -> bool {
        FixedPool::is_shutdown(self)
    }

    fn is_terminated(&self) -> bool {
        FixedPool::is_terminated(self)
    }
}

impl std::fmt::Debug for FixedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedPool")
            .field("name", &self.name())
            .field("active", &self.active_count())
            .field("queued", &self.queued_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
