//! Execution time limits.
//!
//! [`DeadlineExecutor`] wraps another executor and records when each job
//! starts. A guard on the shared timer sweeps the in-flight set every poll
//! interval and interrupts jobs that have run past the limit. Interruption
//! is cooperative: the job sees it through [`crate::interrupt`] and decides
//! how to stop. Each job is interrupted at most once.
//!
//! Only the flag a sweep set is cleared after the job, so a job run inline
//! on the caller's thread leaves the caller's own pending interrupt alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::ExecError;
use crate::executor::{Executor, Job};
use crate::interrupt::{self, Interrupter};
use crate::timer::{TimerHandle, TimerService};
use crate::types::DeadlineConfig;

struct InFlight {
    started: Instant,
    interrupter: Interrupter,
}

struct DeadlineShared {
    name: String,
    inner: Arc<dyn Executor>,
    timer: TimerService,
    limit: Duration,
    in_flight: Mutex<HashMap<u64, InFlight>>,
    next_id: AtomicU64,
    guard: Mutex<Option<TimerHandle>>,
    shutdown: AtomicBool,
    interrupted: AtomicU64,
}

/// Removes a job from the in-flight set however it exits.
struct Tracked<'a> {
    shared: &'a DeadlineShared,
    id: u64,
}

impl Drop for Tracked<'_> {
    fn drop(&mut self) {
        let swept = self.shared.in_flight.lock().remove(&self.id).is_none();
        // A swept job was interrupted by us; consume the flag if the job
        // left it set so it does not leak into whatever runs next.
        if swept {
            interrupt::clear();
        }
    }
}

impl DeadlineShared {
    fn wrap(self: &Arc<Self>, job: Job) -> Job {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::clone(self);
        Box::new(move || {
            shared.in_flight.lock().insert(
                id,
                InFlight {
                    started: Instant::now(),
                    interrupter: Interrupter::current(),
                },
            );
            let _tracked = Tracked {
                shared: &shared,
                id,
            };
            job();
        })
    }

    fn sweep(&self) {
        let now = Instant::now();
        // Interrupt under the lock so the flag cannot outlive the job.
        let overdue: Vec<(u64, InFlight)> = {
            let mut in_flight = self.in_flight.lock();
            let ids: Vec<u64> = in_flight
                .iter()
                .filter(|(_, job)| now.duration_since(job.started) >= self.limit)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| in_flight.remove(&id).map(|job| (id, job)))
                .inspect(|(_, job)| {
                    job.interrupter.interrupt();
                    self.interrupted.fetch_add(1, Ordering::Relaxed);
                })
                .collect()
        };

        for (id, job) in overdue {
            warn!(
                executor = %self.name,
                job = id,
                thread = job.interrupter.thread_name().unwrap_or("unnamed"),
                elapsed_ms = now.duration_since(job.started).as_millis() as u64,
                limit_ms = self.limit.as_millis() as u64,
                "job exceeded its time limit, interrupting"
            );
        }

        if self.shutdown.load(Ordering::SeqCst)
            && self.in_flight.lock().is_empty()
            && self.inner.is_terminated()
        {
            if let Some(guard) = self.guard.lock().take() {
                guard.cancel();
                debug!(executor = %self.name, "deadline guard stopped");
            }
        }
    }
}

impl Drop for DeadlineShared {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.get_mut().take() {
            guard.cancel();
        }
    }
}

/// Executor decorator that interrupts jobs running longer than a limit.
#[derive(Clone)]
pub struct DeadlineExecutor {
    shared: Arc<DeadlineShared>,
}

impl DeadlineExecutor {
    /// Wrap `inner`, polling on `timer` at the configured interval.
    pub fn new(
        name: impl Into<String>,
        inner: Arc<dyn Executor>,
        timer: TimerService,
        config: DeadlineConfig,
    ) -> Result<Self, ExecError> {
        config.validate()?;
        let shared = Arc::new(DeadlineShared {
            name: name.into(),
            inner,
            timer: timer.clone(),
            limit: config.limit(),
            in_flight: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            guard: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            interrupted: AtomicU64::new(0),
        });

        let weak: Weak<DeadlineShared> = Arc::downgrade(&shared);
        let poll = config.poll_interval();
        let guard = timer.schedule_with_fixed_delay(poll, poll, move || {
            if let Some(shared) = weak.upgrade() {
                shared.sweep();
            }
        })?;
        *shared.guard.lock() = Some(guard);

        debug!(
            executor = %shared.name,
            limit_ms = config.limit_ms,
            poll_ms = config.poll_interval_ms,
            "deadline guard armed"
        );
        Ok(Self { shared })
    }

    /// Jobs currently running under the limit.
    pub fn in_flight_count(&self) -> usize {
        self.shared.in_flight.lock().len()
    }

    /// Jobs interrupted so far for exceeding the limit.
    pub fn interrupted_count(&self) -> u64 {
        self.shared.interrupted.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> Duration {
        self.shared.limit
    }
}

impl Executor for DeadlineExecutor {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn execute(&self, job: Job) -> Result<(), ExecError> {
        self.shared.inner.execute(self.shared.wrap(job))
    }

    fn execute_prioritized(&self, priority: i64, job: Job) -> Result<(), ExecError> {
        self.shared
            .inner
            .execute_prioritized(priority, self.shared.wrap(job))
    }

    fn schedule(&self, delay: Duration, job: Job) -> Result<(), ExecError> {
        self.shared.inner.schedule(delay, self.shared.wrap(job))
    }

    /// Shut the wrapped executor down. Jobs still running stay under watch
    /// until they finish; an immediate sweep catches any already overdue.
    fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.inner.shutdown();
        let weak = Arc::downgrade(&self.shared);
        let scheduled = self.shared.timer.schedule(Duration::ZERO, move || {
            if let Some(shared) = weak.upgrade() {
                shared.sweep();
            }
        });
        if let Err(e) = scheduled {
            debug!(executor = %self.shared.name, error = %e, "final sweep not scheduled");
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.shared.inner.is_terminated() && self.in_flight_count() == 0
    }
}
