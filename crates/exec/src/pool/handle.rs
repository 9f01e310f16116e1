use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::executor::Job;
use crate::queue::BlockingQueue;

/// How a submitted job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Panicked,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobStatus {
    Queued,
    Running,
    Finished(JobOutcome),
}

/// Completion state shared by a queued job and its handle.
pub(crate) struct JobState {
    status: Mutex<JobStatus>,
    finished: Condvar,
}

impl JobState {
    pub(crate) fn new() -> Self {
        Self {
            status: Mutex::new(JobStatus::Queued),
            finished: Condvar::new(),
        }
    }

    fn cancelled() -> Self {
        Self {
            status: Mutex::new(JobStatus::Finished(JobOutcome::Cancelled)),
            finished: Condvar::new(),
        }
    }

    /// Claim the job for execution. Fails if it was cancelled first.
    pub(crate) fn try_start(&self) -> bool {
        let mut status = self.status.lock();
        if *status == JobStatus::Queued {
            *status = JobStatus::Running;
            true
        } else {
            false
        }
    }

    pub(crate) fn finish(&self, outcome: JobOutcome) {
        *self.status.lock() = JobStatus::Finished(outcome);
        self.finished.notify_all();
    }

    fn cancel(&self) -> bool {
        let mut status = self.status.lock();
        if *status != JobStatus::Queued {
            return false;
        }
        *status = JobStatus::Finished(JobOutcome::Cancelled);
        drop(status);
        self.finished.notify_all();
        true
    }

    pub(crate) fn is_queued(&self) -> bool {
        *self.status.lock() == JobStatus::Queued
    }

    fn outcome(&self) -> Option<JobOutcome> {
        match *self.status.lock() {
            JobStatus::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }

    fn wait_until(&self, deadline: Option<Instant>) -> Option<JobOutcome> {
        let mut status = self.status.lock();
        loop {
            if let JobStatus::Finished(outcome) = *status {
                return Some(outcome);
            }
            match deadline {
                Some(deadline) => {
                    if self.finished.wait_until(&mut status, deadline).timed_out() {
                        return match *status {
                            JobStatus::Finished(outcome) => Some(outcome),
                            _ => None,
                        };
                    }
                }
                None => self.finished.wait(&mut status),
            }
        }
    }
}

/// A job as it sits in a pool queue.
///
/// Ordered by `(priority, seq)` so a priority queue yields the lowest
/// priority value first and falls back to submission order.
pub struct QueuedJob {
    pub(crate) seq: u64,
    pub(crate) priority: i64,
    pub(crate) job: Job,
    pub(crate) state: Arc<JobState>,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedJob")
            .field("seq", &self.seq)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Handle to a job submitted to a [`FixedPool`](super::FixedPool).
///
/// Handles of prioritized jobs also pull the job out of the queue when
/// cancelled, so abandoned work does not pile up behind live work.
#[derive(Clone)]
pub struct JobHandle {
    state: Arc<JobState>,
    removal: Option<Removal>,
}

#[derive(Clone)]
struct Removal {
    queue: Weak<dyn BlockingQueue<QueuedJob>>,
    seq: u64,
}

impl JobHandle {
    pub(crate) fn new(state: Arc<JobState>) -> Self {
        Self {
            state,
            removal: None,
        }
    }

    pub(crate) fn removable(
        state: Arc<JobState>,
        queue: &Arc<dyn BlockingQueue<QueuedJob>>,
        seq: u64,
    ) -> Self {
        Self {
            state,
            removal: Some(Removal {
                queue: Arc::downgrade(queue),
                seq,
            }),
        }
    }

    /// Handle for a submission that was discarded without running.
    pub(crate) fn discarded() -> Self {
        Self::new(Arc::new(JobState::cancelled()))
    }

    /// Cancel the job if it has not started. Returns `false` if it already
    /// started, finished, or was cancelled before.
    pub fn cancel(&self) -> bool {
        if !self.state.cancel() {
            return false;
        }
        if let Some(removal) = &self.removal {
            if let Some(queue) = removal.queue.upgrade() {
                let seq = removal.seq;
                queue.remove_where(&mut |job: &QueuedJob| job.seq == seq);
            }
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.outcome() == Some(JobOutcome::Cancelled)
    }

    pub fn is_done(&self) -> bool {
        self.state.outcome().is_some()
    }

    pub fn outcome(&self) -> Option<JobOutcome> {
        self.state.outcome()
    }

    /// Block until the job has finished, panicked, or been cancelled.
    pub fn wait(&self) -> JobOutcome {
        self.state
            .wait_until(None)
            .unwrap_or(JobOutcome::Cancelled)
    }

    /// Wait at most `timeout`. `None` if the job is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        self.state.wait_until(Some(Instant::now() + timeout))
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("outcome", &self.outcome())
            .field("removable", &self.removal.is_some())
            .finish()
    }
}

/// A job that never started, handed back by
/// [`FixedPool::shutdown_now`](super::FixedPool::shutdown_now).
///
/// Dropping it without calling [`run`](Self::run) cancels it.
pub struct PendingJob {
    inner: Option<QueuedJob>,
}

impl PendingJob {
    pub(crate) fn new(inner: QueuedJob) -> Self {
        Self { inner: Some(inner) }
    }

    pub fn priority(&self) -> i64 {
        self.inner.as_ref().map_or(0, |job| job.priority)
    }

    /// Run the job on the calling thread. Panics propagate to the caller.
    pub fn run(mut self) {
        let Some(QueuedJob { job, state, .. }) = self.inner.take() else {
            return;
        };
        if !state.try_start() {
            return;
        }
        struct Finish(Arc<JobState>, bool);
        impl Drop for Finish {
            fn drop(&mut self) {
                let outcome = if self.1 { JobOutcome::Completed } else { JobOutcome::Panicked };
                self.0.finish(outcome);
            }
        }
        let mut finish = Finish(state, false);
        job();
        finish.1 = true;
    }

    /// Drop the job, marking its handle cancelled.
    pub fn discard(self) {
        drop(self);
    }
}

impl Drop for PendingJob {
    fn drop(&mut self) {
        if let Some(job) = self.inner.take() {
            job.state.cancel();
        }
    }
}

impl fmt::Debug for PendingJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingJob")
            .field("priority", &self.priority())
            .finish()
    }
}
