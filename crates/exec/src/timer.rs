//! Shared timer service.
//!
//! One background thread sleeps until the earliest deadline in a heap and
//! runs the due entry. Timer jobs are expected to be short: hand real work
//! to an [`Executor`](crate::Executor) from inside the job.
//!
//! The service is constructed explicitly and cloned into whatever needs it;
//! there is no process-wide instance.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::error::ExecError;
use crate::executor::Job;
use crate::fault::{self, default_fault_handler, FaultHandler};

type RepeatingJob = Arc<dyn Fn() + Send + Sync>;

enum TimerTask {
    Once(Job),
    FixedDelay { period: Duration, job: RepeatingJob },
}

struct Entry {
    at: Instant,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    task: TimerTask,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.at.cmp(&other.at).then_with(|| self.seq.cmp(&other.seq))
    }
}

struct TimerState {
    heap: BinaryHeap<Reverse<Entry>>,
    seq: u64,
    shutdown: bool,
}

struct TimerCore {
    name: String,
    state: Mutex<TimerState>,
    wakeup: Condvar,
    fault_handler: FaultHandler,
}

impl TimerCore {
    fn push(&self, at: Instant, task: TimerTask) -> Result<TimerHandle, ExecError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(ExecError::TimerShutdown);
        }
        let seq = state.seq;
        state.seq += 1;
        state.heap.push(Reverse(Entry {
            at,
            seq,
            cancelled: Arc::clone(&cancelled),
            task,
        }));
        drop(state);
        self.wakeup.notify_one();
        Ok(TimerHandle { cancelled })
    }

    /// Block until an entry is due. `None` once shut down.
    fn next_due(&self) -> Option<Entry> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            let (due_at, cancelled) = match state.heap.peek() {
                None => {
                    self.wakeup.wait(&mut state);
                    continue;
                }
                Some(Reverse(top)) => (top.at, top.cancelled.load(Ordering::Acquire)),
            };
            if cancelled || due_at <= Instant::now() {
                let Some(Reverse(entry)) = state.heap.pop() else {
                    continue;
                };
                if cancelled {
                    continue;
                }
                return Some(entry);
            }
            self.wakeup.wait_until(&mut state, due_at);
        }
    }

    fn run(self: Arc<Self>) {
        debug!(timer = %self.name, "timer thread started");
        while let Some(entry) = self.next_due() {
            match entry.task {
                TimerTask::Once(job) => {
                    fault::run_guarded(&self.name, &self.fault_handler, job);
                }
                TimerTask::FixedDelay { period, job } => {
                    fault::run_guarded(&self.name, &self.fault_handler, || job());
                    if !entry.cancelled.load(Ordering::Acquire) {
                        let next = TimerTask::FixedDelay { period, job };
                        let mut state = self.state.lock();
                        if !state.shutdown {
                            let seq = state.seq;
                            state.seq += 1;
                            state.heap.push(Reverse(Entry {
                                at: Instant::now() + period,
                                seq,
                                cancelled: entry.cancelled,
                                task: next,
                            }));
                        }
                    }
                }
            }
        }
        debug!(timer = %self.name, "timer thread exiting");
    }
}

/// Cancellation handle for a scheduled timer entry.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Prevent future runs. An execution already in progress completes.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct TimerInner {
    core: Arc<TimerCore>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl TimerInner {
    fn shutdown(&self) {
        {
            let mut state = self.core.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.heap.clear();
        }
        self.core.wakeup.notify_all();
        info!(timer = %self.core.name, "timer service shut down");

        // A timer job may shut its own service down; it cannot join itself.
        if thread::current().id() == self.thread_id {
            return;
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!(timer = %self.core.name, "timer thread panicked");
            }
        }
    }
}

impl Drop for TimerInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to a timer thread. Clones share the same thread.
#[derive(Clone)]
pub struct TimerService {
    inner: Arc<TimerInner>,
}

impl TimerService {
    /// Start a timer thread that logs panicking timer jobs.
    pub fn new(name: impl Into<String>) -> Result<Self, ExecError> {
        Self::with_fault_handler(name, default_fault_handler())
    }

    /// Start a timer thread that reports panicking timer jobs to
    /// `fault_handler`.
    pub fn with_fault_handler(
        name: impl Into<String>,
        fault_handler: FaultHandler,
    ) -> Result<Self, ExecError> {
        let name = name.into();
        let core = Arc::new(TimerCore {
            name: name.clone(),
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                seq: 0,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
            fault_handler,
        });

        let thread_core = Arc::clone(&core);
        let handle = thread::Builder::new()
            .name(format!("{name}-timer"))
            .spawn(move || thread_core.run())?;
        let thread_id = handle.thread().id();
        info!(timer = %name, "timer service started");

        Ok(Self {
            inner: Arc::new(TimerInner {
                core,
                thread: Mutex::new(Some(handle)),
                thread_id,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.core.name
    }

    /// Run `f` once after `delay`.
    pub fn schedule<F>(&self, delay: Duration, f: F) -> Result<TimerHandle, ExecError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_at(Instant::now() + delay, f)
    }

    /// Run `f` once at `at` (immediately if `at` has passed).
    pub fn schedule_at<F>(&self, at: Instant, f: F) -> Result<TimerHandle, ExecError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.core.push(at, TimerTask::Once(Box::new(f)))
    }

    /// Run `f` after `initial`, then repeatedly with `period` between the
    /// end of one run and the start of the next.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        initial: Duration,
        period: Duration,
        f: F,
    ) -> Result<TimerHandle, ExecError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.core.push(
            Instant::now() + initial,
            TimerTask::FixedDelay {
                period,
                job: Arc::new(f),
            },
        )
    }

    /// Entries waiting to fire, including cancelled ones not yet discarded.
    pub fn pending_count(&self) -> usize {
        self.inner.core.state.lock().heap.len()
    }

    /// Drop every pending entry and stop the timer thread.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.core.state.lock().shutdown
    }
}

impl std::fmt::Debug for TimerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerService")
            .field("name", &self.name())
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn one_shot_fires_after_delay() {
        let timer = TimerService::new("oneshot").unwrap();
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        timer
            .schedule(Duration::from_millis(30), move || tx.send(Instant::now()).unwrap())
            .unwrap();
        let fired = rx.recv_timeout(WAIT).unwrap();
        assert!(fired.duration_since(start) >= Duration::from_millis(30));
    }

    #[test]
    fn entries_fire_in_deadline_order() {
        let timer = TimerService::new("order").unwrap();
        let (tx, rx) = mpsc::channel();
        for delay in [40u64, 10, 25] {
            let tx = tx.clone();
            timer
                .schedule(Duration::from_millis(delay), move || tx.send(delay).unwrap())
                .unwrap();
        }
        let got: Vec<u64> = (0..3).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(got, vec![10, 25, 40]);
    }

    #[test]
    fn cancelled_entry_does_not_fire() {
        let timer = TimerService::new("cancel").unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let handle = timer
            .schedule(Duration::from_millis(20), move || {
                f.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        handle.cancel();
        assert!(handle.is_cancelled());
        thread::sleep(Duration::from_millis(80));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fixed_delay_repeats_until_cancelled() {
        let timer = TimerService::new("repeat").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = timer
            .schedule_with_fixed_delay(Duration::ZERO, Duration::from_millis(10), move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let deadline = Instant::now() + WAIT;
        while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        handle.cancel();
        let after_cancel = count.load(Ordering::SeqCst);
        assert!(after_cancel >= 3);

        thread::sleep(Duration::from_millis(60));
        // At most the run that was in flight when cancel landed.
        assert!(count.load(Ordering::SeqCst) <= after_cancel + 1);
    }

    #[test]
    fn panicking_entry_does_not_kill_timer() {
        let timer = TimerService::with_fault_handler("panicky", Arc::new(|_: &fault::Fault| {}))
            .unwrap();
        timer.schedule(Duration::ZERO, || panic!("timer job")).unwrap();
        let (tx, rx) = mpsc::channel();
        timer
            .schedule(Duration::from_millis(10), move || tx.send(()).unwrap())
            .unwrap();
        assert!(rx.recv_timeout(WAIT).is_ok());
    }

    #[test]
    fn schedule_after_shutdown_fails() {
        let timer = TimerService::new("closed").unwrap();
        timer.shutdown();
        assert!(timer.is_shutdown());
        assert!(matches!(
            timer.schedule(Duration::ZERO, || {}),
            Err(ExecError::TimerShutdown)
        ));
    }

    #[test]
    fn job_can_shut_down_its_own_timer() {
        let timer = TimerService::new("selfstop").unwrap();
        let inner = timer.clone();
        let (tx, rx) = mpsc::channel();
        timer
            .schedule(Duration::ZERO, move || {
                inner.shutdown();
                tx.send(()).unwrap();
            })
            .unwrap();
        rx.recv_timeout(WAIT).unwrap();
        assert!(timer.is_shutdown());
    }
}
