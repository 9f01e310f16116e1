//! Debouncing executor.
//!
//! Each submission replaces the job still waiting for its quiet period and
//! restarts the timer. With a maximum delay configured, the first submission
//! of a burst fixes a deadline and the latest job runs no later than that,
//! however often submissions keep arriving.
//!
//! At most one job runs at a time. A job submitted while another is running
//! waits for it to finish and then serves a fresh quiet period.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::ExecError;
use crate::executor::{Executor, Job};
use crate::fault::{self, default_fault_handler, FaultHandler};
use crate::timer::{TimerHandle, TimerService};
use crate::types::DebounceConfig;

#[derive(Default)]
struct DebounceState {
    pending: Option<Job>,
    armed: Option<TimerHandle>,
    /// Bumped on every arm so a stale timer firing is ignored.
    generation: u64,
    /// Max-delay deadline of the current burst, fixed once set.
    deadline: Option<Instant>,
    running: bool,
    shutdown: bool,
    executions: u64,
    dropped: u64,
    replaced: u64,
}

struct DebounceShared {
    name: String,
    min_delay: Duration,
    max_delay: Option<Duration>,
    timer: TimerService,
    runner: Arc<dyn Executor>,
    fault_handler: FaultHandler,
    state: Mutex<DebounceState>,
}

impl DebounceShared {
    fn arm(self: &Arc<Self>, state: &mut DebounceState) -> Result<(), ExecError> {
        if let Some(previous) = state.armed.take() {
            previous.cancel();
        }

        let now = Instant::now();
        let mut fire_at = now + self.min_delay;
        if let Some(max_delay) = self.max_delay {
            let deadline = *state.deadline.get_or_insert(now + max_delay);
            fire_at = fire_at.min(deadline);
        }

        state.generation += 1;
        let generation = state.generation;
        let shared = Arc::clone(self);
        let handle = self
            .timer
            .schedule_at(fire_at, move || shared.fire(generation))?;
        state.armed = Some(handle);
        trace!(
            debouncer = %self.name,
            generation,
            in_ms = fire_at.saturating_duration_since(now).as_millis() as u64,
            "armed"
        );
        Ok(())
    }

    fn fire(self: &Arc<Self>, generation: u64) {
        let job = {
            let mut state = self.state.lock();
            if state.generation != generation || state.running || state.shutdown {
                return;
            }
            state.armed = None;
            state.deadline = None;
            let Some(job) = state.pending.take() else {
                return;
            };
            state.running = true;
            job
        };

        let mut slot = RunSlot {
            shared: Arc::clone(self),
            ran: false,
        };
        let wrapped: Job = Box::new(move || {
            fault::run_guarded(&slot.shared.name, &slot.shared.fault_handler, job);
            slot.ran = true;
        });

        // A refused job has already been dropped, which freed the slot.
        if let Err(e) = self.runner.execute(wrapped) {
            warn!(debouncer = %self.name, error = %e, "runner refused debounced job");
        }
    }

    fn finished(self: &Arc<Self>, ran: bool) {
        let abandoned = {
            let mut state = self.state.lock();
            state.running = false;
            if ran {
                state.executions += 1;
            } else {
                state.dropped += 1;
                debug!(debouncer = %self.name, "runner dropped debounced job");
            }
            if state.pending.is_none() || state.shutdown {
                return;
            }
            debug!(debouncer = %self.name, "job queued during execution, re-arming");
            match self.arm(&mut state) {
                Ok(()) => None,
                Err(e) => {
                    warn!(debouncer = %self.name, error = %e, "could not re-arm, dropping job");
                    state.pending.take()
                }
            }
        };
        drop(abandoned);
    }
}

/// Owned by the job handed to the runner. Frees the running slot when the
/// job finishes or when the runner drops it without running it.
struct RunSlot {
    shared: Arc<DebounceShared>,
    ran: bool,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.shared.finished(self.ran);
    }
}

/// Fluent builder for a [`DebouncingExecutor`].
pub struct DebouncerBuilder {
    name: String,
    timer: TimerService,
    runner: Arc<dyn Executor>,
    config: DebounceConfig,
    fault_handler: FaultHandler,
}

impl DebouncerBuilder {
    /// Replace both delays at once.
    pub fn config(mut self, config: DebounceConfig) -> Self {
        self.config = config;
        self
    }

    /// Quiet period restarted by every submission.
    pub fn min_delay(mut self, delay: Duration) -> Self {
        self.config.min_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Upper bound on how long a burst of submissions can defer its job.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay_ms = Some(delay.as_millis() as u64);
        self
    }

    /// Receives panics from debounced jobs. Defaults to logging them.
    pub fn fault_handler(mut self, handler: FaultHandler) -> Self {
        self.fault_handler = handler;
        self
    }

    /// Fails with [`ExecError::Config`] if the max delay is below the
    /// min delay.
    pub fn build(self) -> Result<DebouncingExecutor, ExecError> {
        self.config.validate()?;
        Ok(DebouncingExecutor {
            shared: Arc::new(DebounceShared {
                name: self.name,
                min_delay: self.config.min_delay(),
                max_delay: self.config.max_delay(),
                timer: self.timer,
                runner: self.runner,
                fault_handler: self.fault_handler,
                state: Mutex::new(DebounceState::default()),
            }),
        })
    }
}

/// Coalesces rapid submissions into one delayed execution.
///
/// Timing runs on the shared [`TimerService`]; the job itself is handed to
/// `runner` so a slow job never holds up other timers.
#[derive(Clone)]
pub struct DebouncingExecutor {
    shared: Arc<DebounceShared>,
}

impl DebouncingExecutor {
    pub fn builder(
        name: impl Into<String>,
        timer: TimerService,
        runner: Arc<dyn Executor>,
    ) -> DebouncerBuilder {
        DebouncerBuilder {
            name: name.into(),
            timer,
            runner,
            config: DebounceConfig::default(),
            fault_handler: default_fault_handler(),
        }
    }

    /// Replace whatever job is waiting with `f` and restart the quiet period.
    pub fn submit<F>(&self, f: F) -> Result<(), ExecError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_job(Box::new(f))
    }

    fn submit_job(&self, job: Job) -> Result<(), ExecError> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.shutdown {
            return Err(ExecError::rejected(&shared.name));
        }
        let superseded = state.pending.replace(job);
        if superseded.is_some() {
            state.replaced += 1;
        }
        let armed = if state.running {
            Ok(())
        } else {
            shared.arm(&mut state)
        };
        let unarmed = if armed.is_err() {
            state.pending.take()
        } else {
            None
        };
        // Dropping a job can call back into whoever queued it.
        drop(state);
        drop(superseded);
        drop(unarmed);
        armed
    }

    /// Drop the waiting job, if any. A running job is unaffected.
    pub fn cancel_pending(&self) -> bool {
        let cancelled = {
            let mut state = self.shared.state.lock();
            if let Some(handle) = state.armed.take() {
                handle.cancel();
            }
            state.deadline = None;
            state.pending.take()
        };
        cancelled.is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.shared.state.lock().pending.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Jobs that actually ran.
    pub fn executions(&self) -> u64 {
        self.shared.state.lock().executions
    }

    /// Jobs the runner accepted or refused but never ran.
    pub fn dropped(&self) -> u64 {
        self.shared.state.lock().dropped
    }

    /// Jobs superseded by a later submission before they ran.
    pub fn replaced(&self) -> u64 {
        self.shared.state.lock().replaced
    }
}

impl Executor for DebouncingExecutor {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn execute(&self, job: Job) -> Result<(), ExecError> {
        self.submit_job(job)
    }

    /// Refuse new submissions and drop the waiting job.
    fn shutdown(&self) {
        self.cancel_pending();
        self.shared.state.lock().shutdown = true;
    }

    fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    fn is_terminated(&self) -> bool {
        let state = self.shared.state.lock();
        state.shutdown && !state.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::Fault;
    use crate::pool::FixedPool;
    use crate::types::PoolConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;

    const WAIT: Duration = Duration::from_secs(5);

    fn runner(name: &str) -> Arc<dyn Executor> {
        Arc::new(FixedPool::new(PoolConfig::named(name, 2)).unwrap())
    }

    fn debouncer(name: &str, min: Duration, max: Option<Duration>) -> DebouncingExecutor {
        let timer = TimerService::new(name).unwrap();
        DebouncingExecutor::builder(name, timer, runner(name))
            .config(DebounceConfig::new(min, max))
            .build()
            .unwrap()
    }

    #[test]
    fn rapid_submissions_coalesce_into_last_job() {
        let debouncer = debouncer("coalesce", Duration::from_millis(150), None);
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            debouncer.submit(move || tx.send(i).unwrap()).unwrap();
        }

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 9);
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err(), "only one run");
        assert_eq!(debouncer.executions(), 1);
        assert_eq!(debouncer.replaced(), 9);
    }

    #[test]
    fn quiet_period_is_honoured() {
        let debouncer = debouncer("quiet", Duration::from_millis(80), None);
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        debouncer.submit(move || tx.send(Instant::now()).unwrap()).unwrap();
        let ran_at = rx.recv_timeout(WAIT).unwrap();
        assert!(ran_at.duration_since(start) >= Duration::from_millis(80));
    }

    #[test]
    fn max_delay_bounds_latency_under_continuous_resubmission() {
        let min = Duration::from_millis(60);
        let max = Duration::from_millis(200);
        let debouncer = debouncer("maxdelay", min, Some(max));
        let (tx, rx) = mpsc::channel();

        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(600) {
            let tx = tx.clone();
            debouncer.submit(move || tx.send(Instant::now()).unwrap()).unwrap();
            thread::sleep(Duration::from_millis(10));
        }

        let first = rx.recv_timeout(WAIT).unwrap();
        let latency = first.duration_since(start);
        assert!(
            latency <= max + Duration::from_millis(100),
            "first run after {latency:?}, deadline was {max:?}"
        );
    }

    #[test]
    fn only_one_job_runs_at_a_time() {
        let min = Duration::from_millis(30);
        let debouncer = debouncer("serial", min, None);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        let make_job = |label: &'static str| {
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            let tx = tx.clone();
            move || {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                let started = Instant::now();
                thread::sleep(Duration::from_millis(100));
                concurrent.fetch_sub(1, Ordering::SeqCst);
                tx.send((label, started, Instant::now())).unwrap();
            }
        };

        debouncer.submit(make_job("first")).unwrap();
        let deadline = Instant::now() + WAIT;
        while !debouncer.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        debouncer.submit(make_job("second")).unwrap();

        let (first, _, first_end) = rx.recv_timeout(WAIT).unwrap();
        let (second, second_start, _) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!((first, second), ("first", "second"));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(second_start.duration_since(first_end) >= min - Duration::from_millis(5));
    }

    #[test]
    fn panic_is_routed_to_fault_handler() {
        let faults = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&faults);
        let timer = TimerService::new("faulty").unwrap();
        let debouncer = DebouncingExecutor::builder("faulty", timer, runner("faulty"))
            .min_delay(Duration::from_millis(10))
            .fault_handler(Arc::new(move |_: &Fault| {
                f.fetch_add(1, Ordering::SeqCst);
            }))
            .build()
            .unwrap();

        debouncer.submit(|| panic!("debounced failure")).unwrap();
        let deadline = Instant::now() + WAIT;
        while debouncer.executions() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(faults.load(Ordering::SeqCst), 1);

        // Bookkeeping survived the panic.
        let (tx, rx) = mpsc::channel();
        debouncer.submit(move || tx.send(()).unwrap()).unwrap();
        assert!(rx.recv_timeout(WAIT).is_ok());
    }

    #[test]
    fn cancel_pending_drops_waiting_job() {
        let debouncer = debouncer("cancelled", Duration::from_millis(50), None);
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        debouncer
            .submit(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert!(debouncer.has_pending());
        assert!(debouncer.cancel_pending());
        thread::sleep(Duration::from_millis(120));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn runner_dropping_the_job_does_not_wedge_the_debouncer() {
        let mut config = PoolConfig::named("dropping", 1);
        config.suppress_rejections = true;
        let pool = FixedPool::new(config).unwrap();
        pool.shutdown();
        let timer = TimerService::new("dropping").unwrap();
        let debouncer = DebouncingExecutor::builder("dropping", timer, Arc::new(pool))
            .min_delay(Duration::from_millis(10))
            .build()
            .unwrap();

        for _ in 0..3 {
            let ran = Arc::new(AtomicUsize::new(0));
            let r = Arc::clone(&ran);
            debouncer
                .submit(move || {
                    r.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            let before = debouncer.dropped();
            let deadline = Instant::now() + WAIT;
            while debouncer.dropped() == before && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            assert_eq!(debouncer.dropped(), before + 1, "each submission reached the runner");
            assert!(!debouncer.is_running());
            assert_eq!(ran.load(Ordering::SeqCst), 0);
        }
        assert_eq!(debouncer.executions(), 0);
    }

    #[test]
    fn superseded_job_is_dropped_outside_the_lock() {
        struct Reentrant {
            debouncer: DebouncingExecutor,
            observed: mpsc::Sender<bool>,
        }
        impl Drop for Reentrant {
            fn drop(&mut self) {
                let _ = self.observed.send(self.debouncer.has_pending());
            }
        }

        let debouncer = debouncer("reentrant", Duration::from_millis(200), None);
        let (tx, rx) = mpsc::channel();
        let guard = Reentrant {
            debouncer: debouncer.clone(),
            observed: tx,
        };
        debouncer
            .submit(move || {
                let _guard = guard;
            })
            .unwrap();
        debouncer.submit(|| {}).unwrap();

        assert!(rx.recv_timeout(WAIT).unwrap(), "replacement already pending");
        assert_eq!(debouncer.replaced(), 1);
        assert!(debouncer.cancel_pending());
    }

    #[test]
    fn submission_after_shutdown_is_rejected() {
        let debouncer = debouncer("closed", Duration::from_millis(10), None);
        Executor::shutdown(&debouncer);
        assert!(debouncer.is_shutdown());
        assert!(matches!(
            debouncer.submit(|| {}),
            Err(ExecError::Rejected { .. })
        ));
    }
}
