//! Cooperative thread interruption.
//!
//! A thread cannot be pre-empted from outside. Interrupting one sets its
//! flag and unparks it; jobs that care about deadlines poll
//! [`is_interrupted`] or sleep through [`sleep`], which wakes early.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

struct InterruptState {
    flag: AtomicBool,
    thread: Thread,
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<InterruptState>>> = const { RefCell::new(None) };
}

fn current_state() -> Arc<InterruptState> {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        Arc::clone(slot.get_or_insert_with(|| {
            Arc::new(InterruptState {
                flag: AtomicBool::new(false),
                thread: thread::current(),
            })
        }))
    })
}

/// Handle that can interrupt one particular thread.
#[derive(Clone)]
pub struct Interrupter {
    state: Arc<InterruptState>,
}

impl Interrupter {
    /// Handle for the calling thread.
    pub fn current() -> Self {
        Self {
            state: current_state(),
        }
    }

    /// Set the target thread's interrupt flag and wake it if parked.
    pub fn interrupt(&self) {
        self.state.flag.store(true, Ordering::Release);
        self.state.thread.unpark();
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.flag.load(Ordering::Acquire)
    }

    /// Name of the target thread, if it has one.
    pub fn thread_name(&self) -> Option<&str> {
        self.state.thread.name()
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupter")
            .field("thread", &self.state.thread.id())
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// Returned by [`sleep`] when the sleeping thread is interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("thread interrupted")]
pub struct Interrupted;

/// Whether the calling thread has a pending interrupt. Does not clear it.
pub fn is_interrupted() -> bool {
    current_state().flag.load(Ordering::Acquire)
}

/// Test-and-clear the calling thread's interrupt flag.
pub fn take_interrupt() -> bool {
    current_state().flag.swap(false, Ordering::AcqRel)
}

/// Clear the calling thread's interrupt flag.
pub fn clear() {
    take_interrupt();
}

/// Sleep for `duration`, returning early with [`Interrupted`] if the
/// calling thread is interrupted. The flag is consumed on early return.
pub fn sleep(duration: Duration) -> Result<(), Interrupted> {
    let state = current_state();
    let deadline = Instant::now() + duration;
    loop {
        if state.flag.swap(false, Ordering::AcqRel) {
            return Err(Interrupted);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::park_timeout(deadline - now);
    }
}
