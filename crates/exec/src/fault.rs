//! Routing of panics raised by jobs.
//!
//! Every component that runs caller-supplied code catches unwinds at its
//! boundary and hands them to a [`FaultHandler`] instead of letting the
//! panic tear down a worker or timer thread.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

/// A panic captured at a job boundary.
#[derive(Debug, Clone)]
pub struct Fault {
    /// Name of the pool, timer, or executor that ran the job.
    pub source: String,
    /// Panic payload rendered as text.
    pub message: String,
}

impl Fault {
    pub fn new(source: impl Into<String>, payload: &(dyn Any + Send)) -> Self {
        Self {
            source: source.into(),
            message: panic_message(payload),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job on '{}' panicked: {}", self.source, self.message)
    }
}

/// Callback invoked for every captured panic.
pub type FaultHandler = Arc<dyn Fn(&Fault) + Send + Sync>;

/// Handler that logs the fault at error level.
pub fn default_fault_handler() -> FaultHandler {
    Arc::new(|fault: &Fault| {
        error!(source = %fault.source, message = %fault.message, "uncaught panic in job");
    })
}

/// Run `f`, routing a panic to `handler`. Returns `true` if `f` completed.
pub fn run_guarded<F>(source: &str, handler: &FaultHandler, f: F) -> bool
where
    F: FnOnce(),
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            handler(&Fault::new(source, payload.as_ref()));
            false
        }
    }
}

/// Render a panic payload. `panic!` produces `&str` or `String`.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
