use std::time::Duration;

use crate::error::ExecError;

/// A unit of work handed to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs jobs.
///
/// Only [`execute`](Executor::execute) is mandatory. The optional
/// operations default to [`ExecError::Unsupported`] so that wrappers can
/// forward them and callers learn immediately when the underlying
/// executor cannot honour them.
pub trait Executor: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Run `job` at some point in the future.
    fn execute(&self, job: Job) -> Result<(), ExecError>;

    /// Run `job` ordered by `priority` (lower runs first).
    fn execute_prioritized(&self, priority: i64, job: Job) -> Result<(), ExecError> {
        let _ = (priority, job);
        Err(ExecError::Unsupported("prioritized execution"))
    }

    /// Run `job` once `delay` has elapsed.
    fn schedule(&self, delay: Duration, job: Job) -> Result<(), ExecError> {
        let _ = (delay, job);
        Err(ExecError::Unsupported("delayed scheduling"))
    }

    /// Stop accepting new jobs. Already accepted work still runs.
    fn shutdown(&self) {}

    fn is_shutdown(&self) -> bool {
        false
    }

    /// Shut down and no accepted job is still running or queued.
    fn is_terminated(&self) -> bool {
        self.is_shutdown()
    }
}

/// Runs every job synchronously on the submitting thread.
#[derive(Debug, Clone)]
pub struct InlineExecutor {
    name: String,
}

impl InlineExecutor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for InlineExecutor {
    fn default() -> Self {
        Self::new("inline")
    }
}

impl Executor for InlineExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, job: Job) -> Result<(), ExecError> {
        job();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn inline_runs_on_caller_thread() {
        let caller = std::thread::current().id();
        let ran_on = Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&ran_on);
        InlineExecutor::default()
            .execute(Box::new(move || *slot.lock() = Some(std::thread::current().id())))
            .unwrap();
        assert_eq!(*ran_on.lock(), Some(caller));
    }

    #[test]
    fn optional_operations_are_unsupported_by_default() {
        let exec = InlineExecutor::default();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let err = exec
            .schedule(Duration::from_millis(1), Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap_err();
        assert!(matches!(err, ExecError::Unsupported(_)));
        assert!(matches!(
            exec.execute_prioritized(1, Box::new(|| {})),
            Err(ExecError::Unsupported(_))
        ));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
