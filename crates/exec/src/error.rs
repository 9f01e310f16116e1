use thiserror::Error;

/// Errors raised by executors, queues, and the timer service.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("executor '{executor}' rejected the job: shut down")]
    Rejected { executor: String },

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("config error: {0}")]
    Config(String),

    #[error("timer service has been shut down")]
    TimerShutdown,

    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl ExecError {
    pub(crate) fn rejected(executor: &str) -> Self {
        Self::Rejected {
            executor: executor.to_string(),
        }
    }

    /// Whether this error is a shutdown rejection.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::TimerShutdown)
    }
}
