use stageflow_exec::ExecError;
use thiserror::Error;

/// Errors raised by the staged-object scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid handler registration: {0}")]
    Config(String),

    #[error("scheduler has been stopped")]
    Stopped,

    #[error("state {0} is not a holding state")]
    NotHoldingState(String),

    #[error("executor for state {state} rejected a task of {objects} objects: {source}")]
    Rejected {
        state: String,
        objects: usize,
        #[source]
        source: ExecError,
    },
}
