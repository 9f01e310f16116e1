use std::time::Duration;

use stageflow_exec::ExecError;
use stageflow_scheduler::SchedulerError;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Invalid(String),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building or running the demo pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("executor error: {0}")]
    Exec(#[from] ExecError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("timed out after {waited:?} waiting for {expected} objects in {stage}, saw {seen}")]
    Timeout {
        stage: String,
        expected: usize,
        seen: usize,
        waited: Duration,
    },
}
