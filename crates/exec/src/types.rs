use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Order in which a pool's queued jobs are dequeued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueOrdering {
    /// Submission order; priorities only matter for cancellation.
    #[default]
    Fifo,
    /// Lowest priority value first, submission order among equals.
    Priority,
}

/// Fixed worker pool configuration, typically parsed from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool name, used as the worker thread name prefix.
    #[serde(default = "default_pool_name")]
    pub name: String,
    /// Number of worker threads. 0 = available parallelism.
    #[serde(default)]
    pub workers: usize,
    /// Silently discard submissions after shutdown instead of rejecting them.
    #[serde(default)]
    pub suppress_rejections: bool,
    /// Queue discipline.
    #[serde(default)]
    pub ordering: QueueOrdering,
}

fn default_pool_name() -> String { "pool".to_string() }

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: default_pool_name(),
            workers: 0,
            suppress_rejections: false,
            ordering: QueueOrdering::Fifo,
        }
    }
}

impl PoolConfig {
    /// Config for a named pool with a fixed worker count.
    pub fn named(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            workers,
            ..Self::default()
        }
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.workers
        }
    }
}

/// Debouncing executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// Quiet period that must pass without a new submission.
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,
    /// Upper bound on latency under continuous resubmission. None = unbounded.
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

fn default_min_delay() -> u64 { 100 }

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay(),
            max_delay_ms: None,
        }
    }
}

impl DebounceConfig {
    /// Build from durations, truncated to whole milliseconds.
    pub fn new(min_delay: Duration, max_delay: Option<Duration>) -> Self {
        Self {
            min_delay_ms: min_delay.as_millis() as u64,
            max_delay_ms: max_delay.map(|d| d.as_millis() as u64),
        }
    }

    /// Quiet period that must pass after the last submission.
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    /// Longest a burst can defer its job, if bounded.
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ExecError> {
        match self.max_delay_ms {
            Some(max) if max < self.min_delay_ms => Err(ExecError::Config(format!(
                "debounce max_delay_ms ({max}) is shorter than min_delay_ms ({})",
                self.min_delay_ms
            ))),
            _ => Ok(()),
        }
    }
}

/// Deadline-enforcing executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineConfig {
    /// Time budget for a single job.
    #[serde(default = "default_limit")]
    pub limit_ms: u64,
    /// How often the guard scans running jobs.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_limit() -> u64 { 30_000 }
fn default_poll_interval() -> u64 { 250 }

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            limit_ms: default_limit(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl DeadlineConfig {
    pub fn new(limit: Duration, poll_interval: Duration) -> Self {
        Self {
            limit_ms: limit.as_millis() as u64,
            poll_interval_ms: poll_interval.as_millis() as u64,
        }
    }

    pub fn limit(&self) -> Duration {
        Duration::from_millis(self.limit_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ExecError> {
        if self.limit_ms == 0 {
            return Err(ExecError::Config("deadline limit_ms must be > 0".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ExecError::Config("deadline poll_interval_ms must be > 0".into()));
        }
        Ok(())
    }
}
