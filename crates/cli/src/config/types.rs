use serde::{Deserialize, Serialize};
use stageflow_exec::{DeadlineConfig, DebounceConfig, PoolConfig};

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration for the `stageflow` binary.
///
/// Parsed from `stageflow.toml` with support for environment variable
/// overrides. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageflowConfig {
    #[serde(default)]
    pub log: LogConfig,

    /// Low- and high-volume worker pools.
    #[serde(default)]
    pub pools: PoolsConfig,

    /// Debounce window for progress reporting.
    #[serde(default)]
    pub debounce: DebounceConfig,

    /// Time budget for a single stage batch.
    #[serde(default)]
    pub deadline: DeadlineConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

// ── Section configs ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolsConfig {
    /// Runs batches smaller than the pipeline threshold.
    #[serde(default = "default_low_pool")]
    pub low: PoolConfig,

    /// Runs batches at or above the threshold.
    #[serde(default = "default_high_pool")]
    pub high: PoolConfig,
}

fn default_low_pool() -> PoolConfig {
    PoolConfig::named("low", 2)
}

fn default_high_pool() -> PoolConfig {
    PoolConfig::named("high", 0)
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            low: default_low_pool(),
            high: default_high_pool(),
        }
    }
}

/// Shape of the synthetic workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Objects pushed through the pipeline each round.
    #[serde(default = "default_objects")]
    pub objects: usize,

    #[serde(default = "default_rounds")]
    pub rounds: u32,

    /// Batch size at which a stage switches to the high-volume pool.
    #[serde(default = "default_threshold")]
    pub threshold: usize,

    /// Objects released from the queue per move request.
    #[serde(default = "default_feed_batch")]
    pub feed_batch: usize,

    /// Simulated work per batch in each working stage.
    #[serde(default = "default_stage_work_ms")]
    pub stage_work_ms: u64,

    /// Give up on a round after this long.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_objects() -> usize {
    1_000
}

fn default_rounds() -> u32 {
    1
}

fn default_threshold() -> usize {
    32
}

fn default_feed_batch() -> usize {
    64
}

fn default_stage_work_ms() -> u64 {
    2
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            objects: default_objects(),
            rounds: default_rounds(),
            threshold: default_threshold(),
            feed_batch: default_feed_batch(),
            stage_work_ms: default_stage_work_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}
