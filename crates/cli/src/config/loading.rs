use std::path::Path;

use tracing::debug;

use crate::error::ConfigError;

use super::types::StageflowConfig;

impl StageflowConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Load from `path` if it exists, otherwise start from defaults.
    /// Environment overrides and validation apply either way.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) if p.exists() => {
                debug!(path = %p.display(), "loading config");
                Self::from_file(p)
            }
            other => {
                if let Some(p) = other {
                    debug!(path = %p.display(), "config file not found, using defaults");
                }
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `STAGEFLOW_SECTION_KEY` overrides `section.key`.
    /// Examples:
    /// - `STAGEFLOW_LOG_LEVEL` -> `log.level`
    /// - `STAGEFLOW_POOLS_HIGH_WORKERS` -> `pools.high.workers`
    /// - `STAGEFLOW_PIPELINE_OBJECTS` -> `pipeline.objects`
    /// - `STAGEFLOW_DEADLINE_LIMIT_MS` -> `deadline.limit_ms`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse().ok())
        }

        if let Some(v) = lookup("STAGEFLOW_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Some(n) = parsed(&lookup, "STAGEFLOW_POOLS_LOW_WORKERS") {
            self.pools.low.workers = n;
        }
        if let Some(n) = parsed(&lookup, "STAGEFLOW_POOLS_HIGH_WORKERS") {
            self.pools.high.workers = n;
        }
        if let Some(ms) = parsed(&lookup, "STAGEFLOW_DEBOUNCE_MIN_DELAY_MS") {
            self.debounce.min_delay_ms = ms;
        }
        if let Some(ms) = parsed(&lookup, "STAGEFLOW_DEBOUNCE_MAX_DELAY_MS") {
            self.debounce.max_delay_ms = Some(ms);
        }
        if let Some(ms) = parsed(&lookup, "STAGEFLOW_DEADLINE_LIMIT_MS") {
            self.deadline.limit_ms = ms;
        }
        if let Some(ms) = parsed(&lookup, "STAGEFLOW_DEADLINE_POLL_INTERVAL_MS") {
            self.deadline.poll_interval_ms = ms;
        }
        if let Some(n) = parsed(&lookup, "STAGEFLOW_PIPELINE_OBJECTS") {
            self.pipeline.objects = n;
        }
        if let Some(n) = parsed(&lookup, "STAGEFLOW_PIPELINE_ROUNDS") {
            self.pipeline.rounds = n;
        }
        if let Some(n) = parsed(&lookup, "STAGEFLOW_PIPELINE_THRESHOLD") {
            self.pipeline.threshold = n;
        }
        if let Some(n) = parsed(&lookup, "STAGEFLOW_PIPELINE_FEED_BATCH") {
            self.pipeline.feed_batch = n;
        }
        if let Some(ms) = parsed(&lookup, "STAGEFLOW_PIPELINE_STAGE_WORK_MS") {
            self.pipeline.stage_work_ms = ms;
        }
        if let Some(secs) = parsed(&lookup, "STAGEFLOW_PIPELINE_TIMEOUT_SECS") {
            self.pipeline.timeout_secs = secs;
        }
    }
}
