use crate::error::ConfigError;

use super::types::StageflowConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl StageflowConfig {
    /// Validate the config after parsing and overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_log_level()?;
        self.validate_pipeline()?;
        self.debounce
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.deadline
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    fn validate_log_level(&self) -> Result<(), ConfigError> {
        let level = self.log.level.to_ascii_lowercase();
        if LOG_LEVELS.contains(&level.as_str()) {
            Ok(())
        } else {
            Err(ConfigError::Invalid(format!(
                "invalid log level '{}', expected one of {}",
                self.log.level,
                LOG_LEVELS.join(", ")
            )))
        }
    }

    fn validate_pipeline(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if p.objects == 0 {
            return Err(ConfigError::Invalid("pipeline objects must be > 0".into()));
        }
        if p.rounds == 0 {
            return Err(ConfigError::Invalid("pipeline rounds must be > 0".into()));
        }
        if p.feed_batch == 0 {
            return Err(ConfigError::Invalid("pipeline feed_batch must be > 0".into()));
        }
        if p.timeout_secs == 0 {
            return Err(ConfigError::Invalid("pipeline timeout_secs must be > 0".into()));
        }
        Ok(())
    }
}
