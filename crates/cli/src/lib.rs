//! Configuration and a synthetic pipeline for exercising the stage scheduler.

pub mod config;
pub mod error;
pub mod pipeline;

pub use config::StageflowConfig;
pub use error::{ConfigError, PipelineError};
pub use pipeline::{Pipeline, RunReport, TileStage};
