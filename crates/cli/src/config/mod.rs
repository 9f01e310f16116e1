//! `stageflow.toml` configuration.
//!
//! Split into focused submodules:
//! - `types`: the serde structs and their defaults
//! - `loading`: TOML parsing, file loading, and environment overrides
//! - `validation`: sanity checks run after every load

mod loading;
mod types;
mod validation;
#[cfg(test)]
mod tests;

pub use types::{LogConfig, PipelineConfig, PoolsConfig, StageflowConfig};
