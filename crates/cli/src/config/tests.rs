use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use stageflow_exec::QueueOrdering;

use super::StageflowConfig;
use crate::error::ConfigError;

#[test]
fn defaults_are_valid() {
    let cfg = StageflowConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.log.level, "info");
    assert_eq!(cfg.pools.low.name, "low");
    assert_eq!(cfg.pools.low.workers, 2);
    assert_eq!(cfg.pools.high.name, "high");
    assert_eq!(cfg.pipeline.objects, 1_000);
    assert_eq!(cfg.pipeline.threshold, 32);
}

#[test]
fn parse_empty_toml_uses_defaults() {
    let cfg = StageflowConfig::from_toml("").unwrap();
    assert_eq!(cfg.pipeline.rounds, 1);
    assert_eq!(cfg.debounce.min_delay_ms, 100);
    assert_eq!(cfg.deadline.limit_ms, 30_000);
}

#[test]
fn parse_full_toml() {
    let toml = r#"
[log]
level = "debug"

[pools.low]
name = "small"
workers = 1

[pools.high]
name = "bulk"
workers = 6
ordering = "priority"
suppress_rejections = true

[debounce]
min_delay_ms = 20
max_delay_ms = 200

[deadline]
limit_ms = 500
poll_interval_ms = 50

[pipeline]
objects = 64
rounds = 3
threshold = 8
feed_batch = 16
stage_work_ms = 0
"#;
    let cfg = StageflowConfig::from_toml(toml).unwrap();
    assert_eq!(cfg.log.level, "debug");
    assert_eq!(cfg.pools.low.name, "small");
    assert_eq!(cfg.pools.high.workers, 6);
    assert_eq!(cfg.pools.high.ordering, QueueOrdering::Priority);
    assert!(cfg.pools.high.suppress_rejections);
    assert_eq!(cfg.debounce.max_delay_ms, Some(200));
    assert_eq!(cfg.deadline.poll_interval_ms, 50);
    assert_eq!(cfg.pipeline.objects, 64);
    assert_eq!(cfg.pipeline.rounds, 3);
    assert_eq!(cfg.pipeline.feed_batch, 16);
    assert_eq!(cfg.pipeline.timeout_secs, 60, "unset key keeps its default");
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let err = StageflowConfig::from_toml("[pipeline\nobjects = 1").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn invalid_sections_are_rejected() {
    let cases = [
        "[log]\nlevel = \"loud\"",
        "[pipeline]\nobjects = 0",
        "[pipeline]\nrounds = 0",
        "[debounce]\nmin_delay_ms = 100\nmax_delay_ms = 10",
        "[deadline]\nlimit_ms = 0",
    ];
    for toml in cases {
        let err = StageflowConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{toml}: {err}");
    }
}

#[test]
fn overrides_replace_file_values() {
    let mut cfg = StageflowConfig::default();
    let env: HashMap<&str, &str> = [
        ("STAGEFLOW_LOG_LEVEL", "warn"),
        ("STAGEFLOW_POOLS_HIGH_WORKERS", "3"),
        ("STAGEFLOW_DEBOUNCE_MAX_DELAY_MS", "750"),
        ("STAGEFLOW_PIPELINE_OBJECTS", "12"),
        ("STAGEFLOW_PIPELINE_THRESHOLD", "not-a-number"),
    ]
    .into_iter()
    .collect();

    cfg.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

    assert_eq!(cfg.log.level, "warn");
    assert_eq!(cfg.pools.high.workers, 3);
    assert_eq!(cfg.debounce.max_delay_ms, Some(750));
    assert_eq!(cfg.pipeline.objects, 12);
    assert_eq!(cfg.pipeline.threshold, 32, "unparseable override is ignored");
}

#[test]
fn load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[pipeline]\nobjects = 5\nrounds = 2").unwrap();

    let cfg = StageflowConfig::load(Some(file.path())).unwrap();
    assert_eq!(cfg.pipeline.objects, 5);
    assert_eq!(cfg.pipeline.rounds, 2);

    let same = StageflowConfig::from_file(file.path()).unwrap();
    assert_eq!(same.pipeline.objects, 5);
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("stageflow.toml");
    let cfg = StageflowConfig::load(Some(&missing)).unwrap();
    assert_eq!(cfg.pipeline.objects, 1_000);

    let cfg = StageflowConfig::load(None::<&Path>).unwrap();
    assert_eq!(cfg.pipeline.rounds, 1);
}

#[test]
fn unreadable_path_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = StageflowConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}
