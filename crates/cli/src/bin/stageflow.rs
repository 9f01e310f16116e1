//! stageflow — run a synthetic tile pipeline through the stage scheduler.
//!
//! Usage:
//!   cargo run --bin stageflow -- --config stageflow.toml
//!   cargo run --bin stageflow -- --objects 5000 --rounds 3 --json

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use stageflow_cli::{Pipeline, RunReport, StageflowConfig};

// ── CLI ─────────────────────────────────────────────────────────────

/// Push objects through a four-stage pipeline and report scheduler metrics.
#[derive(Parser, Debug)]
#[command(name = "stageflow", version, about)]
struct Cli {
    /// Path to stageflow.toml. Defaults apply if the file is missing.
    #[arg(long, env = "STAGEFLOW_CONFIG", default_value = "stageflow.toml")]
    config: PathBuf,

    /// Objects per round (overrides config).
    #[arg(long)]
    objects: Option<usize>,

    /// Number of rounds (overrides config).
    #[arg(long)]
    rounds: Option<u32>,

    /// High-volume batch threshold (overrides config).
    #[arg(long)]
    threshold: Option<usize>,

    /// Print the run report as JSON.
    #[arg(long)]
    json: bool,
}

// ── main ────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = StageflowConfig::load(Some(&cli.config))
        .with_context(|| format!("failed to load config: {}", cli.config.display()))?;
    if let Some(objects) = cli.objects {
        config.pipeline.objects = objects;
    }
    if let Some(rounds) = cli.rounds {
        config.pipeline.rounds = rounds;
    }
    if let Some(threshold) = cli.threshold {
        config.pipeline.threshold = threshold;
    }
    config.validate().context("invalid command line overrides")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log.level)),
        )
        .with_target(false)
        .init();

    info!(
        objects = config.pipeline.objects,
        rounds = config.pipeline.rounds,
        threshold = config.pipeline.threshold,
        "stageflow starting"
    );

    let pipeline = Pipeline::new(config).context("failed to build pipeline")?;
    let result = pipeline.run();
    pipeline.shutdown();
    let report = result.context("pipeline run failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    let m = &report.scheduler;
    println!(
        "{} objects x {} rounds in {} ms",
        report.objects, report.rounds, report.elapsed_ms
    );
    println!(
        "  tasks: {} created, {} executed ({} low, {} high, {} inline), {} discarded, {} dropped",
        m.tasks_created,
        m.tasks_executed,
        m.tasks_dispatched_low,
        m.tasks_dispatched_high,
        m.tasks_inline,
        m.tasks_discarded,
        m.tasks_dropped
    );
    println!(
        "  objects: {} moved, {} deconflicted, {} cancelled",
        m.objects_moved, m.objects_deconflicted, m.objects_cancelled
    );
    println!(
        "  pools: {} low jobs, {} high jobs, {} deadline interrupts",
        report.low_pool_completed, report.high_pool_completed, report.deadline_interrupts
    );
    println!("  progress reports: {}", report.progress_reports);
}
