//! Synthetic tile pipeline driving the scheduler end to end.
//!
//! Every object walks `Queued -> Fetching -> Decoded -> Uploaded`. The two
//! working stages sleep for the configured stage work under a deadline and
//! run on the low or high pool depending on batch size. Arrivals in
//! `Uploaded` trigger a debounced progress report.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use stageflow_exec::{
    interrupt, DeadlineExecutor, DebouncingExecutor, Executor, FixedPool, InlineExecutor,
    TimerService,
};
use stageflow_scheduler::{
    Controller, Registration, SchedulerError, SchedulerMetrics, State, StateScheduler, Transition,
};
use tracing::{debug, info, warn};

use crate::config::StageflowConfig;
use crate::error::PipelineError;

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const TERMINATION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TileStage {
    Queued,
    Fetching,
    Decoded,
    Uploaded,
}

impl TileStage {
    fn next(self) -> Option<Self> {
        match self {
            Self::Queued => Some(Self::Fetching),
            Self::Fetching => Some(Self::Decoded),
            Self::Decoded => Some(Self::Uploaded),
            Self::Uploaded => None,
        }
    }
}

impl State for TileStage {
    fn order(&self) -> i32 {
        match self {
            Self::Queued => 0,
            Self::Fetching => 1,
            Self::Decoded => 2,
            Self::Uploaded => 3,
        }
    }
}

impl fmt::Display for TileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Fetching => "fetching",
            Self::Decoded => "decoded",
            Self::Uploaded => "uploaded",
        };
        f.write_str(name)
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub rounds: u32,
    pub objects: usize,
    pub progress_reports: u64,
    pub deadline_interrupts: u64,
    pub low_pool_completed: u64,
    pub high_pool_completed: u64,
    pub scheduler: SchedulerMetrics,
}

/// Owns the executors and the scheduler for one pipeline.
pub struct Pipeline {
    config: StageflowConfig,
    timer: TimerService,
    low: FixedPool,
    high: FixedPool,
    low_deadline: DeadlineExecutor,
    high_deadline: DeadlineExecutor,
    progress: DebouncingExecutor,
    scheduler: StateScheduler<u64, TileStage>,
}

impl Pipeline {
    pub fn new(config: StageflowConfig) -> Result<Self, PipelineError> {
        let timer = TimerService::new("stageflow-timer")?;
        let low = FixedPool::new(config.pools.low.clone())?;
        let high = FixedPool::new(config.pools.high.clone())?;

        let low_deadline = DeadlineExecutor::new(
            format!("{}-deadline", low.name()),
            Arc::new(low.clone()),
            timer.clone(),
            config.deadline.clone(),
        )?;
        let high_deadline = DeadlineExecutor::new(
            format!("{}-deadline", high.name()),
            Arc::new(high.clone()),
            timer.clone(),
            config.deadline.clone(),
        )?;
        let progress = DebouncingExecutor::builder("progress", timer.clone(), Arc::new(low.clone()))
            .config(config.debounce.clone())
            .build()?;

        let scheduler = StateScheduler::with_holding_states([TileStage::Queued, TileStage::Uploaded]);

        let pipeline = Self {
            config,
            timer,
            low,
            high,
            low_deadline,
            high_deadline,
            progress,
            scheduler,
        };
        pipeline.register_stages()?;
        Ok(pipeline)
    }

    fn register_stages(&self) -> Result<(), PipelineError> {
        let work = Duration::from_millis(self.config.pipeline.stage_work_ms);
        for stage in [TileStage::Fetching, TileStage::Decoded] {
            let registration = Registration::new(
                move |objects: &[u64], state: &TileStage, ctl: &Controller<'_, u64, TileStage>| {
                    work_stage(objects, *state, ctl, work)
                },
                Arc::new(self.high_deadline.clone()),
            )
            .low_volume(Arc::new(self.low_deadline.clone()))
            .threshold(self.config.pipeline.threshold);
            self.scheduler.register_handler([stage], registration)?;
        }

        let progress = self.progress.clone();
        let uploaded = Arc::new(AtomicUsize::new(0));
        let registration = Registration::new(
            move |objects: &[u64], _: &TileStage, _: &Controller<'_, u64, TileStage>| {
                let total = uploaded.fetch_add(objects.len(), Ordering::Relaxed) + objects.len();
                if let Err(e) = progress.submit(move || info!(uploaded = total, "progress")) {
                    debug!(error = %e, "progress report dropped");
                }
            },
            Arc::new(InlineExecutor::new("uploaded")),
        );
        self.scheduler.register_handler([TileStage::Uploaded], registration)?;
        Ok(())
    }

    pub fn scheduler(&self) -> &StateScheduler<u64, TileStage> {
        &self.scheduler
    }

    /// Push every object through the pipeline once per configured round.
    pub fn run(&self) -> Result<RunReport, PipelineError> {
        if self.scheduler.is_stopped() {
            return Err(SchedulerError::Stopped.into());
        }
        let started_at = Utc::now();
        let started = Instant::now();
        let settings = &self.config.pipeline;
        let ids: Vec<u64> = (0..settings.objects as u64).collect();

        for round in 0..settings.rounds {
            if round == 0 {
                self.scheduler.move_to_state(ids.iter().copied(), TileStage::Queued)?;
            } else {
                self.scheduler.reset_all(TileStage::Queued)?;
            }

            info!(round, objects = ids.len(), "round started");
            for chunk in ids.chunks(settings.feed_batch) {
                self.scheduler.transition(
                    chunk.iter().copied(),
                    Transition::to(TileStage::Fetching).from_state(TileStage::Queued),
                )?;
            }
            self.await_stage(TileStage::Uploaded, ids.len())?;
            info!(
                round,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "round complete"
            );
        }

        let elapsed = started.elapsed();
        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            elapsed_ms: elapsed.as_millis() as u64,
            rounds: settings.rounds,
            objects: ids.len(),
            progress_reports: self.progress.executions(),
            deadline_interrupts: self.low_deadline.interrupted_count()
                + self.high_deadline.interrupted_count(),
            low_pool_completed: self.low.completed_count(),
            high_pool_completed: self.high.completed_count(),
            scheduler: self.scheduler.metrics(),
        })
    }

    /// Block until `expected` objects sit in `stage` with nothing in flight.
    fn await_stage(&self, stage: TileStage, expected: usize) -> Result<(), PipelineError> {
        let timeout = Duration::from_secs(self.config.pipeline.timeout_secs);
        let started = Instant::now();
        loop {
            let seen = self.scheduler.objects_in_state(&stage)?.len();
            if seen >= expected && self.scheduler.claimed_count() == 0 {
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(PipelineError::Timeout {
                    stage: stage.to_string(),
                    expected,
                    seen,
                    waited,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Stop the scheduler and drain every executor.
    pub fn shutdown(&self) {
        self.scheduler.stop();
        self.progress.shutdown();
        self.low_deadline.shutdown();
        self.high_deadline.shutdown();
        for pool in [&self.low, &self.high] {
            if !pool.await_termination(TERMINATION_TIMEOUT) {
                warn!(pool = pool.name(), "pool did not terminate in time");
            }
        }
        self.timer.shutdown();
        info!("pipeline shut down");
    }
}

fn work_stage(
    objects: &[u64],
    stage: TileStage,
    ctl: &Controller<'_, u64, TileStage>,
    work: Duration,
) {
    if interrupt::sleep(work).is_err() {
        warn!(%stage, objects = objects.len(), "stage work interrupted, forwarding anyway");
    }
    let Some(next) = stage.next() else {
        return;
    };
    if let Err(e) = ctl.change_state_sorted(objects.to_vec(), next, |a: &u64, b: &u64| a.cmp(b)) {
        warn!(%stage, %next, error = %e, "follow-on move failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stageflow_exec::{DeadlineConfig, PoolConfig};

    fn small_config() -> StageflowConfig {
        let mut config = StageflowConfig::default();
        config.pools.low = PoolConfig::named("t-low", 2);
        config.pools.high = PoolConfig::named("t-high", 2);
        config.debounce.min_delay_ms = 5;
        config.pipeline.objects = 50;
        config.pipeline.rounds = 2;
        config.pipeline.threshold = 8;
        config.pipeline.feed_batch = 10;
        config.pipeline.stage_work_ms = 1;
        config.pipeline.timeout_secs = 20;
        config
    }

    #[test]
    fn stage_orders_follow_the_pipeline() {
        let mut stage = TileStage::Queued;
        while let Some(next) = stage.next() {
            assert!(next.order() > stage.order());
            stage = next;
        }
        assert_eq!(stage, TileStage::Uploaded);
    }

    #[test]
    fn every_round_ends_with_all_objects_uploaded() {
        let pipeline = Pipeline::new(small_config()).unwrap();
        let report = pipeline.run().unwrap();

        assert_eq!(report.rounds, 2);
        assert_eq!(report.objects, 50);
        // queued, fetching, decoded, uploaded for each object in each round
        assert_eq!(report.scheduler.objects_moved, 400);
        assert_eq!(report.deadline_interrupts, 0);
        assert!(report.low_pool_completed + report.high_pool_completed > 0);

        let uploaded = pipeline.scheduler().objects_in_state(&TileStage::Uploaded).unwrap();
        assert_eq!(uploaded, (0..50).collect::<Vec<u64>>());
        assert!(pipeline
            .scheduler()
            .objects_in_state(&TileStage::Queued)
            .unwrap()
            .is_empty());
        pipeline.shutdown();
    }

    #[test]
    fn overdue_stage_work_is_interrupted_and_forwarded() {
        let mut config = small_config();
        config.deadline = DeadlineConfig::new(Duration::from_millis(20), Duration::from_millis(5));
        config.pipeline.objects = 4;
        config.pipeline.rounds = 1;
        config.pipeline.threshold = 1;
        config.pipeline.feed_batch = 4;
        config.pipeline.stage_work_ms = 200;

        let pipeline = Pipeline::new(config).unwrap();
        let report = pipeline.run().unwrap();

        assert!(report.deadline_interrupts > 0);
        assert_eq!(report.scheduler.objects_moved, 16);
        assert_eq!(
            pipeline.scheduler().objects_in_state(&TileStage::Uploaded).unwrap().len(),
            4
        );
        pipeline.shutdown();
    }

    #[test]
    fn run_after_shutdown_is_refused() {
        let pipeline = Pipeline::new(small_config()).unwrap();
        pipeline.shutdown();
        assert!(pipeline.scheduler().is_stopped());
        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, PipelineError::Scheduler(SchedulerError::Stopped)));
    }
}
