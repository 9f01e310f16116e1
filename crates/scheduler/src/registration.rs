use std::fmt;
use std::sync::Arc;

use stageflow_exec::Executor;

use crate::controller::Controller;
use crate::error::SchedulerError;

/// Callback invoked with a batch of objects that just entered a state.
pub type Handler<O, S> = Arc<dyn Fn(&[O], &S, &Controller<'_, O, S>) + Send + Sync>;

/// Which executor of a registration a task was sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Low,
    High,
    /// No handler registered: the transition ran on the calling thread.
    Inline,
}

impl fmt::Display for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dispatch::Low => "low",
            Dispatch::High => "high",
            Dispatch::Inline => "inline",
        })
    }
}

/// Handler binding for one or more destination states.
///
/// Tasks with at least `threshold` objects go to the high-volume executor,
/// smaller ones to the low-volume executor. A threshold of zero sends
/// everything to the high-volume executor.
pub struct Registration<O, S> {
    pub(crate) handler: Handler<O, S>,
    pub(crate) high_volume: Arc<dyn Executor>,
    pub(crate) low_volume: Option<Arc<dyn Executor>>,
    pub(crate) threshold: usize,
}

impl<O, S> Clone for Registration<O, S> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            high_volume: Arc::clone(&self.high_volume),
            low_volume: self.low_volume.clone(),
            threshold: self.threshold,
        }
    }
}

impl<O, S> Registration<O, S> {
    /// Bind `handler`, running every task on `executor`.
    pub fn new<F>(handler: F, executor: Arc<dyn Executor>) -> Self
    where
        F: Fn(&[O], &S, &Controller<'_, O, S>) + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            high_volume: executor,
            low_volume: None,
            threshold: 0,
        }
    }

    /// Executor for tasks smaller than the threshold.
    pub fn low_volume(mut self, executor: Arc<dyn Executor>) -> Self {
        self.low_volume = Some(executor);
        self
    }

    /// Tasks with at least `objects` objects go to the high-volume executor.
    /// Zero sends everything there.
    pub fn threshold(mut self, objects: usize) -> Self {
        self.threshold = objects;
        self
    }

    /// A non-zero threshold needs a low-volume executor to route to.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.threshold > 0 && self.low_volume.is_none() {
            return Err(SchedulerError::Config(format!(
                "threshold {} requires a low-volume executor",
                self.threshold
            )));
        }
        Ok(())
    }

    pub(crate) fn select(&self, objects: usize) -> (Dispatch, &Arc<dyn Executor>) {
        match &self.low_volume {
            Some(low) if objects < self.threshold => (Dispatch::Low, low),
            _ => (Dispatch::High, &self.high_volume),
        }
    }
}
