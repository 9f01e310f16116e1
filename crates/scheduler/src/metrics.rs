use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::registration::Dispatch;

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerMetrics {
    /// Tasks created by move requests, before deconfliction.
    pub tasks_created: u64,
    pub tasks_dispatched_low: u64,
    pub tasks_dispatched_high: u64,
    /// Tasks for states without a handler, applied on the calling thread.
    pub tasks_inline: u64,
    /// Tasks that applied their transition.
    pub tasks_executed: u64,
    /// Tasks that lost every object before running.
    pub tasks_discarded: u64,
    /// Tasks whose job an executor dropped without running it, refused
    /// dispatches included. Their claims were released.
    pub tasks_dropped: u64,
    /// Objects whose state was updated by a task.
    pub objects_moved: u64,
    /// Objects that changed hands during deconfliction: objects a new task
    /// lost to an in-flight task with an equal or lower-order destination,
    /// plus objects a new lower-order task took from an in-flight one.
    pub objects_deconflicted: u64,
    /// Objects dropped from a pending task by removal or reset.
    pub objects_cancelled: u64,
    pub rejected_dispatches: u64,
    /// Handlers that panicked. The panic itself belongs to the executor.
    pub handler_panics: u64,
    /// Objects currently tracked.
    pub tracked_objects: usize,
}

#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    tasks_created: AtomicU64,
    tasks_dispatched_low: AtomicU64,
    tasks_dispatched_high: AtomicU64,
    tasks_inline: AtomicU64,
    tasks_executed: AtomicU64,
    tasks_discarded: AtomicU64,
    tasks_dropped: AtomicU64,
    objects_moved: AtomicU64,
    objects_deconflicted: AtomicU64,
    objects_cancelled: AtomicU64,
    rejected_dispatches: AtomicU64,
    handler_panics: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl MetricsRecorder {
    pub(crate) fn task_created(&self) {
        bump(&self.tasks_created, 1);
    }

    pub(crate) fn dispatched(&self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Low => bump(&self.tasks_dispatched_low, 1),
            Dispatch::High => bump(&self.tasks_dispatched_high, 1),
            Dispatch::Inline => bump(&self.tasks_inline, 1),
        }
    }

    pub(crate) fn executed(&self, objects: usize) {
        bump(&self.tasks_executed, 1);
        bump(&self.objects_moved, objects as u64);
    }

    pub(crate) fn discarded(&self) {
        bump(&self.tasks_discarded, 1);
    }

    pub(crate) fn dropped(&self) {
        bump(&self.tasks_dropped, 1);
    }

    pub(crate) fn deconflicted(&self, objects: usize) {
        bump(&self.objects_deconflicted, objects as u64);
    }

    pub(crate) fn cancelled(&self, objects: usize) {
        bump(&self.objects_cancelled, objects as u64);
    }

    pub(crate) fn rejected(&self) {
        bump(&self.rejected_dispatches, 1);
    }

    pub(crate) fn handler_panicked(&self) {
        bump(&self.handler_panics, 1);
    }

    pub(crate) fn snapshot(&self, tracked_objects: usize) -> SchedulerMetrics {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        SchedulerMetrics {
            tasks_created: load(&self.tasks_created),
            tasks_dispatched_low: load(&self.tasks_dispatched_low),
            tasks_dispatched_high: load(&self.tasks_dispatched_high),
            tasks_inline: load(&self.tasks_inline),
            tasks_executed: load(&self.tasks_executed),
            tasks_discarded: load(&self.tasks_discarded),
            tasks_dropped: load(&self.tasks_dropped),
            objects_moved: load(&self.objects_moved),
            objects_deconflicted: load(&self.objects_deconflicted),
            objects_cancelled: load(&self.objects_cancelled),
            rejected_dispatches: load(&self.rejected_dispatches),
            handler_panics: load(&self.handler_panics),
            tracked_objects,
        }
    }
}
