//! Staged-object scheduler.
//!
//! Split into focused submodules:
//! - `selection`: eligibility, task creation and deconfliction under the map lock
//! - `execution`: dispatch to executors and applying a task's transition
//! - `removal`: removal, reset, and stop
//!
//! Lock order is always object index, then a holding list, then a task's
//! membership. No lock is held while a handler runs.

mod execution;
mod removal;
mod selection;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::SchedulerError;
use crate::metrics::{MetricsRecorder, SchedulerMetrics};
use crate::registration::Registration;
use crate::state::{Object, State};
use crate::task::{MoveOutcome, Task, Transition};

/// Where every tracked object is, and which task currently claims it.
pub(crate) struct ObjectIndex<O, S> {
    pub(crate) states: HashMap<O, S>,
    pub(crate) active: HashMap<O, Arc<Task<O, S>>>,
}

pub(crate) struct Inner<O, S> {
    pub(crate) index: Mutex<ObjectIndex<O, S>>,
    /// Member lists for holding states. The key set is fixed at construction.
    pub(crate) holding: HashMap<S, Mutex<IndexSet<O>>>,
    pub(crate) registrations: RwLock<HashMap<S, Registration<O, S>>>,
    pub(crate) stopped: AtomicBool,
    pub(crate) next_task_id: AtomicU64,
    pub(crate) metrics: MetricsRecorder,
}

/// Moves objects through caller-defined states, running the handler
/// registered for a state whenever a batch of objects enters it.
///
/// Cloning yields another handle to the same scheduler.
pub struct StateScheduler<O, S> {
    inner: Arc<Inner<O, S>>,
}

impl<O, S> Clone for StateScheduler<O, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<O: Object, S: State> Default for StateScheduler<O, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Object, S: State> StateScheduler<O, S> {
    /// A scheduler without holding states.
    pub fn new() -> Self {
        Self::with_holding_states(std::iter::empty())
    }

    /// A scheduler that keeps queryable member lists for `states`.
    pub fn with_holding_states(states: impl IntoIterator<Item = S>) -> Self {
        let holding: HashMap<S, Mutex<IndexSet<O>>> = states
            .into_iter()
            .map(|s| (s, Mutex::new(IndexSet::new())))
            .collect();
        debug!(holding = holding.len(), "scheduler created");
        Self {
            inner: Arc::new(Inner {
                index: Mutex::new(ObjectIndex {
                    states: HashMap::new(),
                    active: HashMap::new(),
                }),
                holding,
                registrations: RwLock::new(HashMap::new()),
                stopped: AtomicBool::new(false),
                next_task_id: AtomicU64::new(0),
                metrics: MetricsRecorder::default(),
            }),
        }
    }

    /// Bind `registration` to every state in `states`, replacing any
    /// previous binding. Invalid registrations fail here, never at dispatch.
    pub fn register_handler(
        &self,
        states: impl IntoIterator<Item = S>,
        registration: Registration<O, S>,
    ) -> Result<(), SchedulerError> {
        if self.is_stopped() {
            return Err(SchedulerError::Stopped);
        }
        registration.validate()?;

        let mut registrations = self.inner.registrations.write();
        for state in states {
            info!(
                state = ?state,
                executor = registration.high_volume.name(),
                low_volume = registration.low_volume.as_ref().map(|e| e.name()),
                threshold = registration.threshold,
                "handler registered"
            );
            registrations.insert(state, registration.clone());
        }
        Ok(())
    }

    /// Move `objects` to `to`, skipping those already there.
    pub fn move_to_state(
        &self,
        objects: impl IntoIterator<Item = O>,
        to: S,
    ) -> Result<MoveOutcome, SchedulerError> {
        self.transition(objects, Transition::to(to))
    }

    /// Move `objects` as described by `transition`.
    ///
    /// Eligible objects are grouped by their current state into one task
    /// per group. Each task is deconflicted against tasks already claiming
    /// its objects and then dispatched. The map lock is only held while
    /// selecting.
    pub fn transition(
        &self,
        objects: impl IntoIterator<Item = O>,
        transition: Transition<O, S>,
    ) -> Result<MoveOutcome, SchedulerError> {
        if self.is_stopped() {
            debug!(to = ?transition.to, "scheduler stopped, ignoring move");
            return Ok(MoveOutcome::default());
        }
        let tasks = {
            let mut index = self.inner.index.lock();
            self.inner.select_locked(&mut index, objects, &transition)
        };
        self.inner.dispatch(tasks)
    }

    /// Forget `objects` and cancel their pending transitions. No handler runs.
    /// Returns how many were tracked or claimed.
    pub fn remove_from_state(&self, objects: impl IntoIterator<Item = O>) -> usize {
        self.inner.remove_objects(objects)
    }

    /// Forget every object currently in `state` and return them.
    pub fn remove_all_from_state(&self, state: &S) -> Vec<O> {
        self.inner.remove_state(state)
    }

    /// Send objects at or beyond `to` (and untracked ones) back to `to`,
    /// cancelling their pending transitions. Objects at an earlier state
    /// are left alone.
    pub fn reset_state(
        &self,
        objects: impl IntoIterator<Item = O>,
        to: S,
    ) -> Result<MoveOutcome, SchedulerError> {
        self.inner.reset_objects(objects, to)
    }

    /// [`reset_state`](Self::reset_state) over every tracked object.
    pub fn reset_all(&self, to: S) -> Result<MoveOutcome, SchedulerError> {
        self.inner.reset_all(to)
    }

    /// Forget every object and cancel every pending task.
    pub fn remove_all(&self) {
        self.inner.clear();
    }

    /// [`remove_all`](Self::remove_all) and drop every registration.
    /// Later moves are ignored and registration fails.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Every tracked object, in no particular order.
    pub fn all_objects(&self) -> Vec<O> {
        self.inner.index.lock().states.keys().cloned().collect()
    }

    /// Current state of `object`, or `None` if it is untracked. Pending
    /// transitions are not reflected until their task runs.
    pub fn state_of(&self, object: &O) -> Option<S> {
        self.inner.index.lock().states.get(object).cloned()
    }

    /// Members of a holding state, in list order.
    pub fn objects_in_state(&self, state: &S) -> Result<Vec<O>, SchedulerError> {
        let list = self
            .inner
            .holding
            .get(state)
            .ok_or_else(|| SchedulerError::NotHoldingState(format!("{state:?}")))?;
        let members = list.lock().iter().cloned().collect();
        Ok(members)
    }

    /// Whether `state` keeps an ordered member list.
    pub fn is_holding_state(&self, state: &S) -> bool {
        self.inner.holding.contains_key(state)
    }

    /// Objects with a recorded state.
    pub fn tracked_count(&self) -> usize {
        self.inner.index.lock().states.len()
    }

    /// Objects claimed by a task that has not finished yet.
    pub fn claimed_count(&self) -> usize {
        self.inner.index.lock().active.len()
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        let tracked = self.tracked_count();
        self.inner.metrics.snapshot(tracked)
    }
}

impl<O: Object, S: State> fmt::Debug for StateScheduler<O, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let index = self.inner.index.lock();
        f.debug_struct("StateScheduler")
            .field("tracked", &index.states.len())
            .field("claimed", &index.active.len())
            .field("holding_states", &self.inner.holding.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
