use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::SchedulerError;
use crate::state::{Object, State};
use crate::task::{MoveOutcome, Task, Transition};

use super::{Inner, ObjectIndex};

impl<O: Object, S: State> Inner<O, S> {
    /// Take `object` away from whichever task claims it.
    fn cancel_claim_locked(&self, index: &mut ObjectIndex<O, S>, object: &O) -> bool {
        match index.active.remove(object) {
            Some(task) if task.remove(object) => {
                self.metrics.cancelled(1);
                true
            }
            _ => false,
        }
    }

    fn forget_locked(&self, index: &mut ObjectIndex<O, S>, object: &O) -> bool {
        let tracked = match index.states.remove(object) {
            Some(state) => {
                if let Some(list) = self.holding.get(&state) {
                    list.lock().shift_remove(object);
                }
                true
            }
            None => false,
        };
        let claimed = self.cancel_claim_locked(index, object);
        tracked || claimed
    }

    pub(crate) fn remove_objects(&self, objects: impl IntoIterator<Item = O>) -> usize {
        let mut index = self.index.lock();
        let removed = objects
            .into_iter()
            .filter(|object| self.forget_locked(&mut index, object))
            .count();
        debug!(removed, "objects removed");
        removed
    }

    pub(crate) fn remove_state(&self, state: &S) -> Vec<O> {
        let mut index = self.index.lock();
        let members: Vec<O> = index
            .states
            .iter()
            .filter(|(_, s)| *s == state)
            .map(|(object, _)| object.clone())
            .collect();
        for object in &members {
            self.forget_locked(&mut index, object);
        }
        debug!(state = ?state, removed = members.len(), "state emptied");
        members
    }

    pub(crate) fn reset_objects(
        self: &Arc<Self>,
        objects: impl IntoIterator<Item = O>,
        to: S,
    ) -> Result<MoveOutcome, SchedulerError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(MoveOutcome::default());
        }
        let tasks = {
            let mut index = self.index.lock();
            let order = to.order();
            let qualifying: Vec<O> = objects
                .into_iter()
                .filter(|object| {
                    index
                        .states
                        .get(object)
                        .map_or(true, |current| current.order() >= order)
                })
                .collect();
            self.reset_locked(&mut index, qualifying, to)
        };
        self.dispatch(tasks)
    }

    pub(crate) fn reset_all(self: &Arc<Self>, to: S) -> Result<MoveOutcome, SchedulerError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(MoveOutcome::default());
        }
        let tasks = {
            let mut index = self.index.lock();
            let order = to.order();
            let qualifying: Vec<O> = index
                .states
                .iter()
                .filter(|(_, current)| current.order() >= order)
                .map(|(object, _)| object.clone())
                .collect();
            self.reset_locked(&mut index, qualifying, to)
        };
        self.dispatch(tasks)
    }

    fn reset_locked(
        &self,
        index: &mut ObjectIndex<O, S>,
        objects: Vec<O>,
        to: S,
    ) -> Vec<Arc<Task<O, S>>> {
        for object in &objects {
            self.cancel_claim_locked(index, object);
        }
        debug!(to = ?to, objects = objects.len(), "resetting objects");
        self.select_locked(index, objects, &Transition::to(to).forced())
    }

    pub(crate) fn clear(&self) {
        let mut index = self.index.lock();
        let tracked = index.states.len();
        index.states.clear();
        for list in self.holding.values() {
            list.lock().clear();
        }
        let cancelled = index
            .active
            .drain()
            .filter(|(object, task)| task.remove(object))
            .count();
        self.metrics.cancelled(cancelled);
        info!(tracked, cancelled, "scheduler cleared");
    }

    pub(crate) fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registrations.write().clear();
        self.clear();
        info!("scheduler stopped");
    }
}
