use std::cmp::Ordering;
use std::sync::Arc;

use crate::engine::Inner;
use crate::error::SchedulerError;
use crate::state::{Object, State};
use crate::task::{MoveOutcome, Task};

/// Handed to a handler so it can move its batch onward.
///
/// Only valid for the duration of the handler call. Moves only apply to
/// objects that still belong to the handler's task: anything removed or
/// claimed by a competing transition in the meantime is skipped.
pub struct Controller<'a, O, S> {
    inner: &'a Arc<Inner<O, S>>,
    task: &'a Arc<Task<O, S>>,
}

impl<'a, O: Object, S: State> Controller<'a, O, S> {
    pub(crate) fn new(inner: &'a Arc<Inner<O, S>>, task: &'a Arc<Task<O, S>>) -> Self {
        Self { inner, task }
    }

    /// The state this batch just entered.
    pub fn state(&self) -> &S {
        &self.task.to
    }

    /// Objects still belonging to this batch.
    pub fn objects(&self) -> Vec<O> {
        self.task.snapshot()
    }

    pub fn owns(&self, object: &O) -> bool {
        self.task.contains(object)
    }

    pub fn change_state(
        &self,
        objects: impl IntoIterator<Item = O>,
        to: S,
    ) -> Result<MoveOutcome, SchedulerError> {
        self.inner.follow_on(self.task, objects, to, None)
    }

    /// Like [`change_state`](Self::change_state), keeping the destination's
    /// holding list sorted by `compare`.
    pub fn change_state_sorted<F>(
        &self,
        objects: impl IntoIterator<Item = O>,
        to: S,
        compare: F,
    ) -> Result<MoveOutcome, SchedulerError>
    where
        F: Fn(&O, &O) -> Ordering + Send + Sync + 'static,
    {
        self.inner
            .follow_on(self.task, objects, to, Some(Arc::new(compare)))
    }
}
