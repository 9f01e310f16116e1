use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use tracing::{debug, trace, warn};

use crate::controller::Controller;
use crate::error::SchedulerError;
use crate::registration::Dispatch;
use crate::state::{Object, State};
use crate::task::{MoveOutcome, Task};

use super::Inner;

/// Releases a task's remaining claims once its handler is done, even if
/// the handler panics. Objects the handler already moved on belong to
/// newer tasks and are left alone.
struct TaskCleanup<'a, O: Object, S: State> {
    inner: &'a Inner<O, S>,
    task: &'a Arc<Task<O, S>>,
}

impl<O: Object, S: State> Drop for TaskCleanup<'_, O, S> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.inner.metrics.handler_panicked();
            warn!(task = self.task.id, state = ?self.task.to, "handler panicked, releasing task");
        }
        let mut index = self.inner.index.lock();
        for object in self.task.snapshot() {
            if index
                .active
                .get(&object)
                .is_some_and(|owner| Arc::ptr_eq(owner, self.task))
            {
                index.active.remove(&object);
            }
        }
    }
}

/// A task boxed into an executor job. If the executor drops the job
/// without running it, the task's claims are released so its objects can
/// be moved again.
struct QueuedTask<O: Object, S: State> {
    inner: Arc<Inner<O, S>>,
    task: Option<Arc<Task<O, S>>>,
}

impl<O: Object, S: State> QueuedTask<O, S> {
    fn run(mut self) {
        if let Some(task) = self.task.take() {
            self.inner.run_task(&task);
        }
    }
}

impl<O: Object, S: State> Drop for QueuedTask<O, S> {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let released = self.inner.release(&task);
        self.inner.metrics.dropped();
        debug!(task = task.id, to = ?task.to, released, "task dropped without running");
    }
}

impl<O: Object, S: State> Inner<O, S> {
    /// Dispatch every task. All tasks are attempted; the first rejection
    /// is returned.
    pub(crate) fn dispatch(
        self: &Arc<Self>,
        tasks: Vec<Arc<Task<O, S>>>,
    ) -> Result<MoveOutcome, SchedulerError> {
        let mut outcome = MoveOutcome::default();
        let mut first_error = None;

        for task in tasks {
            if self.stopped.load(Ordering::SeqCst) {
                self.release(&task);
                continue;
            }
            let objects = task.len();
            match self.dispatch_one(task) {
                Ok(()) => {
                    outcome.tasks += 1;
                    outcome.objects += objects;
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    fn dispatch_one(self: &Arc<Self>, task: Arc<Task<O, S>>) -> Result<(), SchedulerError> {
        let registration = self.registrations.read().get(&task.to).cloned();
        let Some(registration) = registration else {
            debug!(task = task.id, to = ?task.to, "no handler registered, applying inline");
            self.metrics.dispatched(Dispatch::Inline);
            self.run_task(&task);
            return Ok(());
        };

        let objects = task.len();
        let (dispatch, executor) = registration.select(objects);
        debug!(
            task = task.id,
            from = ?task.from,
            to = ?task.to,
            objects,
            executor = executor.name(),
            %dispatch,
            "dispatching task"
        );

        let queued = QueuedTask {
            inner: Arc::clone(self),
            task: Some(Arc::clone(&task)),
        };
        match executor.execute(Box::new(move || queued.run())) {
            Ok(()) => {
                self.metrics.dispatched(dispatch);
                Ok(())
            }
            Err(source) => {
                // The refused job normally released the claims when dropped.
                self.release(&task);
                self.metrics.rejected();
                warn!(
                    task = task.id,
                    to = ?task.to,
                    executor = executor.name(),
                    objects,
                    error = %source,
                    "executor rejected task"
                );
                Err(SchedulerError::Rejected {
                    state: format!("{:?}", task.to),
                    objects,
                    source,
                })
            }
        }
    }

    /// Drop every claim `task` still holds. Returns how many it had.
    fn release(&self, task: &Arc<Task<O, S>>) -> usize {
        let mut index = self.index.lock();
        let members = task.snapshot();
        for object in &members {
            task.remove(object);
            if index
                .active
                .get(object)
                .is_some_and(|owner| Arc::ptr_eq(owner, task))
            {
                index.active.remove(object);
            }
        }
        members.len()
    }

    /// Apply the transition under the map lock, then run the handler
    /// without it.
    pub(crate) fn run_task(self: &Arc<Self>, task: &Arc<Task<O, S>>) {
        let _cleanup = TaskCleanup { inner: self, task };

        let objects = {
            let mut index = self.index.lock();
            let objects = task.snapshot();
            if objects.is_empty() {
                trace!(task = task.id, "task emptied before it ran");
                self.metrics.discarded();
                return;
            }

            for object in &objects {
                let previous = index.states.insert(object.clone(), task.to.clone());
                if let Some(previous) = previous.filter(|p| *p != task.to) {
                    if let Some(list) = self.holding.get(&previous) {
                        list.lock().shift_remove(object);
                    }
                }
            }
            if let Some(list) = self.holding.get(&task.to) {
                let mut list = list.lock();
                list.extend(objects.iter().cloned());
                if let Some(compare) = &task.comparator {
                    list.sort_by(|a, b| compare(a, b));
                }
            }
            objects
        };
        self.metrics.executed(objects.len());

        let handler = self
            .registrations
            .read()
            .get(&task.to)
            .map(|r| Arc::clone(&r.handler));
        if let Some(handler) = handler {
            trace!(task = task.id, to = ?task.to, objects = objects.len(), "running handler");
            let controller = Controller::new(self, task);
            handler(&objects, &task.to, &controller);
        }
    }
}
