use std::sync::atomic::Ordering;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, trace};

use crate::error::SchedulerError;
use crate::state::{Object, State};
use crate::task::{Comparator, MoveOutcome, Task, Transition};

use super::{Inner, ObjectIndex};

impl<O: Object, S: State> Inner<O, S> {
    /// Pick the eligible objects, group them by current state, and claim
    /// them for one new task per group. Caller holds the index lock.
    pub(crate) fn select_locked(
        &self,
        index: &mut ObjectIndex<O, S>,
        objects: impl IntoIterator<Item = O>,
        transition: &Transition<O, S>,
    ) -> Vec<Arc<Task<O, S>>> {
        let mut groups: IndexMap<Option<S>, IndexSet<O>> = IndexMap::new();
        for object in objects {
            let current = index.states.get(&object);
            let eligible = match &transition.from {
                Some(from) => current.map_or(true, |c| c == from),
                None => transition.force || current != Some(&transition.to),
            };
            if !eligible {
                trace!(object = ?object, current = ?current, to = ?transition.to, "not eligible");
                continue;
            }
            groups.entry(current.cloned()).or_default().insert(object);
        }

        groups
            .into_iter()
            .filter_map(|(from, members)| self.claim_locked(index, from, members, transition))
            .collect()
    }

    /// Create a task and resolve its claims against tasks already in
    /// flight. The task whose destination has the lower order keeps a
    /// contested object; on a tie the existing task keeps it. Returns
    /// `None` if the new task lost every object.
    fn claim_locked(
        &self,
        index: &mut ObjectIndex<O, S>,
        from: Option<S>,
        members: IndexSet<O>,
        transition: &Transition<O, S>,
    ) -> Option<Arc<Task<O, S>>> {
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let requested = members.len();
        let task = Arc::new(Task::new(
            id,
            from,
            transition.to.clone(),
            transition.comparator.clone(),
            members,
        ));
        self.metrics.task_created();

        let order = task.to.order();
        let mut lost = 0;
        let mut taken = 0;
        for object in task.snapshot() {
            match index.active.get(&object).cloned() {
                Some(existing) if existing.to.order() <= order => {
                    task.remove(&object);
                    lost += 1;
                }
                Some(existing) => {
                    existing.remove(&object);
                    index.active.insert(object, Arc::clone(&task));
                    taken += 1;
                }
                None => {
                    index.active.insert(object, Arc::clone(&task));
                }
            }
        }

        if lost + taken > 0 {
            self.metrics.deconflicted(lost + taken);
            debug!(
                task = id,
                to = ?task.to,
                requested,
                lost,
                taken,
                "deconflicted against in-flight tasks"
            );
        }

        if task.is_empty() {
            debug!(task = id, to = ?task.to, "every object already claimed, task discarded");
            return None;
        }
        debug!(task = id, from = ?task.from, to = ?task.to, objects = task.len(), "task created");
        Some(task)
    }

    /// Move objects on from inside `task`'s handler. Only objects still
    /// belonging to `task` are moved; they leave it atomically with the
    /// new selection.
    pub(crate) fn follow_on(
        self: &Arc<Self>,
        task: &Arc<Task<O, S>>,
        objects: impl IntoIterator<Item = O>,
        to: S,
        comparator: Option<Comparator<O>>,
    ) -> Result<MoveOutcome, SchedulerError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(MoveOutcome::default());
        }
        let transition = Transition::to(to)
            .from_state(task.to.clone())
            .comparator(comparator);

        let tasks = {
            let mut index = self.index.lock();
            let mut claimed = Vec::new();
            for object in objects {
                if !task.remove(&object) {
                    continue;
                }
                if index
                    .active
                    .get(&object)
                    .is_some_and(|owner| Arc::ptr_eq(owner, task))
                {
                    index.active.remove(&object);
                }
                claimed.push(object);
            }
            trace!(task = task.id, objects = claimed.len(), to = ?transition.to, "follow-on move");
            self.select_locked(&mut index, claimed, &transition)
        };
        self.dispatch(tasks)
    }
}
