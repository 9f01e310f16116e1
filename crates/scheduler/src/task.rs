use std::cmp::Ordering;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;

use crate::state::{Object, State};

/// Ordering applied to a destination state's holding list.
pub type Comparator<O> = Arc<dyn Fn(&O, &O) -> Ordering + Send + Sync>;

/// A batch of objects in transit from one state to another.
///
/// Membership only ever shrinks: objects leave when another transition
/// claims them, when they are removed, or when a handler moves them on.
pub(crate) struct Task<O, S> {
    pub(crate) id: u64,
    pub(crate) from: Option<S>,
    pub(crate) to: S,
    pub(crate) comparator: Option<Comparator<O>>,
    members: Mutex<IndexSet<O>>,
}

impl<O: Object, S: State> Task<O, S> {
    pub(crate) fn new(
        id: u64,
        from: Option<S>,
        to: S,
        comparator: Option<Comparator<O>>,
        members: IndexSet<O>,
    ) -> Self {
        Self {
            id,
            from,
            to,
            comparator,
            members: Mutex::new(members),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    pub(crate) fn contains(&self, object: &O) -> bool {
        self.members.lock().contains(object)
    }

    /// Drop one object. Returns whether it was a member.
    pub(crate) fn remove(&self, object: &O) -> bool {
        self.members.lock().shift_remove(object)
    }

    pub(crate) fn snapshot(&self) -> Vec<O> {
        self.members.lock().iter().cloned().collect()
    }
}

/// Parameters of a `move_to_state` request.
pub struct Transition<O, S> {
    pub(crate) from: Option<S>,
    pub(crate) to: S,
    pub(crate) comparator: Option<Comparator<O>>,
    pub(crate) force: bool,
}

impl<O, S> Transition<O, S> {
    /// A move into `state` from wherever the objects are, skipping any
    /// already there.
    pub fn to(state: S) -> Self {
        Self {
            from: None,
            to: state,
            comparator: None,
            force: false,
        }
    }

    /// Only move objects currently in `state` (untracked objects qualify too).
    pub fn from_state(mut self, state: S) -> Self {
        self.from = Some(state);
        self
    }

    /// Keep the destination's holding list sorted by `compare`.
    pub fn sorted_by<F>(mut self, compare: F) -> Self
    where
        F: Fn(&O, &O) -> Ordering + Send + Sync + 'static,
    {
        self.comparator = Some(Arc::new(compare));
        self
    }

    /// Set or clear the holding-list comparator. `None` keeps insertion order.
    pub fn comparator(mut self, comparator: Option<Comparator<O>>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Move objects even if they are already in the destination state.
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// What a move request ended up scheduling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveOutcome {
    /// Tasks that survived deconfliction and were dispatched.
    pub tasks: usize,
    /// Objects across those tasks.
    pub objects: usize,
}

impl MoveOutcome {
    pub fn is_empty(&self) -> bool {
        self.tasks == 0
    }
}
