use std::fmt::Debug;
use std::hash::Hash;

/// A processing stage objects are classified under.
///
/// States are caller-defined. Objects normally move from lower to higher
/// [`order`](State::order), but nothing prevents moving backward; reset
/// operations rely on that.
pub trait State: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    /// Position of this state in the pipeline. Decides which of two
    /// competing transitions keeps an object: the lower order wins.
    fn order(&self) -> i32;
}

/// Anything the scheduler can track. Objects are only compared and hashed,
/// never inspected.
pub trait Object: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> Object for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}
