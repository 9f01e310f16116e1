//! Thread-based execution primitives.
//!
//! Fixed worker pools over blocking queues, a shared timer service, and two
//! executor decorators built on it: debouncing and execution time limits.
//! Panics raised by jobs are routed to a [`FaultHandler`] at every boundary.

pub mod debounce;
pub mod deadline;
pub mod error;
pub mod executor;
pub mod fault;
pub mod interrupt;
pub mod pool;
pub mod queue;
pub mod timer;
pub mod types;

pub use debounce::{DebouncerBuilder, DebouncingExecutor};
pub use deadline::DeadlineExecutor;
pub use error::ExecError;
pub use executor::{Executor, InlineExecutor, Job};
pub use fault::{default_fault_handler, Fault, FaultHandler};
pub use interrupt::{Interrupted, Interrupter};
pub use pool::{FixedPool, JobHandle, JobOutcome, PendingJob, PoolBuilder};
pub use queue::{BlockingQueue, PriorityQueue, UnboundedQueue};
pub use timer::{TimerHandle, TimerService};
pub use types::{DeadlineConfig, DebounceConfig, PoolConfig, QueueOrdering};
