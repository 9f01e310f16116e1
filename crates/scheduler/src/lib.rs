//! Concurrent staged-object scheduler.
//!
//! Objects move through caller-defined [`State`]s in batches. Whenever a
//! batch enters a state, the handler registered for it runs on one of two
//! executors picked by batch size. Competing transitions for the same
//! object are resolved by state order, so an object is only ever owned by
//! one pending batch.

pub mod controller;
mod engine;
pub mod error;
pub mod metrics;
pub mod registration;
pub mod state;
pub mod task;

pub use controller::Controller;
pub use engine::StateScheduler;
pub use error::SchedulerError;
pub use metrics::SchedulerMetrics;
pub use registration::{Dispatch, Handler, Registration};
pub use state::{Object, State};
pub use task::{Comparator, MoveOutcome, Transition};
