//! Tasks — units of asynchronous work with an explicit lifecycle.
//!
//! Core components:
//! - `state` — Task state machine (Pending → Running → Finished) and events
//! - `completion` — One-shot completion handle passed to task bodies
//! - `graph` — Cycle checks for dependency edges
//! - `task` — The task handle: start, cancel, timeout, dependencies

pub mod completion;
mod graph;
pub mod state;
#[allow(clippy::module_inception)]
pub mod task;

pub use completion::Completion;
pub use state::{TaskEvent, TaskOutcome, TaskState};
pub use task::{Body, Task, TaskBuilder, TimeoutCallback};

pub(crate) use task::Observer;
