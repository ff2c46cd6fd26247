//! Task queue — tasks with an explicit lifecycle, a bounded-concurrency gate,
//! and a dependency-aware scheduler.

pub mod config;
pub mod error;
pub mod gate;
pub mod queue;
pub mod task;

pub use config::QueueConfig;
pub use error::{ConfigError, CycleError, Error, GateError, QueueError, Result, TaskError};
pub use gate::{Gate, GatePermit};
pub use queue::{QueueState, QueueSummary, TaskQueue};
pub use task::{Completion, Task, TaskEvent, TaskOutcome, TaskState};
