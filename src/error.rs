//! Error types for the task queue.

use uuid::Uuid;

use crate::task::TaskState;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Gate error: {0}")]
    Gate(#[from] GateError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// A dependency edge that would close a cycle.
///
/// A task depending on itself is reported the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Adding dependency {dependency} to task {task} would create a cycle")]
pub struct CycleError {
    /// The task the edge was being added to.
    pub task: Uuid,
    /// The task it was going to wait on.
    pub dependency: Uuid,
}

/// Errors raised by operations on a single task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("Task {id} already in state {state}, dependencies can no longer change")]
    AlreadyStarted { id: Uuid, state: TaskState },
}

/// Queue-related errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("Task {id} already in state {state}, dependencies can no longer change")]
    AlreadyStarted { id: Uuid, state: TaskState },

    #[error("Task {id} was already added to the queue")]
    DuplicateTask { id: Uuid },

    #[error("Task {id} is not part of the queue")]
    UnknownTask { id: Uuid },

    #[error("Queue {name} is already running")]
    AlreadyRunning { name: String },
}

impl From<TaskError> for QueueError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Cycle(cycle) => QueueError::Cycle(cycle),
            TaskError::AlreadyStarted { id, state } => QueueError::AlreadyStarted { id, state },
        }
    }
}

/// Concurrency gate errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("Gate is closed")]
    Closed,
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
