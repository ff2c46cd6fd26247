//! Queue lifecycle state and summaries.

use serde::{Deserialize, Serialize};

/// Lifecycle of a queue's run cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Accepting tasks, not dispatching.
    Idle,
    /// `run()` is dispatching tasks.
    Running,
    /// Nothing left to dispatch (or `cancel_all` was called); waiting for
    /// in-flight tasks to finish.
    Draining,
    /// Every task finished and the all-finished callbacks fired.
    Completed,
}

impl QueueState {
    /// Whether a `run()` cycle is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Draining)
    }
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Summary of all tasks in a queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub finished: usize,
    /// Finished tasks that were cancelled or timed out.
    pub cancelled: usize,
}
