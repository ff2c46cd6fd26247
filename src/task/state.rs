//! Task state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a task.
///
/// "Ready" is not a state of its own: a `Pending` task is ready once it is not
/// cancelled and all of its dependencies are `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Not started yet. May still be waiting on dependencies or a slot.
    Pending,
    /// Body has been (or is about to be) invoked; completion not yet signalled.
    Running,
    /// Terminal. Completed, cancelled or timed out.
    Finished,
}

impl TaskState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, target),
            (Pending, Running) | (Pending, Finished) | (Running, Finished)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Finished => "finished",
        };
        write!(f, "{s}")
    }
}

/// How a task reached `Finished`.
///
/// Dependents do not care; any outcome satisfies a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The body signalled completion.
    Completed,
    /// Cancelled before or during execution.
    Cancelled,
    /// The completion signal did not arrive within the task's timeout.
    TimedOut,
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        };
        write!(f, "{s}")
    }
}

/// A state transition, as delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// The task that changed state.
    pub task_id: Uuid,
    /// Previous state.
    pub from: TaskState,
    /// New state.
    pub to: TaskState,
    /// When the transition occurred.
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub(crate) fn new(task_id: Uuid, from: TaskState, to: TaskState) -> Self {
        Self {
            task_id,
            from,
            to,
            timestamp: Utc::now(),
        }
    }

    /// Whether this event moved the task into `Finished`.
    pub fn is_finish(&self) -> bool {
        self.to.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_valid() {
        assert!(TaskState::Pending.can_transition_to(TaskState::Running));
        assert!(TaskState::Pending.can_transition_to(TaskState::Finished));
        assert!(TaskState::Running.can_transition_to(TaskState::Finished));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!TaskState::Finished.can_transition_to(TaskState::Pending));
        assert!(!TaskState::Finished.can_transition_to(TaskState::Running));
        assert!(!TaskState::Finished.can_transition_to(TaskState::Finished));
        assert!(!TaskState::Running.can_transition_to(TaskState::Pending));
        assert!(!TaskState::Running.can_transition_to(TaskState::Running));
        assert!(!TaskState::Pending.can_transition_to(TaskState::Pending));
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Finished.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
    }

    #[test]
    fn display() {
        assert_eq!(TaskState::Running.to_string(), "running");
        assert_eq!(TaskOutcome::TimedOut.to_string(), "timed_out");
    }

    #[test]
    fn task_state_serde() {
        let json = serde_json::to_string(&TaskState::Finished).unwrap();
        assert_eq!(json, "\"finished\"");
        let parsed: TaskState = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(parsed, TaskState::Pending);
    }

    #[test]
    fn event_serializes_for_observers() {
        let id = Uuid::new_v4();
        let event = TaskEvent::new(id, TaskState::Running, TaskState::Finished);
        assert!(event.is_finish());

        let value = serde_json::to_value(event).unwrap();
        assert_eq!(value["task_id"], id.to_string());
        assert_eq!(value["from"], "running");
        assert_eq!(value["to"], "finished");
        assert!(value["timestamp"].is_string());
    }
}
