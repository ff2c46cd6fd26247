//! Completion handle handed to task bodies.

use uuid::Uuid;

use super::Task;

/// One-shot signal a task body uses to report that its work is done.
///
/// `complete` consumes the handle, so a body cannot fire it twice. A
/// completion that arrives after the task was already forced into `Finished`
/// (cancellation or timeout) is absorbed by the task.
///
/// The handle is `Send`: bodies typically move it into a spawned task or
/// thread and call it from there.
#[must_use = "a task stays Running until its completion is signalled"]
pub struct Completion {
    task: Option<Task>,
}

impl Completion {
    pub(crate) fn new(task: Task) -> Self {
        Self { task: Some(task) }
    }

    /// Id of the task this handle completes.
    pub fn task_id(&self) -> Uuid {
        self.task.as_ref().map(Task::id).unwrap_or_default()
    }

    /// Whether the task has been cancelled (or timed out) in the meantime.
    ///
    /// Long-running bodies can poll this to stop early; the task's own
    /// bookkeeping is already finished by then.
    pub fn is_cancelled(&self) -> bool {
        self.task.as_ref().is_some_and(Task::is_cancelled)
    }

    /// Signal completion.
    pub fn complete(mut self) {
        if let Some(task) = self.task.take() {
            task.signal_completion();
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(task) = self.task.take()
            && !task.is_finished()
        {
            tracing::warn!(
                task_id = %task.id(),
                "Completion dropped without being signalled, task stays running"
            );
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("task_id", &self.task_id())
            .field("fired", &self.task.is_none())
            .finish()
    }
}
