//! Dependency-edge validation.
//!
//! Dependencies live on the tasks themselves, so the graph spans every task
//! that was ever linked, whether or not it belongs to a queue. An edge
//! `task -> dependency` closes a cycle exactly when `dependency` already
//! reaches `task` by following dependency edges.

use std::collections::{HashSet, VecDeque};

use parking_lot::{Mutex, MutexGuard};
use uuid::Uuid;

use super::Task;
use crate::error::CycleError;

/// Serialises edge insertions so two concurrent insertions cannot each pass
/// validation and close a cycle between them.
static EDGE_LOCK: Mutex<()> = Mutex::new(());

pub(crate) fn lock_edges() -> MutexGuard<'static, ()> {
    EDGE_LOCK.lock()
}

/// Check that adding `task -> dependency` keeps the graph acyclic.
pub(crate) fn validate_edge(task: &Task, dependency: &Task) -> Result<(), CycleError> {
    if task.id() == dependency.id() || reaches(dependency, task.id()) {
        return Err(CycleError {
            task: task.id(),
            dependency: dependency.id(),
        });
    }
    Ok(())
}

/// Breadth-first search along dependency edges from `start` looking for `target`.
fn reaches(start: &Task, target: Uuid) -> bool {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(start.clone());

    while let Some(current) = queue.pop_front() {
        if current.id() == target {
            return true;
        }
        if visited.insert(current.id()) {
            queue.extend(current.dependencies());
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Task {
        Task::new(|done| done.complete())
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let a = noop();
        let err = validate_edge(&a, &a).unwrap_err();
        assert_eq!(err.task, a.id());
        assert_eq!(err.dependency, a.id());
    }

    #[test]
    fn detects_transitive_cycle() {
        let (a, b, c) = (noop(), noop(), noop());
        a.add_dependency(&b).unwrap();
        b.add_dependency(&c).unwrap();

        assert!(validate_edge(&c, &a).is_err());
        assert!(validate_edge(&a, &c).is_ok());
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let (top, left, right, bottom) = (noop(), noop(), noop(), noop());
        left.add_dependency(&top).unwrap();
        right.add_dependency(&top).unwrap();
        bottom.add_dependency(&left).unwrap();

        assert!(validate_edge(&bottom, &right).is_ok());
        assert!(validate_edge(&top, &bottom).is_err());
    }
}
