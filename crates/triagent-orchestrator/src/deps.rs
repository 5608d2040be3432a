use crate::store::TaskStore;
use triagent_core::{Task, TaskStatus};
use uuid::Uuid;

/// Readiness of a task's prerequisite set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepState {
    /// Every prerequisite has completed.
    Ready,
    /// The given prerequisite is still non-terminal. Transient; requeue.
    Waiting(Uuid),
    /// A prerequisite finished without completing (failed or cancelled);
    /// the task can never become eligible.
    Unsatisfiable(Uuid),
}

/// Checks whether a task's prerequisites have reached terminal success.
#[derive(Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// Classifies the dependency state of `task` against the store.
    ///
    /// A missing prerequisite (e.g. already archived) counts as completed;
    /// the store only archives terminal tasks.
    pub fn check(store: &TaskStore, task: &Task) -> DepState {
        for dep in &task.depends_on {
            match store.get(*dep) {
                Ok(dep_task) => match dep_task.status {
                    TaskStatus::Completed => {}
                    TaskStatus::Failed | TaskStatus::Cancelled => {
                        return DepState::Unsatisfiable(*dep);
                    }
                    TaskStatus::Pending | TaskStatus::InProgress => {
                        return DepState::Waiting(*dep);
                    }
                },
                Err(_) => {}
            }
        }
        DepState::Ready
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use triagent_core::{Payload, TaskOutcome, TaskPriority};

    fn task(deps: Vec<Uuid>) -> Task {
        Task::new("src", "triage", "t", Payload::new(), TaskPriority::Normal)
            .with_dependencies(deps)
    }

    #[test]
    fn test_no_deps_is_ready() {
        let store = TaskStore::new();
        assert_eq!(DependencyResolver::check(&store, &task(vec![])), DepState::Ready);
    }

    #[test]
    fn test_waits_for_pending_dep() {
        let store = TaskStore::new();
        let dep = store.create(task(vec![])).unwrap();
        let dependent = task(vec![dep.task_id]);
        assert_eq!(
            DependencyResolver::check(&store, &dependent),
            DepState::Waiting(dep.task_id)
        );

        store
            .update_status(
                dep.task_id,
                TaskStatus::Completed,
                Some(TaskOutcome::Success {
                    result: Payload::new()
                }),
            )
            .unwrap();
        assert_eq!(
            DependencyResolver::check(&store, &dependent),
            DepState::Ready
        );
    }

    #[test]
    fn test_failed_dep_is_unsatisfiable() {
        let store = TaskStore::new();
        let dep = store.create(task(vec![])).unwrap();
        store
            .update_status(
                dep.task_id,
                TaskStatus::Failed,
                Some(TaskOutcome::Failure {
                    error: "boom".into()
                }),
            )
            .unwrap();

        let dependent = task(vec![dep.task_id]);
        assert_eq!(
            DependencyResolver::check(&store, &dependent),
            DepState::Unsatisfiable(dep.task_id)
        );
    }

    #[test]
    fn test_two_deps_gate_until_both_complete() {
        let store = TaskStore::new();
        let a = store.create(task(vec![])).unwrap();
        let b = store.create(task(vec![])).unwrap();
        let dependent = task(vec![a.task_id, b.task_id]);

        store
            .update_status(
                a.task_id,
                TaskStatus::Completed,
                Some(TaskOutcome::Success {
                    result: Payload::new()
                }),
            )
            .unwrap();
        assert_eq!(
            DependencyResolver::check(&store, &dependent),
            DepState::Waiting(b.task_id)
        );

        store
            .update_status(
                b.task_id,
                TaskStatus::Completed,
                Some(TaskOutcome::Success {
                    result: Payload::new()
                }),
            )
            .unwrap();
        assert_eq!(
            DependencyResolver::check(&store, &dependent),
            DepState::Ready
        );
    }
}
