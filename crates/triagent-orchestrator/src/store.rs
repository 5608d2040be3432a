use chrono::{Duration, Utc};
use dashmap::DashMap;
use triagent_core::{
    Task, TaskOutcome, TaskStage, TaskStatus, TriagentError, TriagentResult,
};
use uuid::Uuid;

/// In-memory registry of tasks. Pure data access, no policy.
///
/// All mutations go through per-entry exclusive access; there is no global
/// lock that would serialize unrelated tasks. Terminal statuses are
/// immutable: [`TaskStore::update_status`] refuses to overwrite one and
/// returns `false` instead of erroring, which keeps escalation idempotent.
#[derive(Default)]
pub struct TaskStore {
    tasks: DashMap<Uuid, Task>,
}

impl TaskStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task. Fails on a duplicate id.
    pub fn create(&self, task: Task) -> TriagentResult<Task> {
        let id = task.task_id;
        match self.tasks.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(TriagentError::Config(format!(
                "task id {id} already registered"
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(task.clone());
                Ok(task)
            }
        }
    }

    /// Looks up a task by id.
    pub fn get(&self, task_id: Uuid) -> TriagentResult<Task> {
        self.tasks
            .get(&task_id)
            .map(|t| t.clone())
            .ok_or(TriagentError::TaskNotFound(task_id))
    }

    /// Sets the coarse status, optionally attaching the outcome.
    ///
    /// Returns `Ok(false)` without mutating when the task is already
    /// terminal. Terminal transitions stamp `completed_at`.
    pub fn update_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        outcome: Option<TaskOutcome>,
    ) -> TriagentResult<bool> {
        let mut task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(TriagentError::TaskNotFound(task_id))?;
        if task.status.is_terminal() {
            return Ok(false);
        }
        task.status = status;
        task.updated_at = Utc::now();
        if status.is_terminal() {
            task.completed_at = Some(task.updated_at);
            task.outcome = outcome;
        }
        Ok(true)
    }

    /// Advances the fine-grained stage.
    ///
    /// Stages advance monotonically, except that `Escalating` may be
    /// revisited at any time. Regressions are ignored, not errors.
    pub fn advance_stage(&self, task_id: Uuid, stage: TaskStage) -> TriagentResult<()> {
        let mut task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(TriagentError::TaskNotFound(task_id))?;
        if stage >= task.stage || stage == TaskStage::Escalating {
            task.stage = stage;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    /// Flags a task as escalated with a human-readable reason.
    pub fn set_escalated(&self, task_id: Uuid, reason: &str) -> TriagentResult<()> {
        let mut task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(TriagentError::TaskNotFound(task_id))?;
        task.escalated = true;
        task.escalation_reason = Some(reason.to_string());
        task.updated_at = Utc::now();
        Ok(())
    }

    /// Records which path a task's dispatch took.
    pub fn set_dispatch_path(
        &self,
        task_id: Uuid,
        path: triagent_core::DispatchPath,
    ) -> TriagentResult<()> {
        let mut task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(TriagentError::TaskNotFound(task_id))?;
        task.dispatch_path = Some(path);
        task.updated_at = Utc::now();
        Ok(())
    }

    /// Tasks targeted at an agent, in creation order.
    pub fn list_by_agent(&self, agent_id: &str, include_completed: bool) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.target_agent_id == agent_id)
            .filter(|t| include_completed || !t.status.is_terminal())
            .map(|t| t.clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Pending tasks for an agent, sorted by priority then creation order.
    pub fn list_pending(&self, agent_id: &str) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.target_agent_id == agent_id && t.status == TaskStatus::Pending)
            .map(|t| t.clone())
            .collect();
        tasks.sort_by_key(|t| (t.priority, t.created_at));
        tasks
    }

    /// All tasks belonging to a case, in creation order.
    pub fn list_by_case(&self, case_id: Uuid) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.case_id == Some(case_id))
            .map(|t| t.clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Archives and removes terminal tasks untouched for longer than
    /// `max_age`. Returns the removed ids so the caller can audit them.
    pub fn purge_older_than(&self, max_age: Duration) -> Vec<Uuid> {
        let cutoff = Utc::now() - max_age;
        let stale: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|t| t.status.is_terminal() && t.updated_at < cutoff)
            .map(|t| t.task_id)
            .collect();
        for id in &stale {
            if let Some(mut task) = self.tasks.get_mut(id) {
                task.stage = TaskStage::Archived;
            }
            self.tasks.remove(id);
        }
        stale
    }

    /// Number of pending tasks across all agents.
    pub fn pending_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .count()
    }

    /// Total registered tasks.
    pub fn total_count(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use triagent_core::{Payload, TaskPriority};

    fn task(priority: TaskPriority) -> Task {
        Task::new("src", "triage", "image_analysis", Payload::new(), priority)
    }

    #[test]
    fn test_create_and_get() {
        let store = TaskStore::new();
        let t = store.create(task(TaskPriority::Normal)).unwrap();
        assert_eq!(store.get(t.task_id).unwrap().task_type, "image_analysis");
        assert!(matches!(
            store.get(Uuid::new_v4()),
            Err(TriagentError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let store = TaskStore::new();
        let t = store.create(task(TaskPriority::Normal)).unwrap();
        assert!(store.create(t).is_err());
    }

    #[test]
    fn test_terminal_status_is_immutable() {
        let store = TaskStore::new();
        let t = store.create(task(TaskPriority::High)).unwrap();
        assert!(store
            .update_status(t.task_id, TaskStatus::InProgress, None)
            .unwrap());
        assert!(store
            .update_status(
                t.task_id,
                TaskStatus::Completed,
                Some(TaskOutcome::Success {
                    result: Payload::new()
                }),
            )
            .unwrap());

        // Any further transition is refused, not an error.
        assert!(!store
            .update_status(
                t.task_id,
                TaskStatus::Failed,
                Some(TaskOutcome::Failure {
                    error: "late timeout".into()
                }),
            )
            .unwrap());
        let stored = store.get(t.task_id).unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert!(stored.outcome.unwrap().result().is_some());
        assert!(stored.completed_at.is_some());
    }

    #[test]
    fn test_stage_monotonic_except_escalating() {
        let store = TaskStore::new();
        let t = store.create(task(TaskPriority::Normal)).unwrap();
        store.advance_stage(t.task_id, TaskStage::Processing).unwrap();
        store.advance_stage(t.task_id, TaskStage::Queued).unwrap();
        assert_eq!(store.get(t.task_id).unwrap().stage, TaskStage::Processing);

        store.advance_stage(t.task_id, TaskStage::Completing).unwrap();
        store.advance_stage(t.task_id, TaskStage::Escalating).unwrap();
        assert_eq!(store.get(t.task_id).unwrap().stage, TaskStage::Escalating);
    }

    #[test]
    fn test_list_pending_priority_then_fifo() {
        let store = TaskStore::new();
        let low = store.create(task(TaskPriority::Low)).unwrap();
        let crit_a = store.create(task(TaskPriority::Critical)).unwrap();
        let crit_b = store.create(task(TaskPriority::Critical)).unwrap();
        let normal = store.create(task(TaskPriority::Normal)).unwrap();

        let pending = store.list_pending("triage");
        let ids: Vec<Uuid> = pending.iter().map(|t| t.task_id).collect();
        assert_eq!(
            ids,
            vec![crit_a.task_id, crit_b.task_id, normal.task_id, low.task_id]
        );
    }

    #[test]
    fn test_list_by_agent_filters_completed() {
        let store = TaskStore::new();
        let t1 = store.create(task(TaskPriority::Normal)).unwrap();
        let _t2 = store.create(task(TaskPriority::Normal)).unwrap();
        store
            .update_status(
                t1.task_id,
                TaskStatus::Completed,
                Some(TaskOutcome::Success {
                    result: Payload::new()
                }),
            )
            .unwrap();

        assert_eq!(store.list_by_agent("triage", false).len(), 1);
        assert_eq!(store.list_by_agent("triage", true).len(), 2);
        assert!(store.list_by_agent("other", true).is_empty());
    }

    #[test]
    fn test_purge_older_than() {
        let store = TaskStore::new();
        let t = store.create(task(TaskPriority::Normal)).unwrap();
        store
            .update_status(
                t.task_id,
                TaskStatus::Failed,
                Some(TaskOutcome::Failure {
                    error: "x".into()
                }),
            )
            .unwrap();

        // Still fresh: nothing purged.
        assert!(store.purge_older_than(Duration::hours(1)).is_empty());
        // Zero retention: the terminal task goes.
        let purged = store.purge_older_than(Duration::zero());
        assert_eq!(purged, vec![t.task_id]);
        assert_eq!(store.total_count(), 0);
    }

    #[test]
    fn test_counts() {
        let store = TaskStore::new();
        let t = store.create(task(TaskPriority::Normal)).unwrap();
        store.create(task(TaskPriority::Low)).unwrap();
        assert_eq!(store.pending_count(), 2);
        store
            .update_status(t.task_id, TaskStatus::InProgress, None)
            .unwrap();
        assert_eq!(store.pending_count(), 1);
        assert_eq!(store.total_count(), 2);
    }
}
