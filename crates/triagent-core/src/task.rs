use crate::context::MedicalContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Structured key/value payload carried by a task.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Medical priority tier of a task, fixed at creation.
///
/// Tiers control queue admission order and the timeout deadline; they never
/// preempt an already-dispatched task. Ordering is `Critical < High <
/// Normal < Low` so that an ascending sort yields dispatch order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Life-threatening findings; 60 second deadline.
    Critical,
    /// Urgent clinical work; 180 second deadline.
    High,
    /// Routine analysis; 300 second deadline.
    Normal,
    /// Background work; 600 second deadline.
    Low,
}

impl TaskPriority {
    /// All tiers in dispatch order (highest first).
    pub const ALL: [TaskPriority; 4] = [
        TaskPriority::Critical,
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
    ];

    /// The SLA deadline derived from this tier, in seconds.
    pub fn timeout_secs(self) -> u64 {
        match self {
            TaskPriority::Critical => 60,
            TaskPriority::High => 180,
            TaskPriority::Normal => 300,
            TaskPriority::Low => 600,
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Critical => write!(f, "critical"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Normal => write!(f, "normal"),
            TaskPriority::Low => write!(f, "low"),
        }
    }
}

/// Coarse lifecycle status of a task.
///
/// Transitions only along `Pending → InProgress → {Completed|Failed|Cancelled}`;
/// terminal states are immutable once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, not yet picked up by a worker.
    Pending,
    /// Dispatched to an agent or local handler.
    InProgress,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
    /// Explicitly cancelled before completion.
    Cancelled,
}

impl TaskStatus {
    /// True for `Completed`, `Failed`, and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Fine-grained lifecycle stage.
///
/// Advances monotonically, except that `Escalating` may be revisited any
/// number of times (a completed task can still be escalated for review).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    /// Registered in the store.
    Created,
    /// Admitted to a priority queue.
    Queued,
    /// Picked up by a tier worker.
    Assigned,
    /// Handler or remote agent executing.
    Processing,
    /// Result validation in progress.
    Validating,
    /// An escalation handler is acting on the task.
    Escalating,
    /// Terminal bookkeeping.
    Completing,
    /// Retained only for audit reconstruction.
    Archived,
}

/// Which path a task's dispatch ultimately took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPath {
    /// Remote RPC to the target agent's registered endpoint.
    Remote,
    /// Locally registered handler after remote unreachability.
    LocalFallback,
}

/// Success-xor-failure outcome of a finished task.
///
/// Serializes flattened into the task record as either a `result` or an
/// `error` key, never both.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskOutcome {
    /// The handler returned a result map.
    Success {
        /// Structured output of the handler.
        result: Payload,
    },
    /// The handler returned or raised an error.
    Failure {
        /// Human-readable failure reason.
        error: String,
    },
}

impl TaskOutcome {
    /// The result map, if this outcome is a success.
    pub fn result(&self) -> Option<&Payload> {
        match self {
            TaskOutcome::Success { result } => Some(result),
            TaskOutcome::Failure { .. } => None,
        }
    }

    /// The error string, if this outcome is a failure.
    pub fn error(&self) -> Option<&str> {
        match self {
            TaskOutcome::Success { .. } => None,
            TaskOutcome::Failure { error } => Some(error),
        }
    }
}

/// A unit of work exchanged between agents.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    /// Opaque unique identifier, generated at creation, immutable.
    pub task_id: Uuid,
    /// Case this task belongs to, when submitted through the facade.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_id: Option<Uuid>,
    /// Agent that created the task.
    pub source_agent_id: String,
    /// Agent expected to execute the task.
    pub target_agent_id: String,
    /// Tag selecting a handler.
    pub task_type: String,
    /// Structured key/value payload; sensitive keys are stored encrypted.
    pub payload: Payload,
    /// Medical priority tier, fixed at creation.
    pub priority: TaskPriority,
    /// Coarse lifecycle status.
    pub status: TaskStatus,
    /// Fine-grained lifecycle stage.
    pub stage: TaskStage,
    /// UTC creation timestamp.
    pub created_at: DateTime<Utc>,
    /// UTC timestamp of the last mutation.
    pub updated_at: DateTime<Utc>,
    /// UTC timestamp of the terminal transition, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Success-xor-failure outcome, present once terminal.
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TaskOutcome>,
    /// Pseudonymized case context (no raw PHI).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medical_context: Option<MedicalContext>,
    /// Deadline derived from the priority tier at creation.
    pub timeout_seconds: u64,
    /// Tasks that must be `completed` before this one is eligible to run.
    pub depends_on: Vec<Uuid>,
    /// True once any escalation trigger has fired for this task.
    pub escalated: bool,
    /// Human-readable reason for the most recent escalation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
    /// Remote vs. local-fallback path, recorded at dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_path: Option<DispatchPath>,
}

impl Task {
    /// Creates a new pending task with a priority-derived timeout.
    pub fn new(
        source_agent_id: impl Into<String>,
        target_agent_id: impl Into<String>,
        task_type: impl Into<String>,
        payload: Payload,
        priority: TaskPriority,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4(),
            case_id: None,
            source_agent_id: source_agent_id.into(),
            target_agent_id: target_agent_id.into(),
            task_type: task_type.into(),
            payload,
            priority,
            status: TaskStatus::Pending,
            stage: TaskStage::Created,
            created_at: now,
            updated_at: now,
            completed_at: None,
            outcome: None,
            medical_context: None,
            timeout_seconds: priority.timeout_secs(),
            depends_on: Vec::new(),
            escalated: false,
            escalation_reason: None,
            dispatch_path: None,
        }
    }

    /// Attaches the shared case context.
    pub fn with_context(mut self, context: MedicalContext) -> Self {
        self.medical_context = Some(context);
        self
    }

    /// Groups the task under a case id.
    pub fn with_case(mut self, case_id: Uuid) -> Self {
        self.case_id = Some(case_id);
        self
    }

    /// Sets prerequisite tasks.
    pub fn with_dependencies(mut self, deps: Vec<Uuid>) -> Self {
        self.depends_on = deps;
        self
    }

    /// Overrides the priority-derived timeout. Operational override only;
    /// the default deadline always comes from the tier.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_seconds = secs;
        self
    }

    /// True once the task has reached `Completed`, `Failed`, or `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_timeouts() {
        assert_eq!(TaskPriority::Critical.timeout_secs(), 60);
        assert_eq!(TaskPriority::High.timeout_secs(), 180);
        assert_eq!(TaskPriority::Normal.timeout_secs(), 300);
        assert_eq!(TaskPriority::Low.timeout_secs(), 600);
    }

    #[test]
    fn test_priority_ordering() {
        let mut tiers = vec![
            TaskPriority::Low,
            TaskPriority::Critical,
            TaskPriority::Normal,
            TaskPriority::High,
        ];
        tiers.sort();
        assert_eq!(tiers, TaskPriority::ALL.to_vec());
    }

    #[test]
    fn test_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_stage_ordering() {
        assert!(TaskStage::Created < TaskStage::Queued);
        assert!(TaskStage::Processing < TaskStage::Validating);
        assert!(TaskStage::Escalating < TaskStage::Completing);
        assert!(TaskStage::Completing < TaskStage::Archived);
    }

    #[test]
    fn test_task_defaults() {
        let task = Task::new(
            "radiology",
            "triage",
            "image_analysis",
            Payload::new(),
            TaskPriority::High,
        );
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.stage, TaskStage::Created);
        assert_eq!(task.timeout_seconds, 180);
        assert!(task.outcome.is_none());
        assert!(!task.escalated);
    }

    #[test]
    fn test_outcome_serializes_result_xor_error() {
        let mut result = Payload::new();
        result.insert("grade".into(), serde_json::json!(2));
        let task = Task::new("a", "b", "t", Payload::new(), TaskPriority::Normal);

        let mut ok = task.clone();
        ok.outcome = Some(TaskOutcome::Success { result });
        let json = serde_json::to_value(&ok).unwrap();
        assert!(json.get("result").is_some());
        assert!(json.get("error").is_none());

        let mut err = task;
        err.outcome = Some(TaskOutcome::Failure {
            error: "timeout after 60s".into(),
        });
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("result").is_none());
        assert_eq!(json["error"], "timeout after 60s");
    }

    #[test]
    fn test_enum_wire_values() {
        assert_eq!(
            serde_json::to_value(TaskStatus::InProgress).unwrap(),
            serde_json::json!("in_progress")
        );
        assert_eq!(
            serde_json::to_value(TaskPriority::Critical).unwrap(),
            serde_json::json!("critical")
        );
        assert_eq!(
            serde_json::to_value(TaskStage::Escalating).unwrap(),
            serde_json::json!("escalating")
        );
    }
}
