use crate::task::TaskStage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of lifecycle transition recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A task was registered in the store.
    TaskCreated,
    /// A task was admitted to a priority queue.
    TaskQueued,
    /// A task's coarse status changed.
    StatusChanged,
    /// A task's fine-grained stage advanced.
    StageChanged,
    /// An escalation trigger fired.
    EscalationTriggered,
    /// An escalation notification was delivered.
    NotificationSent,
    /// A task was queued for human review.
    ReviewQueued,
    /// A task was reassigned to a backup agent.
    TaskReassigned,
    /// A terminal task was archived and removed from the store.
    TaskArchived,
    /// An authentication attempt succeeded.
    AuthGranted,
    /// An authentication attempt was rejected.
    AuthDenied,
    /// A capability-scoped token was issued.
    TokenIssued,
    /// A sensitive payload field failed to decrypt.
    DecryptFailed,
    /// An external agent card was registered.
    AgentRegistered,
}

/// Immutable audit record of one lifecycle transition.
///
/// Append-only; never mutated or deleted except by bulk retention sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Task the event concerns. Nil for agent-level events.
    pub task_id: Uuid,
    /// Kind of transition.
    pub event_type: EventType,
    /// Stage the task was in when the event was recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<TaskStage>,
    /// UTC timestamp of the transition.
    pub timestamp: DateTime<Utc>,
    /// Agent that caused the transition, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_agent_id: Option<String>,
    /// Free-form structured details.
    pub details: serde_json::Value,
}

impl LifecycleEvent {
    /// Creates an event stamped with the current time.
    pub fn new(task_id: Uuid, event_type: EventType) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            task_id,
            event_type,
            stage: None,
            timestamp: Utc::now(),
            actor_agent_id: None,
            details: serde_json::Value::Null,
        }
    }

    /// Records the stage at the time of the event.
    pub fn at_stage(mut self, stage: TaskStage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Records the acting agent.
    pub fn by(mut self, agent_id: impl Into<String>) -> Self {
        self.actor_agent_id = Some(agent_id.into());
        self
    }

    /// Attaches structured details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_value() {
        assert_eq!(
            serde_json::to_value(EventType::EscalationTriggered).unwrap(),
            serde_json::json!("escalation_triggered")
        );
    }

    #[test]
    fn test_event_builder() {
        let id = Uuid::new_v4();
        let event = LifecycleEvent::new(id, EventType::StatusChanged)
            .at_stage(TaskStage::Processing)
            .by("triage")
            .with_details(serde_json::json!({"to": "in_progress"}));
        assert_eq!(event.task_id, id);
        assert_eq!(event.stage, Some(TaskStage::Processing));
        assert_eq!(event.actor_agent_id.as_deref(), Some("triage"));
    }
}
