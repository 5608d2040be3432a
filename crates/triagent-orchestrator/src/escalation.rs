use crate::scheduler::PriorityScheduler;
use crate::store::TaskStore;
use crate::timeout::TimeoutMonitor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, warn};
use triagent_core::{
    EventType, Task, TaskOutcome, TaskPriority, TaskStage, TaskStatus, TriagentResult,
};
use triagent_security::AuditLog;
use uuid::Uuid;

/// Abnormal condition that deviates a task from normal completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    /// Deadline elapsed while the task was non-terminal.
    Timeout,
    /// Result confidence below the review threshold.
    LowConfidence,
    /// Result carries a severe or critical medical finding.
    CriticalResult,
    /// Handler raised or returned an error.
    ProcessingError,
    /// Target agent unreachable after the retry budget.
    AgentFailure,
    /// Explicit external escalation request.
    ManualRequest,
}

impl std::fmt::Display for EscalationTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationTrigger::Timeout => write!(f, "timeout"),
            EscalationTrigger::LowConfidence => write!(f, "low_confidence"),
            EscalationTrigger::CriticalResult => write!(f, "critical_result"),
            EscalationTrigger::ProcessingError => write!(f, "processing_error"),
            EscalationTrigger::AgentFailure => write!(f, "agent_failure"),
            EscalationTrigger::ManualRequest => write!(f, "manual_request"),
        }
    }
}

/// A trigger posted to the escalation worker.
///
/// Escalation side effects run on a dedicated consumer, decoupled from the
/// scheduler's dispatch loop; posting never blocks a tier worker.
#[derive(Debug, Clone)]
pub struct EscalationEvent {
    /// Task the trigger concerns.
    pub task_id: Uuid,
    /// Which abnormal condition fired.
    pub trigger: EscalationTrigger,
    /// Human-readable reason.
    pub reason: String,
}

impl EscalationEvent {
    /// Creates an event.
    pub fn new(task_id: Uuid, trigger: EscalationTrigger, reason: impl Into<String>) -> Self {
        Self {
            task_id,
            trigger,
            reason: reason.into(),
        }
    }
}

/// An entry awaiting human review.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewEntry {
    /// Task needing review.
    pub task_id: Uuid,
    /// Review priority; forced to `critical` for critical findings.
    pub priority: TaskPriority,
    /// Why the entry was queued.
    pub reason: String,
    /// True when an operator requested the review explicitly.
    pub manually_requested: bool,
    /// When the entry was queued.
    pub created_at: DateTime<Utc>,
}

/// Queue of tasks flagged for human review.
#[derive(Default)]
pub struct ReviewQueue {
    entries: Mutex<Vec<ReviewEntry>>,
}

impl ReviewQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn push(&self, entry: ReviewEntry) {
        self.entries.lock().push(entry);
    }

    /// Removes and returns all entries, highest priority first.
    pub fn drain(&self) -> Vec<ReviewEntry> {
        let mut entries: Vec<ReviewEntry> = self.entries.lock().drain(..).collect();
        entries.sort_by_key(|e| (e.priority, e.created_at));
        entries
    }

    /// Snapshot of the queued entries in insertion order.
    pub fn snapshot(&self) -> Vec<ReviewEntry> {
        self.entries.lock().clone()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing awaits review.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Delivers immediate notifications for critical conditions.
///
/// Channel formatting is out of scope here; the default implementation
/// logs at warn level.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends one notification about a task.
    async fn notify(&self, task: &Task, message: &str);
}

/// Default notifier backed by tracing.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, task: &Task, message: &str) {
        let contacts = task
            .medical_context
            .as_ref()
            .map(|c| c.escalation_contacts.clone())
            .unwrap_or_default();
        warn!(
            task_id = %task.task_id,
            priority = %task.priority,
            contacts = ?contacts,
            "escalation notification: {message}"
        );
    }
}

/// Maps abnormal conditions to remediation actions.
///
/// Consumes [`EscalationEvent`]s from an internal channel on a dedicated
/// worker so that a slow notification never stalls dispatch. Every handled
/// trigger produces at least one audit entry.
pub struct EscalationEngine {
    store: Arc<TaskStore>,
    audit: Arc<AuditLog>,
    review: Arc<ReviewQueue>,
    notifier: Arc<dyn Notifier>,
    timeouts: Arc<TimeoutMonitor>,
    scheduler: Arc<PriorityScheduler>,
    backups: HashMap<String, String>,
    failure_counts: DashMap<String, u64>,
}

impl EscalationEngine {
    /// Creates the engine. `backups` maps `task_type` to a backup agent id
    /// used for reassignment on agent failure.
    pub fn new(
        store: Arc<TaskStore>,
        audit: Arc<AuditLog>,
        review: Arc<ReviewQueue>,
        notifier: Arc<dyn Notifier>,
        timeouts: Arc<TimeoutMonitor>,
        scheduler: Arc<PriorityScheduler>,
        backups: HashMap<String, String>,
    ) -> Self {
        Self {
            store,
            audit,
            review,
            notifier,
            timeouts,
            scheduler,
            backups,
            failure_counts: DashMap::new(),
        }
    }

    /// Spawns the dedicated escalation worker.
    pub fn spawn(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<EscalationEvent>) {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = self.handle(event.clone()).await {
                    error!(
                        task_id = %event.task_id,
                        trigger = %event.trigger,
                        error = %e,
                        "escalation handler failed"
                    );
                }
            }
        });
    }

    /// Failure counts per task type, for status reporting.
    pub fn failure_counts(&self) -> HashMap<String, u64> {
        self.failure_counts
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    async fn handle(&self, event: EscalationEvent) -> TriagentResult<()> {
        let task = self.store.get(event.task_id)?;
        match event.trigger {
            EscalationTrigger::Timeout => self.on_timeout(task, event.reason).await,
            EscalationTrigger::LowConfidence => self.queue_review(task, event, false, None),
            EscalationTrigger::CriticalResult => self.on_critical_result(task, event.reason).await,
            EscalationTrigger::ProcessingError => self.fail_task(task, event.reason),
            EscalationTrigger::AgentFailure => self.on_agent_failure(task, event.reason),
            EscalationTrigger::ManualRequest => self.queue_review(task, event, true, None),
        }
    }

    async fn on_timeout(&self, task: Task, reason: String) -> TriagentResult<()> {
        let updated = self.store.update_status(
            task.task_id,
            TaskStatus::Failed,
            Some(TaskOutcome::Failure {
                error: reason.clone(),
            }),
        )?;
        if !updated {
            // Completion won the race; the timer escalates at most once.
            return Ok(());
        }
        self.timeouts.cancel(task.task_id);
        self.mark_escalated(&task, EscalationTrigger::Timeout, &reason)?;
        self.audit.record_event(
            task.task_id,
            EventType::StatusChanged,
            Some(TaskStage::Completing),
            None,
            serde_json::json!({ "to": "failed" }),
        );
        self.store
            .advance_stage(task.task_id, TaskStage::Completing)?;

        let case_critical = task
            .medical_context
            .as_ref()
            .map(|c| c.case_priority == TaskPriority::Critical)
            .unwrap_or(task.priority == TaskPriority::Critical);
        if case_critical {
            self.send_notification(&task, &reason).await;
        }
        Ok(())
    }

    async fn on_critical_result(&self, task: Task, reason: String) -> TriagentResult<()> {
        self.send_notification(&task, &reason).await;
        let event = EscalationEvent::new(task.task_id, EscalationTrigger::CriticalResult, reason);
        // Review priority is forced to critical regardless of task priority.
        self.queue_review(task, event, false, Some(TaskPriority::Critical))
    }

    fn queue_review(
        &self,
        task: Task,
        event: EscalationEvent,
        manually_requested: bool,
        priority_override: Option<TaskPriority>,
    ) -> TriagentResult<()> {
        self.mark_escalated(&task, event.trigger, &event.reason)?;
        let entry = ReviewEntry {
            task_id: task.task_id,
            priority: priority_override.unwrap_or(task.priority),
            reason: event.reason.clone(),
            manually_requested,
            created_at: Utc::now(),
        };
        self.audit.record_event(
            task.task_id,
            EventType::ReviewQueued,
            Some(TaskStage::Escalating),
            None,
            serde_json::json!({
                "priority": entry.priority.to_string(),
                "manually_requested": manually_requested,
            }),
        );
        self.review.push(entry);
        // Completed tasks return to their terminal stage after escalation.
        if task.is_terminal() {
            self.store
                .advance_stage(task.task_id, TaskStage::Completing)?;
        }
        Ok(())
    }

    fn fail_task(&self, task: Task, reason: String) -> TriagentResult<()> {
        let updated = self.store.update_status(
            task.task_id,
            TaskStatus::Failed,
            Some(TaskOutcome::Failure {
                error: reason.clone(),
            }),
        )?;
        if !updated {
            return Ok(());
        }
        self.timeouts.cancel(task.task_id);
        *self
            .failure_counts
            .entry(task.task_type.clone())
            .or_insert(0) += 1;
        self.mark_escalated(&task, EscalationTrigger::ProcessingError, &reason)?;
        self.audit.record_event(
            task.task_id,
            EventType::StatusChanged,
            Some(TaskStage::Completing),
            None,
            serde_json::json!({ "to": "failed" }),
        );
        self.store
            .advance_stage(task.task_id, TaskStage::Completing)?;
        Ok(())
    }

    fn on_agent_failure(&self, task: Task, reason: String) -> TriagentResult<()> {
        let Some(backup) = self.backups.get(&task.task_type).cloned() else {
            // No backup configured: falls through to processing_error.
            return self.fail_task(task, reason);
        };
        if task.target_agent_id == backup {
            // The backup itself failed; do not reassign in a loop.
            return self.fail_task(task, format!("{reason}; backup agent also failed"));
        }

        let mut replacement = Task::new(
            task.source_agent_id.clone(),
            backup.clone(),
            task.task_type.clone(),
            task.payload.clone(),
            task.priority,
        )
        .with_dependencies(task.depends_on.clone())
        .with_timeout(task.timeout_seconds);
        if let Some(case_id) = task.case_id {
            replacement = replacement.with_case(case_id);
        }
        if let Some(context) = task.medical_context.clone() {
            replacement = replacement.with_context(context);
        }

        let replacement = self.store.create(replacement)?;
        self.audit.record_event(
            task.task_id,
            EventType::TaskReassigned,
            Some(TaskStage::Escalating),
            None,
            serde_json::json!({
                "backup_agent": backup,
                "replacement_task_id": replacement.task_id,
            }),
        );
        self.timeouts.arm(&replacement);
        self.scheduler.enqueue(&replacement)?;

        self.fail_task(
            task,
            format!("{reason}; reassigned to backup agent '{backup}'"),
        )
    }

    fn mark_escalated(
        &self,
        task: &Task,
        trigger: EscalationTrigger,
        reason: &str,
    ) -> TriagentResult<()> {
        self.store
            .advance_stage(task.task_id, TaskStage::Escalating)?;
        self.store.set_escalated(task.task_id, reason)?;
        self.audit.record_event(
            task.task_id,
            EventType::EscalationTriggered,
            Some(TaskStage::Escalating),
            None,
            serde_json::json!({ "trigger": trigger.to_string(), "reason": reason }),
        );
        Ok(())
    }

    async fn send_notification(&self, task: &Task, message: &str) {
        self.notifier.notify(task, message).await;
        self.audit.record_event(
            task.task_id,
            EventType::NotificationSent,
            None,
            None,
            serde_json::json!({ "message": message }),
        );
    }
}
