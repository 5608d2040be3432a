use crate::deps::{DepState, DependencyResolver};
use crate::escalation::{EscalationEvent, EscalationTrigger};
use crate::store::TaskStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use triagent_core::{
    EventType, Task, TaskPriority, TaskStage, TriagentError, TriagentResult,
};
use triagent_security::AuditLog;
use uuid::Uuid;

/// Hands an eligible task to execution. Implemented by [`crate::AgentDispatcher`];
/// tests substitute recorders.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Executes the task end to end, including its terminal transition.
    async fn dispatch(&self, task_id: Uuid) -> TriagentResult<()>;
}

/// Four independent FIFO queues, one per priority tier, each served by its
/// own consumer loop.
///
/// Tiers control admission order only; an already-dispatched task is never
/// preempted. Within a tier ordering is strict FIFO by enqueue time. A
/// dequeued task with unmet dependencies is re-enqueued to the tail of the
/// same tier after a fixed backoff.
pub struct PriorityScheduler {
    senders: HashMap<TaskPriority, mpsc::UnboundedSender<Uuid>>,
    receivers: Mutex<Option<HashMap<TaskPriority, mpsc::UnboundedReceiver<Uuid>>>>,
    store: Arc<TaskStore>,
    audit: Arc<AuditLog>,
    backoff: Duration,
}

impl PriorityScheduler {
    /// Creates the per-tier queues. Workers start on [`PriorityScheduler::start`].
    pub fn new(store: Arc<TaskStore>, audit: Arc<AuditLog>, backoff: Duration) -> Self {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for tier in TaskPriority::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(tier, tx);
            receivers.insert(tier, rx);
        }
        Self {
            senders,
            receivers: Mutex::new(Some(receivers)),
            store,
            audit,
            backoff,
        }
    }

    /// Admits a task to its tier's queue.
    pub fn enqueue(&self, task: &Task) -> TriagentResult<()> {
        self.store.advance_stage(task.task_id, TaskStage::Queued)?;
        self.audit.record_event(
            task.task_id,
            EventType::TaskQueued,
            Some(TaskStage::Queued),
            None,
            serde_json::json!({ "priority": task.priority.to_string() }),
        );
        self.senders
            .get(&task.priority)
            .and_then(|tx| tx.send(task.task_id).ok())
            .ok_or_else(|| TriagentError::Config("scheduler queue closed".into()))?;
        Ok(())
    }

    /// Spawns the four tier workers. Call once; later calls are no-ops.
    pub fn start(
        &self,
        dispatcher: Arc<dyn Dispatcher>,
        escalations: mpsc::UnboundedSender<EscalationEvent>,
    ) {
        let Some(receivers) = self.receivers.lock().take() else {
            warn!("scheduler already started");
            return;
        };
        for (tier, rx) in receivers {
            let Some(requeue) = self.senders.get(&tier).cloned() else {
                continue;
            };
            let worker = TierWorker {
                tier,
                store: self.store.clone(),
                dispatcher: dispatcher.clone(),
                escalations: escalations.clone(),
                requeue,
                backoff: self.backoff,
            };
            tokio::spawn(worker.run(rx));
        }
    }
}

struct TierWorker {
    tier: TaskPriority,
    store: Arc<TaskStore>,
    dispatcher: Arc<dyn Dispatcher>,
    escalations: mpsc::UnboundedSender<EscalationEvent>,
    requeue: mpsc::UnboundedSender<Uuid>,
    backoff: Duration,
}

impl TierWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Uuid>) {
        debug!(tier = %self.tier, "tier worker started");
        while let Some(task_id) = rx.recv().await {
            let task = match self.store.get(task_id) {
                Ok(task) => task,
                Err(_) => continue, // archived while queued
            };
            if task.is_terminal() {
                continue; // cancelled or timed out while queued
            }
            match DependencyResolver::check(&self.store, &task) {
                DepState::Ready => {
                    if let Err(e) = self.dispatcher.dispatch(task_id).await {
                        error!(task_id = %task_id, tier = %self.tier, error = %e, "dispatch failed");
                    }
                }
                DepState::Waiting(dep) => {
                    debug!(
                        task_id = %task_id,
                        error = %TriagentError::DependencyUnsatisfied(dep),
                        "requeueing"
                    );
                    tokio::time::sleep(self.backoff).await;
                    let _ = self.requeue.send(task_id);
                }
                DepState::Unsatisfiable(dep) => {
                    let _ = self.escalations.send(EscalationEvent::new(
                        task_id,
                        EscalationTrigger::ProcessingError,
                        TriagentError::DependencyUnsatisfied(dep).to_string(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PMutex;
    use triagent_core::{Payload, TaskOutcome, TaskStatus};

    /// Records dispatch order and marks tasks completed.
    struct Recorder {
        store: Arc<TaskStore>,
        order: PMutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl Dispatcher for Recorder {
        async fn dispatch(&self, task_id: Uuid) -> TriagentResult<()> {
            self.order.lock().push(task_id);
            self.store.update_status(
                task_id,
                TaskStatus::Completed,
                Some(TaskOutcome::Success {
                    result: Payload::new(),
                }),
            )?;
            Ok(())
        }
    }

    fn fixture() -> (Arc<TaskStore>, Arc<AuditLog>, PriorityScheduler) {
        let store = Arc::new(TaskStore::new());
        let audit = Arc::new(AuditLog::in_memory());
        let scheduler = PriorityScheduler::new(
            store.clone(),
            audit.clone(),
            Duration::from_millis(20),
        );
        (store, audit, scheduler)
    }

    async fn wait_terminal(store: &TaskStore, ids: &[Uuid]) {
        for _ in 0..100 {
            if ids.iter().all(|id| {
                store
                    .get(*id)
                    .map(|t| t.is_terminal())
                    .unwrap_or(false)
            }) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("tasks did not reach a terminal state");
    }

    #[tokio::test]
    async fn test_same_tier_strict_fifo() {
        let (store, _audit, scheduler) = fixture();
        let recorder = Arc::new(Recorder {
            store: store.clone(),
            order: PMutex::new(Vec::new()),
        });
        let (esc_tx, _esc_rx) = mpsc::unbounded_channel();

        let first = store
            .create(Task::new("s", "t", "a", Payload::new(), TaskPriority::Normal))
            .unwrap();
        let second = store
            .create(Task::new("s", "t", "b", Payload::new(), TaskPriority::Normal))
            .unwrap();
        scheduler.enqueue(&first).unwrap();
        scheduler.enqueue(&second).unwrap();
        scheduler.start(recorder.clone(), esc_tx);

        wait_terminal(&store, &[first.task_id, second.task_id]).await;
        assert_eq!(*recorder.order.lock(), vec![first.task_id, second.task_id]);
    }

    #[tokio::test]
    async fn test_critical_not_blocked_by_normal_backlog() {
        let (store, _audit, scheduler) = fixture();
        let recorder = Arc::new(Recorder {
            store: store.clone(),
            order: PMutex::new(Vec::new()),
        });
        let (esc_tx, _esc_rx) = mpsc::unbounded_channel();

        let mut backlog = Vec::new();
        for _ in 0..50 {
            let t = store
                .create(Task::new("s", "t", "n", Payload::new(), TaskPriority::Normal))
                .unwrap();
            scheduler.enqueue(&t).unwrap();
            backlog.push(t.task_id);
        }
        let critical = store
            .create(Task::new("s", "t", "c", Payload::new(), TaskPriority::Critical))
            .unwrap();
        scheduler.enqueue(&critical).unwrap();
        scheduler.start(recorder.clone(), esc_tx);

        wait_terminal(&store, &[critical.task_id]).await;
        // The critical task must not sit behind the whole normal backlog.
        let order = recorder.order.lock();
        let pos = order
            .iter()
            .position(|id| *id == critical.task_id)
            .unwrap();
        assert!(pos < backlog.len());
    }

    #[tokio::test]
    async fn test_unmet_dependency_requeues_until_ready() {
        let (store, _audit, scheduler) = fixture();
        let recorder = Arc::new(Recorder {
            store: store.clone(),
            order: PMutex::new(Vec::new()),
        });
        let (esc_tx, _esc_rx) = mpsc::unbounded_channel();

        let dep = store
            .create(Task::new("s", "t", "dep", Payload::new(), TaskPriority::Normal))
            .unwrap();
        let dependent = store
            .create(
                Task::new("s", "t", "child", Payload::new(), TaskPriority::Critical)
                    .with_dependencies(vec![dep.task_id]),
            )
            .unwrap();

        scheduler.enqueue(&dependent).unwrap();
        scheduler.start(recorder.clone(), esc_tx);

        // Let the dependent task spin through a few backoff cycles first.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!store.get(dependent.task_id).unwrap().is_terminal());

        scheduler.enqueue(&dep).unwrap();
        wait_terminal(&store, &[dep.task_id, dependent.task_id]).await;
        assert_eq!(
            *recorder.order.lock(),
            vec![dep.task_id, dependent.task_id]
        );
    }

    #[tokio::test]
    async fn test_unsatisfiable_dependency_escalates() {
        let (store, _audit, scheduler) = fixture();
        let recorder = Arc::new(Recorder {
            store: store.clone(),
            order: PMutex::new(Vec::new()),
        });
        let (esc_tx, mut esc_rx) = mpsc::unbounded_channel();

        let dep = store
            .create(Task::new("s", "t", "dep", Payload::new(), TaskPriority::Normal))
            .unwrap();
        store
            .update_status(
                dep.task_id,
                TaskStatus::Failed,
                Some(TaskOutcome::Failure {
                    error: "boom".into(),
                }),
            )
            .unwrap();
        let dependent = store
            .create(
                Task::new("s", "t", "child", Payload::new(), TaskPriority::Normal)
                    .with_dependencies(vec![dep.task_id]),
            )
            .unwrap();

        scheduler.enqueue(&dependent).unwrap();
        scheduler.start(recorder, esc_tx);

        let event = tokio::time::timeout(Duration::from_secs(1), esc_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.task_id, dependent.task_id);
        assert_eq!(event.trigger, EscalationTrigger::ProcessingError);
        assert_eq!(
            event.reason,
            TriagentError::DependencyUnsatisfied(dep.task_id).to_string()
        );
    }
}
