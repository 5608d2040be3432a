use crate::escalation::{EscalationEvent, EscalationTrigger};
use crate::store::TaskStore;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use triagent_core::{Task, TriagentError};
use uuid::Uuid;

/// Per-task deadline timers.
///
/// Arms one cancellable deferred trigger per task at creation. If the
/// deadline elapses while the task is still non-terminal, a `timeout`
/// escalation is posted. Cancellation happens on the first terminal
/// transition and is an idempotent no-op if the timer already fired.
pub struct TimeoutMonitor {
    store: Arc<TaskStore>,
    escalations: mpsc::UnboundedSender<EscalationEvent>,
    pending: DashMap<Uuid, oneshot::Sender<()>>,
}

impl TimeoutMonitor {
    /// Creates a monitor posting timeout triggers to `escalations`.
    pub fn new(store: Arc<TaskStore>, escalations: mpsc::UnboundedSender<EscalationEvent>) -> Self {
        Self {
            store,
            escalations,
            pending: DashMap::new(),
        }
    }

    /// Arms the deadline timer for a task. Must run within a tokio runtime.
    pub fn arm(self: &Arc<Self>, task: &Task) {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        self.pending.insert(task.task_id, cancel_tx);

        let monitor = Arc::clone(self);
        let task_id = task.task_id;
        let deadline = Duration::from_secs(task.timeout_seconds);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => {
                    monitor.pending.remove(&task_id);
                    monitor.fire(task_id, deadline);
                }
                _ = cancel_rx => {
                    debug!(task_id = %task_id, "timeout timer cancelled");
                }
            }
        });
    }

    /// Cancels a task's timer. Safe to call after the timer fired.
    pub fn cancel(&self, task_id: Uuid) {
        if let Some((_, cancel_tx)) = self.pending.remove(&task_id) {
            let _ = cancel_tx.send(());
        }
    }

    /// Timers currently armed.
    pub fn armed_count(&self) -> usize {
        self.pending.len()
    }

    fn fire(&self, task_id: Uuid, deadline: Duration) {
        let still_running = self
            .store
            .get(task_id)
            .map(|t| !t.is_terminal())
            .unwrap_or(false);
        if still_running {
            let error = TriagentError::Timeout(format!(
                "no completion within {}s",
                deadline.as_secs()
            ));
            let _ = self.escalations.send(EscalationEvent::new(
                task_id,
                EscalationTrigger::Timeout,
                error.to_string(),
            ));
        }
    }
}
