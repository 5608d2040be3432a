use chrono::{Duration, Utc};
use parking_lot::RwLock;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::info;
use triagent_core::{EventType, LifecycleEvent, TaskStage};
use uuid::Uuid;

/// Append-only audit log recording every lifecycle transition.
///
/// Keeps an in-memory history for task reconstruction and, when a log
/// directory is configured, streams entries to `audit.jsonl` via a
/// background writer. Recording never fails the caller's operation.
pub struct AuditLog {
    sink: Option<mpsc::UnboundedSender<LifecycleEvent>>,
    history: RwLock<Vec<LifecycleEvent>>,
}

impl AuditLog {
    /// Creates an in-memory log with no disk sink.
    pub fn in_memory() -> Self {
        Self {
            sink: None,
            history: RwLock::new(Vec::new()),
        }
    }

    /// Creates a log that also appends JSONL entries under `log_dir`.
    ///
    /// Spawns a background writer; must be called within a tokio runtime.
    pub fn with_dir(log_dir: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LifecycleEvent>();

        tokio::spawn(async move {
            let _ = tokio::fs::create_dir_all(&log_dir).await;
            let log_file = log_dir.join("audit.jsonl");

            while let Some(event) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&event) {
                    use tokio::io::AsyncWriteExt;
                    match tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&log_file)
                        .await
                    {
                        Ok(mut file) => {
                            let _ = file.write_all(format!("{line}\n").as_bytes()).await;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "audit writer: open failed");
                        }
                    }
                }
            }
        });

        Self {
            sink: Some(tx),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Appends an event. Never fails; sink errors are swallowed.
    pub fn record(&self, event: LifecycleEvent) {
        info!(
            task_id = %event.task_id,
            event_type = ?event.event_type,
            "audit"
        );
        if let Some(tx) = &self.sink {
            let _ = tx.send(event.clone());
        }
        self.history.write().push(event);
    }

    /// Convenience wrapper building and appending an event.
    pub fn record_event(
        &self,
        task_id: Uuid,
        event_type: EventType,
        stage: Option<TaskStage>,
        actor: Option<&str>,
        details: serde_json::Value,
    ) {
        let mut event = LifecycleEvent::new(task_id, event_type).with_details(details);
        if let Some(stage) = stage {
            event = event.at_stage(stage);
        }
        if let Some(actor) = actor {
            event = event.by(actor);
        }
        self.record(event);
    }

    /// Full recorded history of a task, in append order.
    pub fn events_for_task(&self, task_id: Uuid) -> Vec<LifecycleEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }

    /// All events of a given type, in append order.
    pub fn events_of_type(&self, event_type: EventType) -> Vec<LifecycleEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Total recorded events.
    pub fn len(&self) -> usize {
        self.history.read().len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.history.read().is_empty()
    }

    /// Bulk retention sweep: drops in-memory events older than `max_age`.
    pub fn purge_older_than(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut history = self.history.write();
        let before = history.len();
        history.retain(|e| e.timestamp >= cutoff);
        before - history.len()
    }
}
