use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use triagent_core::{Payload, TriagentError, TriagentResult};

/// A locally registered task handler, used as the fallback execution path
/// when the remote agent is unreachable.
///
/// Handlers are opaque to the core: they accept a decrypted payload and
/// return either a result map (optionally carrying a numeric `confidence`
/// and severity indicators) or an error string.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Executes one task.
    async fn handle(&self, task_type: &str, payload: &Payload) -> Result<Payload, String>;
}

/// Explicit handler table keyed by `task_type`, populated at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a task type, replacing any previous one.
    pub fn register(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.write().insert(task_type.into(), handler);
    }

    /// Looks up the handler for a task type.
    pub fn get(&self, task_type: &str) -> TriagentResult<Arc<dyn TaskHandler>> {
        self.handlers.read().get(task_type).cloned().ok_or_else(|| {
            TriagentError::Config(format!("no handler registered for task type '{task_type}'"))
        })
    }

    /// True when a handler is registered for the task type.
    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.read().contains_key(task_type)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// True when no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}
