use thiserror::Error;
use uuid::Uuid;

/// A convenience `Result` alias using [`TriagentError`].
pub type TriagentResult<T> = Result<T, TriagentError>;

/// Top-level error type for the Triagent framework.
///
/// Each variant corresponds to a failure class in the task lifecycle.
/// Transient variants ([`TriagentError::DependencyUnsatisfied`], first-attempt
/// unreachability) are retried internally and never surfaced to callers.
#[derive(Debug, Error)]
pub enum TriagentError {
    /// Bad API key, or an expired, malformed, or under-scoped token.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Unknown task id on lookup or update.
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// A prerequisite task has not reached `completed`. Transient while the
    /// prerequisite is still running; permanent once it fails.
    #[error("prerequisite task {0} has not completed")]
    DependencyUnsatisfied(Uuid),

    /// A task exceeded its priority-derived deadline.
    #[error("task timeout: {0}")]
    Timeout(String),

    /// The target agent could not be reached after the retry budget.
    #[error("Agent unreachable: {0}")]
    AgentUnreachable(String),

    /// A result failed validation (low confidence or critical finding).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A field-level encryption or decryption failure.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
