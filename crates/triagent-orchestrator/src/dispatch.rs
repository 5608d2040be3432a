use crate::escalation::{EscalationEvent, EscalationTrigger};
use crate::handler::HandlerRegistry;
use crate::registry::AgentRegistry;
use crate::scheduler::Dispatcher;
use crate::store::TaskStore;
use crate::timeout::TimeoutMonitor;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use triagent_core::{
    DispatchPath, EventType, Payload, Task, TaskOutcome, TaskStage, TaskStatus, TriagentError,
    TriagentResult,
};
use triagent_security::{AuditLog, FieldCipher, TokenIssuer};
use uuid::Uuid;

/// Results below this confidence are flagged for human review.
pub const CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Severity grade treated as a critical medical finding.
pub const MAX_SEVERITY_GRADE: i64 = 5;

/// Tuning knobs for the dispatch path.
pub struct DispatchOptions {
    /// Agent id used as the token subject for outbound calls.
    pub self_agent_id: String,
    /// Remote attempts before falling back to a local handler.
    pub max_retries: u32,
    /// Pause between remote attempts.
    pub retry_backoff: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            self_agent_id: "orchestrator".to_string(),
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// Reply shape expected from a remote agent's execute endpoint.
#[derive(Debug, Deserialize)]
struct AgentReply {
    result: Option<Payload>,
    confidence: Option<f64>,
    error: Option<String>,
}

enum DispatchFailure {
    /// The handler ran and reported an error.
    Handler(String),
    /// The agent could not be reached and no local fallback exists.
    Unreachable(String),
}

/// Executes tasks: remote RPC to the target agent first, local handler
/// fallback on unreachability, then result validation and the terminal
/// transition.
pub struct AgentDispatcher {
    store: Arc<TaskStore>,
    agents: Arc<AgentRegistry>,
    handlers: Arc<HandlerRegistry>,
    cipher: Arc<FieldCipher>,
    tokens: Arc<TokenIssuer>,
    audit: Arc<AuditLog>,
    timeouts: Arc<TimeoutMonitor>,
    escalations: mpsc::UnboundedSender<EscalationEvent>,
    http: reqwest::Client,
    opts: DispatchOptions,
}

impl AgentDispatcher {
    /// Creates a dispatcher.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<TaskStore>,
        agents: Arc<AgentRegistry>,
        handlers: Arc<HandlerRegistry>,
        cipher: Arc<FieldCipher>,
        tokens: Arc<TokenIssuer>,
        audit: Arc<AuditLog>,
        timeouts: Arc<TimeoutMonitor>,
        escalations: mpsc::UnboundedSender<EscalationEvent>,
        opts: DispatchOptions,
    ) -> Self {
        Self {
            store,
            agents,
            handlers,
            cipher,
            tokens,
            audit,
            timeouts,
            escalations,
            http: reqwest::Client::new(),
            opts,
        }
    }

    async fn execute(
        &self,
        task: &Task,
        payload: &Payload,
    ) -> Result<(Payload, DispatchPath), DispatchFailure> {
        if let Some(card) = self.agents.get(&task.target_agent_id) {
            match self.call_remote(&card.endpoint, task, payload).await {
                Ok(Ok(result)) => return Ok((result, DispatchPath::Remote)),
                Ok(Err(handler_error)) => return Err(DispatchFailure::Handler(handler_error)),
                Err(unreachable) => {
                    warn!(
                        task_id = %task.task_id,
                        agent = %task.target_agent_id,
                        "{unreachable}; trying local fallback"
                    );
                }
            }
        }

        match self.handlers.get(&task.task_type) {
            Ok(handler) => match handler.handle(&task.task_type, payload).await {
                Ok(result) => Ok((result, DispatchPath::LocalFallback)),
                Err(handler_error) => Err(DispatchFailure::Handler(handler_error)),
            },
            Err(_) => Err(DispatchFailure::Unreachable(
                TriagentError::AgentUnreachable(format!(
                    "no route to agent '{}' and no local handler for '{}'",
                    task.target_agent_id, task.task_type
                ))
                .to_string(),
            )),
        }
    }

    /// Outer error: unreachable after the retry budget. Inner error: the
    /// agent ran the task and reported a failure.
    async fn call_remote(
        &self,
        endpoint: &str,
        task: &Task,
        payload: &Payload,
    ) -> Result<Result<Payload, String>, TriagentError> {
        let url = format!("{}/execute", endpoint.trim_end_matches('/'));
        let token = match self.tokens.issue(
            &self.opts.self_agent_id,
            vec![task.task_type.clone()],
            None,
        ) {
            Ok(token) => token,
            Err(e) => return Ok(Err(format!("token issuance failed: {e}"))),
        };
        let body = serde_json::json!({
            "task_id": task.task_id,
            "task_type": task.task_type,
            "payload": payload,
        });

        for attempt in 1..=self.opts.max_retries {
            let sent = self
                .http
                .post(&url)
                .bearer_auth(&token.token)
                .json(&body)
                .timeout(Duration::from_secs(task.timeout_seconds))
                .send()
                .await;
            match sent {
                Ok(resp) if resp.status().is_success() => {
                    let reply: AgentReply = match resp.json().await {
                        Ok(reply) => reply,
                        Err(e) => return Ok(Err(format!("malformed agent reply: {e}"))),
                    };
                    if let Some(error) = reply.error {
                        return Ok(Err(error));
                    }
                    let mut result = reply.result.unwrap_or_default();
                    if let Some(confidence) = reply.confidence {
                        result
                            .entry("confidence".to_string())
                            .or_insert(serde_json::json!(confidence));
                    }
                    return Ok(Ok(result));
                }
                Ok(resp) => {
                    return Ok(Err(format!("agent returned HTTP {}", resp.status())));
                }
                Err(e) => {
                    warn!(
                        task_id = %task.task_id,
                        attempt,
                        error = %e,
                        "remote dispatch attempt failed"
                    );
                    if attempt < self.opts.max_retries {
                        tokio::time::sleep(self.opts.retry_backoff).await;
                    }
                }
            }
        }
        Err(TriagentError::AgentUnreachable(format!(
            "agent '{}' gave no response after {} attempts",
            task.target_agent_id, self.opts.max_retries
        )))
    }
}

/// Classifies a result for escalation. Critical findings take precedence
/// over low confidence.
fn validate_result(result: &Payload) -> Option<(EscalationTrigger, String)> {
    if is_critical_finding(result) {
        return Some((
            EscalationTrigger::CriticalResult,
            "result indicates a critical medical finding".to_string(),
        ));
    }
    if let Some(confidence) = result.get("confidence").and_then(serde_json::Value::as_f64) {
        if confidence < CONFIDENCE_THRESHOLD {
            return Some((
                EscalationTrigger::LowConfidence,
                format!("confidence {confidence:.2} below threshold {CONFIDENCE_THRESHOLD:.2}"),
            ));
        }
    }
    None
}

fn is_critical_finding(result: &Payload) -> bool {
    let severity_critical = result
        .get("severity")
        .and_then(serde_json::Value::as_str)
        .is_some_and(|s| s.eq_ignore_ascii_case("critical") || s.eq_ignore_ascii_case("emergency"));
    let grade_maxed = result
        .get("severity_grade")
        .and_then(serde_json::Value::as_i64)
        .is_some_and(|g| g >= MAX_SEVERITY_GRADE);
    severity_critical || grade_maxed
}

#[async_trait]
impl Dispatcher for AgentDispatcher {
    async fn dispatch(&self, task_id: Uuid) -> TriagentResult<()> {
        let task = self.store.get(task_id)?;
        if task.status != TaskStatus::Pending {
            return Ok(());
        }
        if !self.store.update_status(task_id, TaskStatus::InProgress, None)? {
            return Ok(()); // timed out or cancelled while queued
        }
        self.store.advance_stage(task_id, TaskStage::Assigned)?;
        self.audit.record_event(
            task_id,
            EventType::StatusChanged,
            Some(TaskStage::Assigned),
            Some(&task.target_agent_id),
            serde_json::json!({ "to": "in_progress" }),
        );

        let mut payload = task.payload.clone();
        for field in self.cipher.open_payload(&mut payload) {
            self.audit.record_event(
                task_id,
                EventType::DecryptFailed,
                Some(TaskStage::Processing),
                None,
                serde_json::json!({ "field": field }),
            );
        }
        self.store.advance_stage(task_id, TaskStage::Processing)?;

        match self.execute(&task, &payload).await {
            Ok((result, path)) => {
                self.store.set_dispatch_path(task_id, path)?;
                self.store.advance_stage(task_id, TaskStage::Validating)?;
                let escalation = validate_result(&result);
                let completed = self.store.update_status(
                    task_id,
                    TaskStatus::Completed,
                    Some(TaskOutcome::Success { result }),
                )?;
                if completed {
                    self.timeouts.cancel(task_id);
                    self.store.advance_stage(task_id, TaskStage::Completing)?;
                    self.audit.record_event(
                        task_id,
                        EventType::StatusChanged,
                        Some(TaskStage::Completing),
                        Some(&task.target_agent_id),
                        serde_json::json!({ "to": "completed", "path": path }),
                    );
                    info!(task_id = %task_id, path = ?path, "task completed");
                    if let Some((trigger, reason)) = escalation {
                        let _ = self
                            .escalations
                            .send(EscalationEvent::new(task_id, trigger, reason));
                    }
                }
            }
            Err(DispatchFailure::Handler(error)) => {
                let _ = self.escalations.send(EscalationEvent::new(
                    task_id,
                    EscalationTrigger::ProcessingError,
                    error,
                ));
            }
            Err(DispatchFailure::Unreachable(error)) => {
                let _ = self.escalations.send(EscalationEvent::new(
                    task_id,
                    EscalationTrigger::AgentFailure,
                    error,
                ));
            }
        }
        Ok(())
    }
}
