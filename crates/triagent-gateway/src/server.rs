use crate::error::ApiError;
use crate::middleware::{auth_middleware, unauthorized, AuthIdentity};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware as axum_mw;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use triagent_core::{
    AgentCard, MedicalContext, Payload, TaskOutcome, TaskPriority, TaskStatus, TriagentError,
};
use triagent_orchestrator::{Orchestrator, TaskSpec};
use uuid::Uuid;

/// The gateway route table.
pub struct GatewayServer;

impl GatewayServer {
    /// Builds the router. Task-surface routes go through the auth
    /// middleware; discovery and health routes do not.
    pub fn build(orch: Arc<Orchestrator>) -> Router {
        let protected = Router::new()
            .route("/tasks", post(create_task))
            .route("/tasks/{task_id}", get(get_task))
            .route("/tasks/{task_id}/status", put(update_task_status))
            .layer(axum_mw::from_fn_with_state(orch.clone(), auth_middleware));

        Router::new()
            .route("/agent-card", get(agent_card))
            .route("/agents/register", post(register_agent))
            .route("/auth/token", post(issue_token))
            .route("/health", get(health))
            .route("/status", get(status))
            .merge(protected)
            .with_state(orch)
    }
}

#[derive(Debug, Deserialize)]
struct CreateTaskRequest {
    agent_from: String,
    /// Defaults to the hosting agent when absent.
    agent_to: Option<String>,
    task_type: String,
    #[serde(default)]
    payload: Payload,
    priority: Option<TaskPriority>,
    medical_context: Option<MedicalContext>,
}

async fn create_task(
    State(orch): State<Arc<Orchestrator>>,
    Extension(identity): Extension<AuthIdentity>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Response, ApiError> {
    // Token callers may only submit task types within their scope.
    if !identity.allows(&req.task_type) {
        return Ok(unauthorized(&format!(
            "token lacks capability '{}'",
            req.task_type
        )));
    }

    let target = req
        .agent_to
        .unwrap_or_else(|| orch.card().agent_id.clone());
    let mut spec = TaskSpec::new(req.task_type, target).with_payload(req.payload);
    spec.priority = req.priority;
    let task = orch.create_task(&req.agent_from, spec, req.medical_context, None)?;
    info!(task_id = %task.task_id, caller = %identity.agent_id, "task accepted");

    let body = Json(serde_json::json!({
        "task_id": task.task_id,
        "status": task.status,
        "created_at": task.created_at,
    }));
    Ok((StatusCode::CREATED, body).into_response())
}

async fn get_task(
    State(orch): State<Arc<Orchestrator>>,
    Path(task_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let task = orch.store().get(task_id)?;
    Ok(Json(task).into_response())
}

#[derive(Debug, Deserialize)]
struct StatusReport {
    status: TaskStatus,
    result: Option<Payload>,
    error: Option<String>,
}

async fn update_task_status(
    State(orch): State<Arc<Orchestrator>>,
    Path(task_id): Path<Uuid>,
    Json(report): Json<StatusReport>,
) -> Result<Response, ApiError> {
    let outcome = match (report.result, report.error) {
        (Some(result), _) => Some(TaskOutcome::Success { result }),
        (None, Some(error)) => Some(TaskOutcome::Failure { error }),
        (None, None) => None,
    };
    let task = orch.report_status(task_id, report.status, outcome)?;
    Ok(Json(task).into_response())
}

async fn agent_card(State(orch): State<Arc<Orchestrator>>) -> Json<AgentCard> {
    Json(orch.card().clone())
}

async fn register_agent(
    State(orch): State<Arc<Orchestrator>>,
    Json(card): Json<AgentCard>,
) -> Response {
    let agent_id = card.agent_id.clone();
    let api_key = orch.register_agent(card);
    info!(agent_id = %agent_id, "agent registered");
    let body = Json(serde_json::json!({
        "agent_id": agent_id,
        "api_key": api_key,
    }));
    (StatusCode::CREATED, body).into_response()
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    agent_id: String,
    api_key: String,
}

async fn issue_token(
    State(orch): State<Arc<Orchestrator>>,
    Json(req): Json<TokenRequest>,
) -> Result<Response, ApiError> {
    let token = orch
        .issue_token(&req.agent_id, &req.api_key)
        .map_err(|_| TriagentError::Authentication("invalid agent id or API key".into()))?;
    Ok(Json(token).into_response())
}

async fn health(State(orch): State<Arc<Orchestrator>>) -> Response {
    Json(serde_json::json!({
        "status": "healthy",
        "agent_id": orch.card().agent_id,
        "timestamp": Utc::now(),
    }))
    .into_response()
}

async fn status(State(orch): State<Arc<Orchestrator>>) -> Response {
    let snapshot = orch.status_snapshot();
    Json(serde_json::json!({
        "registered_agents": snapshot.registered_agents,
        "pending_tasks": snapshot.pending_tasks,
        "total_tasks": snapshot.total_tasks,
        "failure_counts": snapshot.failure_counts,
        "agent_card": orch.card(),
    }))
    .into_response()
}
