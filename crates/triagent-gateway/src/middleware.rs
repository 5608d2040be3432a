use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;
use tracing::warn;
use triagent_orchestrator::Orchestrator;

/// The authenticated caller, injected into request extensions by
/// [`auth_middleware`].
///
/// API-key callers carry no capability restriction; token callers are
/// limited to the capabilities baked into their token.
#[derive(Debug, Clone)]
pub struct AuthIdentity {
    /// Authenticated agent id.
    pub agent_id: String,
    /// Capability scope, `None` for full API-key access.
    pub capabilities: Option<Vec<String>>,
}

impl AuthIdentity {
    /// True when this identity may act on the given capability.
    pub fn allows(&self, capability: &str) -> bool {
        match &self.capabilities {
            None => true,
            Some(caps) => caps.iter().any(|c| c == capability),
        }
    }
}

/// Authenticates task-surface requests.
///
/// Accepts either `Authorization: Bearer <token>` or the
/// `X-API-Key`/`X-Agent-ID` header pair, and rejects everything else
/// with 401 before the handler runs.
pub async fn auth_middleware(
    State(orch): State<Arc<Orchestrator>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(&orch, &headers) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(reason) => {
            warn!("rejected request: {reason}");
            unauthorized(&reason)
        }
    }
}

fn authenticate(orch: &Orchestrator, headers: &HeaderMap) -> Result<AuthIdentity, String> {
    if let Some(token) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        let claims = orch
            .validate_token(token)
            .map_err(|e| format!("invalid token: {e}"))?;
        return Ok(AuthIdentity {
            agent_id: claims.agent_id,
            capabilities: Some(claims.capabilities),
        });
    }

    let api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    let agent_id = headers.get("x-agent-id").and_then(|v| v.to_str().ok());
    match (agent_id, api_key) {
        (Some(agent_id), Some(api_key)) => {
            if orch.verify_api_key(agent_id, api_key) {
                Ok(AuthIdentity {
                    agent_id: agent_id.to_string(),
                    capabilities: None,
                })
            } else {
                Err("invalid API key".to_string())
            }
        }
        _ => Err("missing credentials".to_string()),
    }
}

/// 401 with a JSON error body.
pub fn unauthorized(reason: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": reason })),
    )
        .into_response()
}
