use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use triagent_core::TriagentError;

/// Wraps a [`TriagentError`] for use as an axum response.
///
/// Auth failures map to 401, unknown tasks to 404, malformed input to 400,
/// everything else to 500. The body is always `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError(pub TriagentError);

impl From<TriagentError> for ApiError {
    fn from(err: TriagentError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TriagentError::Authentication(_) => StatusCode::UNAUTHORIZED,
            TriagentError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            TriagentError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}
