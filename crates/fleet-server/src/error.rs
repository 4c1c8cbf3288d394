use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fleet_core::FleetError;

// ---------------------------------------------------------------------------
// AppError — unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(FleetError::Validation(msg.into()).into())
    }
}

fn status_for(e: &FleetError) -> StatusCode {
    match e {
        FleetError::NotInitialized | FleetError::Validation(_) => StatusCode::BAD_REQUEST,
        FleetError::Conflict { .. } => StatusCode::CONFLICT,
        FleetError::AgentNotFound(_) | FleetError::ResourceNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        FleetError::Offline(_) => StatusCode::SERVICE_UNAVAILABLE,
        FleetError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        FleetError::Remote { .. } => StatusCode::BAD_GATEWAY,
        FleetError::Transport(_)
        | FleetError::Store(_)
        | FleetError::Decode(_)
        | FleetError::Io(_)
        | FleetError::Yaml(_)
        | FleetError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<FleetError>() {
            Some(e) => status_for(e),
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::warn!(%status, error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
