use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use stepwise_core::error::EngineError;

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if let Some(e) = self.0.downcast_ref::<EngineError>() {
            match e {
                EngineError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
                EngineError::InstanceNotFound(_) => StatusCode::NOT_FOUND,
                EngineError::InstanceNotRunning { .. } => StatusCode::CONFLICT,
                EngineError::Store(_)
                | EngineError::Orchestration(_)
                | EngineError::InvalidConfig(_)
                | EngineError::Io(_)
                | EngineError::Yaml(_)
                | EngineError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
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
