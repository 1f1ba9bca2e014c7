use atelier_orchestrator::{OrchestrationError, ValidationError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Error returned by the HTTP handlers and middleware.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("rate limit exceeded")]
    RateLimited,
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Orchestration(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Orchestration(OrchestrationError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Orchestration(OrchestrationError::SynthesisFailed { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::Orchestration(OrchestrationError::DeadlineExceeded { .. }) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Orchestration(OrchestrationError::Validation(e)) => json!({
                "error": "validation_error",
                "detail": e.to_string(),
            }),
            ApiError::Orchestration(e) => {
                let reason = match e {
                    OrchestrationError::SynthesisFailed { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                json!({
                    "error": e.kind(),
                    "stage": e.stage(),
                    "reason": reason,
                    "traceId": e.trace_id(),
                    "agentResults": e.agent_results(),
                })
            }
            ApiError::Unauthorized(detail) => json!({
                "error": "unauthorized",
                "detail": detail,
            }),
            ApiError::RateLimited => json!({
                "error": "rate_limited",
                "detail": self.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}
