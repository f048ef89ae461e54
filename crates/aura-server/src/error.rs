use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use aura_core::error::ValidationErrors;
use aura_core::FunnelError;

/// Application-level errors that map directly to HTTP responses.
///
/// Every variant implements [`IntoResponse`] so Axum handlers can use
/// `Result<impl IntoResponse, AppError>` as their return type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("unauthorized")]
    Unauthorized,

    /// Admin endpoints are disabled when no admin token is configured.
    #[error("forbidden")]
    Forbidden,

    #[error("webhook target rejected: {0}")]
    TargetRejected(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<FunnelError> for AppError {
    fn from(e: FunnelError) -> Self {
        match e {
            FunnelError::Validation(errors) => AppError::Validation(errors),
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut field = None;
        let (status, code, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Validation(errors) => {
                let first = errors.first();
                field = first.map(|e| e.field);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "validation_error",
                    first
                        .map(|e| e.message.to_string())
                        .unwrap_or_else(|| errors.to_string()),
                )
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Unauthorized".to_string(),
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden", "Forbidden".to_string()),
            AppError::TargetRejected(msg) => {
                (StatusCode::BAD_REQUEST, "target_rejected", msg.clone())
            }
            AppError::Upstream(msg) => {
                tracing::warn!("Upstream error: {msg}");
                (StatusCode::BAD_GATEWAY, "upstream_error", msg.clone())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message,
                    "field": field
                }
            })),
        )
            .into_response()
    }
}
