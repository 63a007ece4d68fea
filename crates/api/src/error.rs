//! API error type
//!
//! Thin translation from `CommerceError` (and local failures) to the
//! structured `{error}` body the generic handler contract requires.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use coda_commerce::CommerceError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Commerce(#[from] CommerceError),

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Commerce(e) => {
                let status = StatusCode::from_u16(e.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                // 5xx details stay in the logs, not the response body.
                let message = if status.is_server_error() {
                    tracing::error!(error = %e, "Commerce operation failed");
                    "internal server error".to_string()
                } else {
                    e.to_string()
                };
                (status, message)
            }
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal API error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
