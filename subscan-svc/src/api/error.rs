//! API error envelopes
//!
//! The wire contract is small and closed: bad_request with details,
//! missing/invalid bearer, not_found, queue_unavailable with the scan error
//! code, and internal_error for everything else. Internal details go to the
//! log, never to the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::ScanErrorCode;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("missing bearer token")]
    MissingBearerToken,

    #[error("invalid token")]
    InvalidToken,

    #[error("not found")]
    NotFound,

    #[error("queue unavailable")]
    QueueUnavailable(ScanErrorCode),

    /// Scan setup failed before a session existed to mark as errored; the
    /// closed scan error code rides in the envelope
    #[error("scan initialization failed: {1}")]
    ScanInit(ScanErrorCode, String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(details) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "bad_request", "details": details }),
            ),
            ApiError::MissingBearerToken => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "missing_bearer_token" }),
            ),
            ApiError::InvalidToken => {
                (StatusCode::UNAUTHORIZED, json!({ "error": "invalid_token" }))
            }
            ApiError::NotFound => (StatusCode::NOT_FOUND, json!({ "error": "not_found" })),
            ApiError::QueueUnavailable(code) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "queue_unavailable", "code": code.as_str() }),
            ),
            ApiError::ScanInit(code, ref message) => {
                tracing::error!(code = code.as_str(), message = %message, "Scan initialization failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal_error", "code": code.as_str() }),
                )
            }
            ApiError::Internal(ref err) => {
                tracing::error!(error = %err, "Internal error on API surface");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal_error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
