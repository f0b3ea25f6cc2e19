//! API error types and JSON error response formatting.
//!
//! Every failure leaves the server as `{"error": <code>, "message": <text>}`
//! with a matching status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use confab_chat::ChatError;
use confab_core::error::ConfabError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g. "bad_request", "conflict").
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400 - missing or invalid parameters.
    BadRequest(String),
    /// 401 - missing or wrong bearer token.
    Unauthorized(String),
    /// 404 - resource does not exist.
    NotFound(String),
    /// 409 - another operation is in flight.
    Conflict(String),
    /// 500 - persistence failure or unexpected server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<ConfabError> for ApiError {
    fn from(err: ConfabError) -> Self {
        match &err {
            ConfabError::Config(msg) => ApiError::BadRequest(msg.clone()),
            ConfabError::NotFound(msg) => ApiError::NotFound(msg.clone()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::InvalidKind(_) => ApiError::BadRequest(err.to_string()),
            ChatError::SessionNotFound(_) | ChatError::MessageNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
