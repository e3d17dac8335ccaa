//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use loch_scheduler::SchedulerError;
use serde_json::json;
use tracing::error;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Scheduling client errors, unknown job ids included, are 400s.
impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        if err.is_client_error() {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl From<loch_core::Error> for ApiError {
    fn from(err: loch_core::Error) -> Self {
        match err {
            loch_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            loch_core::Error::Internal(msg) => ApiError::Internal(msg),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<loch_db::DbError> for ApiError {
    fn from(err: loch_db::DbError) -> Self {
        match err {
            loch_db::DbError::NotFound(msg) => ApiError::NotFound(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
