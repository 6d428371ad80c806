//! HTTP mapping of [`JobError`].
//!
//! Every handler returns `Result<T, ApiError>`. The body is always
//! `{"error": {"code": ..., "message": ...}}`.
//!
//! **Security note:** `internal` errors are logged with full detail but the
//! client only receives a generic message, so file paths and other
//! implementation details never leak.

use crate::error::{ErrorCode, JobError};
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    Job(JobError),
    /// The framework rejected the request body before it reached a handler.
    Rejected(StatusCode, String),
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        ApiError::Job(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation
        | ErrorCode::NotReady
        | ErrorCode::BadInput
        | ErrorCode::Unsupported => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Execution | ErrorCode::Timeout | ErrorCode::Cancelled | ErrorCode::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Job(e) if e.code == ErrorCode::Internal => {
                error!(message = %e.message, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Internal,
                    "internal server error".to_owned(),
                )
            }
            ApiError::Job(e) => (status_for(e.code), e.code, e.message),
            ApiError::Rejected(status, message) => (status, ErrorCode::Validation, message),
        };
        (
            status,
            Json(json!({ "error": { "code": code, "message": message } })),
        )
            .into_response()
    }
}
