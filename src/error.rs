//! Error taxonomy shared by conversions, job records and the HTTP layer.
//!
//! A single [`JobError`] carries a closed [`ErrorCode`] from the conversion
//! function through the stored job record to the response body, so clients
//! always see the same `{code, message}` shape.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed set of machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed submission, rejected before a record exists.
    Validation,
    NotFound,
    /// Download requested before the job succeeded.
    NotReady,
    Forbidden,
    QueueFull,
    /// The conversion rejected its input.
    BadInput,
    /// The conversion does not support the requested options.
    Unsupported,
    /// Generic conversion failure.
    Execution,
    Timeout,
    Cancelled,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "validation",
            ErrorCode::NotFound => "not_found",
            ErrorCode::NotReady => "not_ready",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::QueueFull => "queue_full",
            ErrorCode::BadInput => "bad_input",
            ErrorCode::Unsupported => "unsupported",
            ErrorCode::Execution => "execution",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure description.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct JobError {
    pub code: ErrorCode,
    pub message: String,
}

impl JobError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotReady, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadInput, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Execution, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

/// Conversion code built on `anyhow` reports through this conversion.
///
/// The full context chain is kept in the message; codes other than
/// `execution` must be constructed explicitly.
impl From<anyhow::Error> for JobError {
    fn from(e: anyhow::Error) -> Self {
        JobError::execution(format!("{:#}", e))
    }
}

/// Rejected state-machine transition. Always a programming error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition for job {job_id}: {from} -> {to}")]
pub struct TransitionError {
    pub job_id: String,
    pub from: String,
    pub to: String,
}
