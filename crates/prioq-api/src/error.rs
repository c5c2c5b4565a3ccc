//! API error types and their HTTP rendering.

use std::collections::BTreeMap;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use prioq_queue::QueueError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Field name to reason.
pub type Problems = BTreeMap<String, String>;

/// API error types.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Body could not be decoded.
    #[error("decode json: {0}")]
    Decode(String),

    /// One or more fields failed validation.
    #[error("invalid request: {} problems", .0.len())]
    Validation(Problems),

    /// Missing or unknown api key.
    #[error("invalid api key")]
    Unauthorized,

    /// Task not in the status the operation requires.
    #[error("{0}")]
    Conflict(String),

    /// Store failure.
    #[error("{0}")]
    Internal(String),

    /// Broker is shutting down.
    #[error("broker is shutting down")]
    Unavailable,
}

impl ApiError {
    /// A single-field validation failure.
    pub fn problem(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation(Problems::from([(field.to_string(), reason.into())]))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Decode(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::InvalidTask(reason) => Self::problem("payload", reason),
            QueueError::InvalidDelay(reason) => Self::problem("reevaluation", reason),
            QueueError::InvalidFilter(reason) => Self::problem("queue_types", reason),
            QueueError::InvalidFilterKey(_) => Self::problem("key", err.to_string()),
            QueueError::Conflict { .. } => Self::Conflict(err.to_string()),
            QueueError::Store(_) => Self::Internal(err.to_string()),
            QueueError::Cancelled => Self::Unavailable,
        }
    }
}

/// Failure envelope shared by every endpoint.
#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    problems: Option<Problems>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), "{}", self);
        }

        let message = self.to_string();
        let problems = match self {
            Self::Validation(problems) => Some(problems),
            _ => None,
        };

        let body = ErrorBody {
            success: false,
            message,
            problems,
        };
        (status, Json(body)).into_response()
    }
}
