//! Queue errors.

use thiserror::Error;
use uuid::Uuid;

use crate::task::TaskStatus;

/// Queue error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Task rejected before reaching the store.
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// Reevaluation delay not representable as an instant.
    #[error("Invalid reevaluation delay: {0}")]
    InvalidDelay(String),

    /// Dequeue filter rejected.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Payload key unusable as a field path.
    #[error("Invalid filter key: {0:?}")]
    InvalidFilterKey(String),

    /// Task unknown or not in the status the transition requires.
    #[error("Task {id} not found or not {expected}")]
    Conflict { id: Uuid, expected: TaskStatus },

    /// Backing store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Blocking dequeue interrupted by broker shutdown.
    #[error("Dequeue cancelled")]
    Cancelled,
}

/// Status text read back from the store that names no known status.
#[derive(Debug, Error)]
#[error("unknown task status: {0}")]
pub struct UnknownStatus(pub String);
