//! Task definition and status history.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{QueueError, UnknownStatus};

/// Task payload: a JSON object.
pub type Payload = serde_json::Map<String, Value>;

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting to be claimed.
    Enqueued,
    /// Claimed by a worker.
    Processing,
    /// Acknowledged by the worker.
    Processed,
    /// Reported failed by the worker.
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Enqueued => "Enqueued",
            TaskStatus::Processing => "Processing",
            TaskStatus::Processed => "Processed",
            TaskStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Enqueued" => Ok(TaskStatus::Enqueued),
            "Processing" => Ok(TaskStatus::Processing),
            "Processed" => Ok(TaskStatus::Processed),
            "Failed" => Ok(TaskStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One entry of a task's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: TaskStatus,
    pub timestamp: DateTime<Utc>,
    /// The task is not claimable before this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_reevaluation: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusEntry {
    pub fn new(status: TaskStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            status,
            timestamp,
            next_reevaluation: None,
            message: None,
        }
    }

    pub fn with_next_reevaluation(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.next_reevaluation = at;
        self
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }
}

/// A persisted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: String,
    /// Higher is more urgent.
    pub priority: i64,
    pub payload: Payload,
    /// Newest first, never empty.
    pub status_history: Vec<StatusEntry>,
}

impl Task {
    /// Create a task with its initial status entry.
    pub fn new(task_type: impl Into<String>, priority: i64, payload: Payload, initial: StatusEntry) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            priority,
            payload,
            status_history: vec![initial],
        }
    }

    /// The most recent status entry.
    pub fn current(&self) -> &StatusEntry {
        &self.status_history[0]
    }

    pub fn status(&self) -> TaskStatus {
        self.current().status
    }

    /// Enqueued, and either never deferred or deferred to an instant already reached.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        let current = self.current();
        current.status == TaskStatus::Enqueued
            && current.next_reevaluation.is_none_or(|at| at <= now)
    }

    /// Record entries given oldest first, so the last one becomes current.
    pub fn record(&mut self, entries: impl IntoIterator<Item = StatusEntry>) {
        for entry in entries {
            self.status_history.insert(0, entry);
        }
    }

    /// The claim response: payload with `id` and `queue_type` merged in.
    pub fn into_claimed(self) -> ClaimedTask {
        let mut document = self.payload;
        document.insert("id".to_string(), Value::String(self.id.to_string()));
        document.insert("queue_type".to_string(), Value::String(self.task_type.clone()));
        ClaimedTask {
            id: self.id,
            task_type: self.task_type,
            priority: self.priority,
            document,
        }
    }
}

/// A task handed to exactly one dequeuer.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedTask {
    pub id: Uuid,
    pub task_type: String,
    pub priority: i64,
    /// Payload merged with `id` and `queue_type`.
    pub document: Payload,
}

/// Enqueue request.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: String,
    pub priority: i64,
    pub payload: Payload,
    pub reevaluation: Option<Duration>,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            task_type: task_type.into(),
            priority: 0,
            payload,
            reevaluation: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Defer eligibility; a zero delay means no deferral.
    pub fn with_reevaluation(mut self, delay: Duration) -> Self {
        self.reevaluation = (!delay.is_zero()).then_some(delay);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), QueueError> {
        if self.task_type.trim().is_empty() {
            return Err(QueueError::InvalidTask("task type is empty".to_string()));
        }
        if self.payload.is_empty() {
            return Err(QueueError::InvalidTask("payload is empty".to_string()));
        }
        Ok(())
    }
}
