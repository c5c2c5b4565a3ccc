//! HTTP request handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use prioq_queue::{ClaimFilter, CountQuery, FilterKey, NewTask, Payload};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ApiError, Problems};
use crate::http::extract::{ApiRequest, Authorized, require};
use crate::state::AppState;

fn into_result<T>(valid: Option<T>, problems: Problems) -> Result<T, Problems> {
    match valid {
        Some(valid) if problems.is_empty() => Ok(valid),
        _ => Err(problems),
    }
}

fn parse_id(id: Option<String>, problems: &mut Problems) -> Option<Uuid> {
    let Some(id) = id.filter(|id| !id.is_empty()) else {
        require(problems, "id");
        return None;
    };
    match Uuid::parse_str(&id) {
        Ok(id) => Some(id),
        Err(_) => {
            problems.insert("id".to_string(), format!("field id is not a task id: {id:?}"));
            None
        }
    }
}

// ============================================================================
// Enqueue
// ============================================================================

/// Request to enqueue a task.
#[derive(Debug, Default, Deserialize)]
pub struct EnqueueRequest {
    pub api_key: Option<String>,

    /// Task type.
    pub queue_type: Option<String>,

    /// Higher is more urgent. Defaults to 0.
    pub priority: Option<i64>,

    /// Non-empty JSON object.
    pub payload: Option<Value>,

    /// Seconds before the task becomes claimable.
    pub reevaluation: Option<u64>,
}

impl ApiRequest for EnqueueRequest {
    type Valid = NewTask;

    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    fn validate(self) -> Result<NewTask, Problems> {
        let mut problems = Problems::new();

        let queue_type = self.queue_type.filter(|t| !t.trim().is_empty());
        if queue_type.is_none() {
            require(&mut problems, "queue_type");
        }

        let payload = match self.payload {
            Some(Value::Object(map)) if !map.is_empty() => Some(map),
            Some(Value::Object(_)) | Some(Value::Null) | None => {
                require(&mut problems, "payload");
                None
            }
            Some(_) => {
                problems.insert("payload".to_string(), "field payload must be an object".to_string());
                None
            }
        };

        let task = queue_type.zip(payload).map(|(queue_type, payload): (String, Payload)| {
            NewTask::new(queue_type, payload)
                .with_priority(self.priority.unwrap_or_default())
                .with_reevaluation(Duration::from_secs(self.reevaluation.unwrap_or_default()))
        });
        into_result(task, problems)
    }
}

/// Enqueue response.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub success: bool,

    /// Id of the new task.
    pub task_id: Uuid,
}

/// POST /api/v1/enqueue
pub async fn enqueue(
    State(state): State<Arc<AppState>>,
    Authorized(task): Authorized<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let task_id = state.queue().enqueue(task).await?;
    Ok((
        StatusCode::CREATED,
        Json(EnqueueResponse {
            success: true,
            task_id,
        }),
    ))
}

// ============================================================================
// Dequeue
// ============================================================================

/// Request to claim a task, blocking until one is available.
#[derive(Debug, Default, Deserialize)]
pub struct DequeueRequest {
    pub api_key: Option<String>,

    /// Accepted task types.
    pub queue_types: Option<Vec<String>>,

    /// Minimum priority.
    pub priority: Option<i64>,

    /// Seconds to block; absent or 0 means the configured default.
    pub timeout: Option<u64>,
}

/// A validated dequeue request.
#[derive(Debug)]
pub struct DequeueParams {
    pub filter: ClaimFilter,
    pub timeout: Option<u64>,
}

impl ApiRequest for DequeueRequest {
    type Valid = DequeueParams;

    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    fn validate(self) -> Result<DequeueParams, Problems> {
        let mut problems = Problems::new();

        let types = self.queue_types.unwrap_or_default();
        let filter = if types.is_empty() {
            require(&mut problems, "queue_types");
            None
        } else {
            match ClaimFilter::new(types, self.priority.unwrap_or_default()) {
                Ok(filter) => Some(filter),
                Err(e) => {
                    problems.insert("queue_types".to_string(), e.to_string());
                    None
                }
            }
        };

        let params = filter.map(|filter| DequeueParams {
            filter,
            timeout: self.timeout,
        });
        into_result(params, problems)
    }
}

/// Dequeue response carrying the claimed task.
#[derive(Debug, Serialize, Deserialize)]
pub struct DequeueResponse {
    pub success: bool,

    /// Task payload with `id` and `queue_type` merged in.
    pub task: Payload,
}

/// Body sent with 204 when the wait expired.
#[derive(Debug, Serialize)]
pub struct NoTasksResponse {
    pub success: bool,
    pub message: String,
}

/// POST /api/v1/dequeue
pub async fn dequeue(
    State(state): State<Arc<AppState>>,
    Authorized(params): Authorized<DequeueRequest>,
) -> Result<Response, ApiError> {
    let timeout = state.dequeue_timeout(params.timeout);

    match state.registry().dequeue(params.filter, timeout).await? {
        Some(task) => {
            debug!(task_id = %task.id, "Dequeued task");
            Ok((
                StatusCode::OK,
                Json(DequeueResponse {
                    success: true,
                    task: task.document,
                }),
            )
                .into_response())
        }
        None => Ok((
            StatusCode::NO_CONTENT,
            Json(NoTasksResponse {
                success: false,
                message: "no tasks".to_string(),
            }),
        )
            .into_response()),
    }
}

// ============================================================================
// Ack / Fail
// ============================================================================

/// Request to acknowledge a claimed task.
#[derive(Debug, Default, Deserialize)]
pub struct AckRequest {
    pub api_key: Option<String>,

    /// Task id.
    pub id: Option<String>,
}

impl ApiRequest for AckRequest {
    type Valid = Uuid;

    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    fn validate(self) -> Result<Uuid, Problems> {
        let mut problems = Problems::new();
        let id = parse_id(self.id, &mut problems);
        into_result(id, problems)
    }
}

/// Request to report a claimed task as failed.
#[derive(Debug, Default, Deserialize)]
pub struct FailRequest {
    pub api_key: Option<String>,

    /// Task id.
    pub id: Option<String>,

    /// Seconds until retry; absent or 0 fails the task for good.
    pub reevaluation: Option<u64>,

    /// Failure reason.
    pub message: Option<String>,
}

/// A validated fail request.
#[derive(Debug)]
pub struct FailParams {
    pub id: Uuid,
    pub reevaluation: Option<Duration>,
    pub message: Option<String>,
}

impl ApiRequest for FailRequest {
    type Valid = FailParams;

    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    fn validate(self) -> Result<FailParams, Problems> {
        let mut problems = Problems::new();
        let params = parse_id(self.id, &mut problems).map(|id| FailParams {
            id,
            reevaluation: self.reevaluation.filter(|&s| s > 0).map(Duration::from_secs),
            message: self.message.filter(|m| !m.is_empty()),
        });
        into_result(params, problems)
    }
}

/// Response for operations without a result value.
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// POST /api/v1/ack
pub async fn ack(
    State(state): State<Arc<AppState>>,
    Authorized(id): Authorized<AckRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.queue().ack(id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// POST /api/v1/fail
pub async fn fail(
    State(state): State<Arc<AppState>>,
    Authorized(params): Authorized<FailRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    info!(task_id = %params.id, message = ?params.message, "Task reported failed");
    state
        .queue()
        .fail(params.id, params.reevaluation, params.message)
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================================
// Count
// ============================================================================

/// Request to count waiting tasks.
#[derive(Debug, Default, Deserialize)]
pub struct CountRequest {
    pub api_key: Option<String>,

    /// Task type.
    pub queue_type: Option<String>,

    /// Payload field to match.
    pub key: Option<String>,

    /// Value the payload field must equal.
    pub value: Option<Value>,
}

impl ApiRequest for CountRequest {
    type Valid = CountQuery;

    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    fn validate(self) -> Result<CountQuery, Problems> {
        let mut problems = Problems::new();

        let queue_type = self.queue_type.filter(|t| !t.is_empty());
        if queue_type.is_none() {
            require(&mut problems, "queue_type");
        }

        let key = match self.key.filter(|k| !k.is_empty()) {
            None => {
                require(&mut problems, "key");
                None
            }
            Some(key) => match FilterKey::parse(key) {
                Ok(key) => Some(key),
                Err(e) => {
                    problems.insert("key".to_string(), e.to_string());
                    None
                }
            },
        };

        if self.value.is_none() {
            require(&mut problems, "value");
        }

        let query = match (queue_type, key, self.value) {
            (Some(queue_type), Some(key), Some(value)) => {
                Some(CountQuery::new().with_type(queue_type).with_payload_match(key, value))
            }
            _ => None,
        };
        into_result(query, problems)
    }
}

/// Count response.
#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub success: bool,

    /// Waiting tasks matching the query.
    pub count: u64,
}

/// POST /api/v1/count
pub async fn count(
    State(state): State<Arc<AppState>>,
    Authorized(query): Authorized<CountRequest>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.queue().count(&query).await?;
    Ok(Json(CountResponse { success: true, count }))
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
