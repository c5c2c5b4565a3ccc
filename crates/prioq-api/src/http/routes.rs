//! HTTP route definitions.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::http::handlers::{ack, count, dequeue, enqueue, fail};
use crate::http::monitoring;
use crate::state::AppState;

/// Create the router.
///
/// ## Route Structure
///
/// ```text
/// /api/v1
///   POST   /api/v1/enqueue  - Enqueue a task
///   POST   /api/v1/dequeue  - Claim a task, blocking up to `timeout`
///   POST   /api/v1/ack      - Mark a claimed task processed
///   POST   /api/v1/fail     - Mark a claimed task failed, optionally retrying
///   POST   /api/v1/count    - Count waiting tasks by payload field
///
/// /health
///   GET    /health          - Store liveness
/// ```
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/enqueue", post(enqueue))
        .route("/dequeue", post(dequeue))
        .route("/ack", post(ack))
        .route("/fail", post(fail))
        .route("/count", post(count));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(monitoring::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
