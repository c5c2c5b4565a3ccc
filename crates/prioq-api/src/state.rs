//! Application state.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use prioq_config::{AuthConfig, QueueConfig};
use prioq_queue::{Broker, TaskQueue, WaiterRegistry};

/// Application state shared across handlers.
pub struct AppState {
    broker: Arc<Broker>,
    api_keys: HashSet<String>,
    queue_config: QueueConfig,
    start_time: Instant,
    request_count: AtomicU64,
}

impl AppState {
    pub fn new(broker: Arc<Broker>, auth: &AuthConfig, queue_config: QueueConfig) -> Self {
        Self {
            broker,
            api_keys: auth.api_keys.iter().cloned().collect(),
            queue_config,
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
        }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        self.broker.queue()
    }

    pub fn registry(&self) -> &Arc<WaiterRegistry> {
        self.broker.registry()
    }

    /// Whether `key` is one of the configured api keys.
    pub fn is_authorized(&self, key: Option<&str>) -> bool {
        key.is_some_and(|k| !k.is_empty() && self.api_keys.contains(k))
    }

    /// Effective blocking time for a dequeue request.
    pub fn dequeue_timeout(&self, requested_secs: Option<u64>) -> Duration {
        self.queue_config.dequeue_timeout(requested_secs)
    }

    /// Get uptime.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get request count.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Increment request count.
    pub fn increment_requests(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }
}
