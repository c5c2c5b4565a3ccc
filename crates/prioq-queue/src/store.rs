//! Task persistence store.

use std::cmp::Reverse;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::QueueError;
use crate::filter::{ClaimFilter, CountQuery};
use crate::task::{StatusEntry, Task, TaskStatus};

/// Task store trait for persistence.
///
/// Every mutation is conditional on the task's current status, so several
/// brokers may share one backing store.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task.
    async fn insert(&self, task: &Task) -> Result<(), QueueError>;

    /// Move the best claimable task matching `filter` to `Processing`.
    ///
    /// Best means highest priority, then oldest current entry, then insertion
    /// order. Returns `None` when nothing matches.
    async fn claim(&self, filter: &ClaimFilter, now: DateTime<Utc>) -> Result<Option<Task>, QueueError>;

    /// Record `entries` (oldest first) iff the current status is `expected`.
    ///
    /// Returns the updated task, or `None` when the task is missing or in
    /// another status.
    async fn transition(
        &self,
        id: Uuid,
        expected: TaskStatus,
        entries: Vec<StatusEntry>,
    ) -> Result<Option<Task>, QueueError>;

    /// Count tasks whose current status is `Enqueued`.
    async fn count(&self, query: &CountQuery) -> Result<u64, QueueError>;

    /// Load a task by ID.
    async fn get(&self, id: Uuid) -> Result<Option<Task>, QueueError>;

    /// Delete tasks whose current entry is older than `cutoff`.
    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueError>;

    /// Check the backing store answers.
    async fn ping(&self) -> Result<(), QueueError>;
}

struct StoredTask {
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct MemoryState {
    tasks: HashMap<Uuid, StoredTask>,
    next_seq: u64,
}

/// In-memory task store.
///
/// The write lock stands in for the conditional update of a real backend.
pub struct MemoryTaskStore {
    state: RwLock<MemoryState>,
}

impl MemoryTaskStore {
    /// Create a new memory store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        if state.tasks.contains_key(&task.id) {
            return Err(QueueError::Store(format!("duplicate task id {}", task.id)));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.tasks.insert(task.id, StoredTask { seq, task: task.clone() });
        Ok(())
    }

    async fn claim(&self, filter: &ClaimFilter, now: DateTime<Utc>) -> Result<Option<Task>, QueueError> {
        let mut state = self.state.write().await;

        let best = state
            .tasks
            .values()
            .filter(|s| s.task.is_claimable(now) && filter.accepts(&s.task.task_type, s.task.priority))
            .min_by_key(|s| (Reverse(s.task.priority), s.task.current().timestamp, s.seq))
            .map(|s| s.task.id);

        Ok(best.and_then(|id| state.tasks.get_mut(&id)).map(|stored| {
            stored
                .task
                .record([StatusEntry::new(TaskStatus::Processing, now)]);
            stored.task.clone()
        }))
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: TaskStatus,
        entries: Vec<StatusEntry>,
    ) -> Result<Option<Task>, QueueError> {
        let mut state = self.state.write().await;
        match state.tasks.get_mut(&id) {
            Some(stored) if stored.task.status() == expected => {
                stored.task.record(entries);
                Ok(Some(stored.task.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn count(&self, query: &CountQuery) -> Result<u64, QueueError> {
        let state = self.state.read().await;
        let count = state
            .tasks
            .values()
            .filter(|s| s.task.status() == TaskStatus::Enqueued)
            .filter(|s| query.matches(&s.task.task_type, &s.task.payload))
            .count();
        Ok(count as u64)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>, QueueError> {
        let state = self.state.read().await;
        Ok(state.tasks.get(&id).map(|s| s.task.clone()))
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueError> {
        let mut state = self.state.write().await;
        let before = state.tasks.len();
        state.tasks.retain(|_, s| s.task.current().timestamp >= cutoff);
        Ok((before - state.tasks.len()) as u64)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
