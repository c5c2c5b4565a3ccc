//! Task queue: the store protocol plus arrival signalling.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::QueueError;
use crate::filter::{ClaimFilter, CountQuery};
use crate::notifier::{ArrivalNotifier, ArrivalSignal};
use crate::store::TaskStore;
use crate::task::{ClaimedTask, NewTask, StatusEntry, Task, TaskStatus};

/// Priority task queue over a [`TaskStore`].
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    notifier: ArrivalNotifier,
    clock: Arc<dyn Clock>,
}

impl TaskQueue {
    /// Create a queue using the system clock.
    pub fn new(store: Arc<dyn TaskStore>, notifier: ArrivalNotifier) -> Self {
        Self {
            store,
            notifier,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn after(&self, now: DateTime<Utc>, delay: Duration) -> Result<DateTime<Utc>, QueueError> {
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .ok_or_else(|| QueueError::InvalidDelay(format!("{delay:?} is out of range")))
    }

    /// Deferred wakeups still waiting on their timer.
    pub fn deferred_wakeups(&self) -> usize {
        self.notifier.deferred()
    }

    /// Persist a task and announce it. Returns the new task id.
    pub async fn enqueue(&self, new_task: NewTask) -> Result<Uuid, QueueError> {
        new_task.validate()?;

        let now = self.clock.now();
        let next_reevaluation = new_task
            .reevaluation
            .map(|delay| self.after(now, delay))
            .transpose()?;
        let initial = StatusEntry::new(TaskStatus::Enqueued, now).with_next_reevaluation(next_reevaluation);
        let task = Task::new(new_task.task_type, new_task.priority, new_task.payload, initial);

        self.store.insert(&task).await?;
        debug!(task_id = %task.id, task_type = %task.task_type, priority = task.priority, "task enqueued");

        let signal = ArrivalSignal::new(task.task_type.clone(), task.priority);
        if let Some(delay) = new_task.reevaluation {
            self.notifier.notify_after(signal.clone(), delay);
        }
        self.notifier.notify(signal);

        Ok(task.id)
    }

    /// Claim the best eligible task, or `None` when nothing matches.
    pub async fn claim(&self, filter: &ClaimFilter) -> Result<Option<ClaimedTask>, QueueError> {
        let claimed = self.store.claim(filter, self.clock.now()).await?;
        if let Some(task) = &claimed {
            debug!(task_id = %task.id, task_type = %task.task_type, priority = task.priority, "task claimed");
        }
        Ok(claimed.map(Task::into_claimed))
    }

    /// Mark a claimed task processed.
    pub async fn ack(&self, id: Uuid) -> Result<(), QueueError> {
        let entry = StatusEntry::new(TaskStatus::Processed, self.clock.now());
        self.transition(id, TaskStatus::Processing, vec![entry]).await?;
        debug!(task_id = %id, "task acknowledged");
        Ok(())
    }

    /// Mark a claimed task failed.
    ///
    /// With a delay the task is re-armed: a `Failed` entry followed by an
    /// `Enqueued` entry, both carrying the reevaluation instant. Without one
    /// the failure is terminal.
    pub async fn fail(&self, id: Uuid, reevaluation: Option<Duration>, message: Option<String>) -> Result<(), QueueError> {
        let now = self.clock.now();
        let delay = reevaluation.filter(|d| !d.is_zero());

        let Some(delay) = delay else {
            let entry = StatusEntry::new(TaskStatus::Failed, now).with_message(message);
            self.transition(id, TaskStatus::Processing, vec![entry]).await?;
            info!(task_id = %id, "task failed permanently");
            return Ok(());
        };

        let retry_at = self.after(now, delay)?;
        let entries = vec![
            StatusEntry::new(TaskStatus::Failed, now)
                .with_message(message)
                .with_next_reevaluation(Some(retry_at)),
            StatusEntry::new(TaskStatus::Enqueued, now).with_next_reevaluation(Some(retry_at)),
        ];
        let task = self.transition(id, TaskStatus::Processing, entries).await?;
        debug!(task_id = %id, retry_at = %retry_at, "task failed, retry scheduled");

        self.notifier
            .notify_after(ArrivalSignal::new(task.task_type, task.priority), delay);
        Ok(())
    }

    /// Return a claimed but undelivered task to the queue.
    pub async fn release(&self, id: Uuid) -> Result<(), QueueError> {
        let entry = StatusEntry::new(TaskStatus::Enqueued, self.clock.now());
        let task = self.transition(id, TaskStatus::Processing, vec![entry]).await?;
        warn!(task_id = %id, "undelivered task returned to the queue");
        self.notifier
            .notify(ArrivalSignal::new(task.task_type, task.priority));
        Ok(())
    }

    async fn transition(&self, id: Uuid, expected: TaskStatus, entries: Vec<StatusEntry>) -> Result<Task, QueueError> {
        self.store
            .transition(id, expected, entries)
            .await?
            .ok_or(QueueError::Conflict { id, expected })
    }

    /// Count waiting tasks.
    pub async fn count(&self, query: &CountQuery) -> Result<u64, QueueError> {
        self.store.count(query).await
    }

    /// Load a task with its full history.
    pub async fn get(&self, id: Uuid) -> Result<Option<Task>, QueueError> {
        self.store.get(id).await
    }

    /// Purge tasks whose current status is older than `retention`.
    pub async fn purge_expired(&self, retention: Duration) -> Result<u64, QueueError> {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|r| self.clock.now().checked_sub_signed(r))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.store.purge_expired(cutoff).await
    }

    /// Check the store answers.
    pub async fn ping(&self) -> Result<(), QueueError> {
        self.store.ping().await
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
