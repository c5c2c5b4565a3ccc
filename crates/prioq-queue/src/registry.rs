//! Waiter registry: blocked dequeues and the dispatch loop that serves them.
//!
//! A dequeue first claims directly. On a miss it registers a waiter with a
//! single-use mailbox and blocks on it. The dispatch loop consumes arrival
//! signals in emission order, scans waiters in registration order and claims
//! on behalf of eligible ones until the signalled task has a taker. The task
//! itself never travels in the signal, it is always claimed through the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::QueueError;
use crate::filter::ClaimFilter;
use crate::notifier::{Arrival, ArrivalReceiver, ArrivalSignal};
use crate::queue::TaskQueue;
use crate::task::ClaimedTask;

struct Waiter {
    id: u64,
    filter: Arc<ClaimFilter>,
    delivery: oneshot::Sender<ClaimedTask>,
}

/// Registry of blocked dequeue requests.
pub struct WaiterRegistry {
    queue: Arc<TaskQueue>,
    waiters: RwLock<Vec<Waiter>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl WaiterRegistry {
    pub fn new(queue: Arc<TaskQueue>, shutdown: CancellationToken) -> Self {
        Self {
            queue,
            waiters: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            shutdown,
        }
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Number of blocked dequeues.
    pub fn waiting(&self) -> usize {
        self.waiters.read().len()
    }

    /// Register a waiter at the back of the list.
    pub fn subscribe(self: &Arc<Self>, filter: ClaimFilter) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (delivery, receiver) = oneshot::channel();
        self.waiters.write().push(Waiter {
            id,
            filter: Arc::new(filter),
            delivery,
        });

        Subscription {
            id,
            registry: Arc::clone(self),
            receiver,
            closed: false,
        }
    }

    fn remove(&self, id: u64) -> Option<Waiter> {
        let mut waiters = self.waiters.write();
        let index = waiters.iter().position(|w| w.id == id)?;
        Some(waiters.remove(index))
    }

    fn is_registered(&self, id: u64) -> bool {
        self.waiters.read().iter().any(|w| w.id == id)
    }

    fn candidates(&self, eligible: impl Fn(&ClaimFilter) -> bool) -> Vec<(u64, Arc<ClaimFilter>)> {
        self.waiters
            .read()
            .iter()
            .filter(|w| eligible(&w.filter))
            .map(|w| (w.id, Arc::clone(&w.filter)))
            .collect()
    }

    /// Claim a task, blocking up to `timeout` for one to arrive.
    ///
    /// `Ok(None)` means the deadline passed with nothing to hand out;
    /// `Err(QueueError::Cancelled)` means the broker is shutting down.
    #[instrument(
        skip(self, filter),
        fields(queue_types = ?filter.accepted_types(), priority = filter.min_priority())
    )]
    pub async fn dequeue(
        self: &Arc<Self>,
        filter: ClaimFilter,
        timeout: Duration,
    ) -> Result<Option<ClaimedTask>, QueueError> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::Cancelled);
        }

        if let Some(task) = self.queue.claim(&filter).await? {
            return Ok(Some(task));
        }

        let mut subscription = self.subscribe(filter.clone());

        // An arrival dispatched between the first claim and registration found no waiter.
        if let Some(task) = self.queue.claim(&filter).await? {
            if let Some(extra) = subscription.detach() {
                self.return_task(extra).await;
            }
            return Ok(Some(task));
        }

        let wake = tokio::select! {
            delivered = subscription.recv() => Wake::Delivered(delivered),
            _ = tokio::time::sleep(timeout) => Wake::TimedOut,
            _ = self.shutdown.cancelled() => Wake::Shutdown,
        };

        match wake {
            Wake::Delivered(Some(task)) => Ok(Some(task)),
            Wake::Delivered(None) => Err(QueueError::Cancelled),
            Wake::TimedOut => {
                // A task delivered while the deadline fired is already ours.
                let late = subscription.detach();
                if late.is_none() {
                    debug!("dequeue timed out");
                }
                Ok(late)
            }
            Wake::Shutdown => {
                if let Some(extra) = subscription.detach() {
                    self.return_task(extra).await;
                }
                Err(QueueError::Cancelled)
            }
        }
    }

    /// Consume arrivals until shutdown, then drop every waiter.
    pub async fn run(self: Arc<Self>, mut arrivals: ArrivalReceiver) {
        info!("Dispatcher started");

        loop {
            let arrival = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                arrival = arrivals.recv() => arrival,
            };

            match arrival {
                Some(Arrival::Signal(signal)) => self.dispatch(&signal).await,
                Some(Arrival::Rescan) => self.rescan().await,
                None => break,
            }
        }

        self.close();
        info!("Dispatcher stopped");
    }

    /// Serve waiters for a signal until one receives a task that satisfies it.
    ///
    /// A waiter accepting several types may claim a better task of another
    /// type; the signalled task is then still waiting, so the scan goes on.
    async fn dispatch(&self, signal: &ArrivalSignal) {
        let candidates = self.candidates(|f| f.accepts(&signal.task_type, signal.priority));
        for (id, filter) in candidates {
            let Some(served) = self.serve(id, &filter).await else {
                continue;
            };
            if served.task_type == signal.task_type && served.priority >= signal.priority {
                return;
            }
            debug!(
                waiter = id,
                signalled = %signal.task_type,
                served = %served.task_type,
                "waiter took another task, continuing scan"
            );
        }
    }

    /// Give every waiter one claim attempt.
    async fn rescan(&self) {
        let candidates = self.candidates(|_| true);
        debug!(waiters = candidates.len(), "rescanning waiters");
        for (id, filter) in candidates {
            self.serve(id, &filter).await;
        }
    }

    /// Claim for one waiter and deliver. Returns the type and priority of the
    /// task the waiter now holds.
    async fn serve(&self, id: u64, filter: &ClaimFilter) -> Option<ArrivalSignal> {
        if !self.is_registered(id) {
            return None;
        }

        let task = match self.queue.claim(filter).await {
            Ok(Some(task)) => task,
            Ok(None) => return None,
            Err(e) => {
                error!(waiter = id, queue_types = ?filter.accepted_types(), error = %e, "claim for waiter failed");
                return None;
            }
        };

        let Some(waiter) = self.remove(id) else {
            self.return_task(task).await;
            return None;
        };

        let served = ArrivalSignal::new(task.task_type.clone(), task.priority);
        match waiter.delivery.send(task) {
            Ok(()) => {
                debug!(waiter = id, "task delivered to waiter");
                Some(served)
            }
            Err(task) => {
                self.return_task(task).await;
                None
            }
        }
    }

    async fn return_task(&self, task: ClaimedTask) {
        if let Err(e) = self.queue.release(task.id).await {
            error!(task_id = %task.id, error = %e, "failed to return undelivered task");
        }
    }

    /// Hand a task back from a context that cannot await.
    fn return_task_later(&self, task: ClaimedTask) {
        let queue = Arc::clone(&self.queue);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = queue.release(task.id).await {
                        error!(task_id = %task.id, error = %e, "failed to return undelivered task");
                    }
                });
            }
            Err(_) => warn!(task_id = %task.id, "no runtime to return undelivered task"),
        }
    }

    /// Drop every waiter; their receivers observe a closed mailbox.
    pub fn close(&self) {
        let drained = std::mem::take(&mut *self.waiters.write());
        if !drained.is_empty() {
            info!(waiters = drained.len(), "releasing blocked dequeues");
        }
    }
}

enum Wake {
    Delivered(Option<ClaimedTask>),
    TimedOut,
    Shutdown,
}

/// A registered waiter, owned by the blocked caller.
///
/// Dropping it unsubscribes; a task that raced into the mailbox is returned
/// to the queue.
pub struct Subscription {
    id: u64,
    registry: Arc<WaiterRegistry>,
    receiver: oneshot::Receiver<ClaimedTask>,
    closed: bool,
}

impl Subscription {
    /// Wait for a delivery. `None` when the registry dropped the waiter.
    pub async fn recv(&mut self) -> Option<ClaimedTask> {
        if self.closed {
            return None;
        }
        let delivered = (&mut self.receiver).await.ok();
        self.closed = true;
        delivered
    }

    /// Remove the waiter and close the mailbox. Safe to call repeatedly.
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.detach() {
            self.registry.return_task_later(task);
        }
    }

    /// Remove and close, handing back anything delivered before the close.
    fn detach(&mut self) -> Option<ClaimedTask> {
        if self.closed {
            return None;
        }
        self.closed = true;
        self.registry.remove(self.id);
        self.receiver.close();
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
