//! Arrival signals from the store side to the dispatcher.
//!
//! Signals travel over a bounded channel so enqueue never waits on the
//! dispatcher. When the buffer is full the signal is dropped and a rescan is
//! requested instead: every waiter is re-evaluated once, so no wakeup is lost.
//!
//! Deferred signals wait on a timer that is capped at the task retention and
//! dropped when the broker shuts down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// "A task of this type and priority may now be claimable."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrivalSignal {
    pub task_type: String,
    pub priority: i64,
}

impl ArrivalSignal {
    pub fn new(task_type: impl Into<String>, priority: i64) -> Self {
        Self {
            task_type: task_type.into(),
            priority,
        }
    }
}

/// What the dispatcher should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrival {
    Signal(ArrivalSignal),
    /// Signals were dropped; re-evaluate every waiter.
    Rescan,
}

struct Overflow {
    pending: AtomicBool,
    wake: Notify,
}

/// Sending half, cheap to clone.
#[derive(Clone)]
pub struct ArrivalNotifier {
    tx: mpsc::Sender<ArrivalSignal>,
    overflow: Arc<Overflow>,
    shutdown: CancellationToken,
    max_delay: Option<Duration>,
    deferred: Arc<AtomicUsize>,
}

/// Receiving half, owned by the dispatcher.
pub struct ArrivalReceiver {
    rx: mpsc::Receiver<ArrivalSignal>,
    overflow: Arc<Overflow>,
}

/// Create a notifier pair buffering up to `capacity` signals.
pub fn channel(capacity: usize) -> (ArrivalNotifier, ArrivalReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let overflow = Arc::new(Overflow {
        pending: AtomicBool::new(false),
        wake: Notify::new(),
    });
    (
        ArrivalNotifier {
            tx,
            overflow: Arc::clone(&overflow),
            shutdown: CancellationToken::new(),
            max_delay: None,
            deferred: Arc::new(AtomicUsize::new(0)),
        },
        ArrivalReceiver { rx, overflow },
    )
}

impl ArrivalNotifier {
    /// Drop pending deferred signals once `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Never hold a deferred signal longer than `max_delay`.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Deferred signals still waiting on their timer.
    pub fn deferred(&self) -> usize {
        self.deferred.load(Ordering::Acquire)
    }

    /// Emit a signal without waiting.
    pub fn notify(&self, signal: ArrivalSignal) {
        match self.tx.try_send(signal) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(signal)) => {
                debug!(
                    task_type = %signal.task_type,
                    priority = signal.priority,
                    "arrival buffer full, requesting rescan"
                );
                self.overflow.pending.store(true, Ordering::Release);
                self.overflow.wake.notify_one();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("dispatcher gone, arrival signal dropped");
            }
        }
    }

    /// Emit a signal once `delay` has elapsed, or after the cap if shorter.
    ///
    /// A task still waiting past the cap has been purged by then.
    pub fn notify_after(&self, signal: ArrivalSignal, delay: Duration) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let delay = self.max_delay.map_or(delay, |max| delay.min(max));
        let notifier = self.clone();
        self.deferred.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            tokio::select! {
                _ = notifier.shutdown.cancelled() => {
                    trace!(task_type = %signal.task_type, "deferred signal dropped on shutdown");
                }
                _ = tokio::time::sleep(delay) => notifier.notify(signal),
            }
            notifier.deferred.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

impl ArrivalReceiver {
    /// Next arrival in emission order; a pending rescan goes first.
    ///
    /// Returns `None` once every notifier is dropped and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Arrival> {
        loop {
            if self.overflow.pending.swap(false, Ordering::AcqRel) {
                return Some(Arrival::Rescan);
            }
            tokio::select! {
                signal = self.rx.recv() => return signal.map(Arrival::Signal),
                _ = self.overflow.wake.notified() => continue,
            }
        }
    }
}
