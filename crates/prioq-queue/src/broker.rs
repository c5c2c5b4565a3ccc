//! Broker assembly: store, queue, dispatcher and expiry sweeper.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use prioq_config::{ConfigLoader, QueueConfig, StoreBackend, StoreConfig};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::QueueError;
use crate::notifier;
use crate::queue::TaskQueue;
use crate::registry::WaiterRegistry;
use crate::sqlite::SqliteTaskStore;
use crate::store::{MemoryTaskStore, TaskStore};

/// A running broker. Background loops stop on [`Broker::shutdown`].
pub struct Broker {
    queue: Arc<TaskQueue>,
    registry: Arc<WaiterRegistry>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Broker {
    /// Open the configured store and start the broker.
    pub async fn open(store_config: &StoreConfig, queue_config: &QueueConfig) -> Result<Self, QueueError> {
        let store: Arc<dyn TaskStore> = match store_config.backend {
            StoreBackend::Memory => {
                warn!("Using in-memory task store, tasks are lost on restart");
                Arc::new(MemoryTaskStore::new())
            }
            StoreBackend::Sqlite => {
                let path = store_config
                    .path
                    .as_deref()
                    .map(|p| PathBuf::from(ConfigLoader::expand_path(p)))
                    .ok_or_else(|| QueueError::Store("sqlite backend requires store.path".to_string()))?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| QueueError::Store(format!("create {}: {e}", parent.display())))?;
                }
                info!("Opening task store at {:?}", path);
                Arc::new(SqliteTaskStore::open(&path).await?)
            }
        };

        Ok(Self::start(store, Arc::new(SystemClock), store_config, queue_config))
    }

    /// Wire a store into a queue and spawn the dispatcher and sweeper.
    pub fn start(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        store_config: &StoreConfig,
        queue_config: &QueueConfig,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let (notifier, arrivals) = notifier::channel(queue_config.notifier_capacity);
        let notifier = notifier
            .with_shutdown(shutdown.clone())
            .with_max_delay(store_config.retention());

        let queue = Arc::new(TaskQueue::new(store, notifier).with_clock(clock));
        let registry = Arc::new(WaiterRegistry::new(Arc::clone(&queue), shutdown.clone()));

        let dispatcher = tokio::spawn(Arc::clone(&registry).run(arrivals));
        let sweeper = tokio::spawn(sweep_expired(
            Arc::clone(&queue),
            store_config.retention(),
            store_config.purge_interval(),
            shutdown.clone(),
        ));

        info!(
            notifier_capacity = queue_config.notifier_capacity,
            retention_secs = store_config.retention_secs,
            "Broker started"
        );

        Self {
            queue,
            registry,
            shutdown,
            handles: Mutex::new(vec![dispatcher, sweeper]),
        }
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<WaiterRegistry> {
        &self.registry
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop background loops and release every blocked dequeue.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Broker task ended abnormally: {}", e);
            }
        }
        self.registry.close();
        info!(deferred_wakeups = self.queue.deferred_wakeups(), "Broker stopped");
    }
}

async fn sweep_expired(
    queue: Arc<TaskQueue>,
    retention: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match queue.purge_expired(retention).await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "Expired tasks purged"),
                    Err(e) => warn!("Expiry sweep failed: {}", e),
                }
            }
        }
    }
    debug!("Expiry sweeper stopped");
}
