//! # prioq Queue
//!
//! The claim-and-notify engine behind the prioq broker.
//!
//! ## Features
//!
//! - Typed, prioritized tasks with an append-only status history
//! - Compare-and-swap status transitions (no double claims)
//! - SQLite and in-memory task stores
//! - Waiter registry turning blocking dequeues into event-driven wakeups
//! - Passive expiry of stale tasks

pub mod broker;
pub mod clock;
pub mod error;
pub mod filter;
pub mod notifier;
pub mod queue;
pub mod registry;
mod schema;
pub mod sqlite;
pub mod store;
pub mod task;

#[cfg(test)]
mod store_scenarios;

pub use broker::Broker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::QueueError;
pub use filter::{ClaimFilter, CountQuery, FilterKey};
pub use notifier::{Arrival, ArrivalNotifier, ArrivalReceiver, ArrivalSignal};
pub use queue::TaskQueue;
pub use registry::{Subscription, WaiterRegistry};
pub use sqlite::SqliteTaskStore;
pub use store::{MemoryTaskStore, TaskStore};
pub use task::{ClaimedTask, NewTask, Payload, StatusEntry, Task, TaskStatus};
