//! # prioq API
//!
//! HTTP surface of the prioq broker.
//!
//! ```text
//! client ──HTTP──▶ handlers ──▶ TaskQueue ──▶ TaskStore
//!                     │              │ arrival signals
//!                     │              ▼
//!                     └────▶ WaiterRegistry (blocking dequeue)
//! ```
//!
//! Every `/api/v1` request carries an `api_key` field checked against the
//! configured keys. Validation failures are reported as a `problems` map of
//! field name to reason.

pub mod error;
pub mod http;
pub mod server;
pub mod state;

pub use error::{ApiError, Problems};
pub use http::routes::create_router;
pub use server::ApiServer;
pub use state::AppState;
