//! HTTP layer: request extraction, handlers and routes.

pub mod extract;
pub mod handlers;
pub(crate) mod monitoring;
pub mod routes;
