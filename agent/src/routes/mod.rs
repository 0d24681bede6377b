//! HTTP route definitions.
//!
//! The agent only serves a liveness check and a read-only status view.

mod health;
mod status;

pub use health::health_routes;
pub use status::status_routes;
