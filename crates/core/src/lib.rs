//! Shared building blocks for the swarm test orchestrator: configuration,
//! the error taxonomy, wire models and the coordination-store contract.

pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use errors::*;
pub use models::*;
pub use traits::*;

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
