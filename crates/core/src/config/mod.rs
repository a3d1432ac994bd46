//! Configuration models.
//!
//! Every section implements `Default` and `validate()`, so a partial TOML file
//! (or none at all) plus `SWARM_*` environment overrides yields a complete,
//! checked [`AppConfig`].

pub mod models;

pub use models::*;
