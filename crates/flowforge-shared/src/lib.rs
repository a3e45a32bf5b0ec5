//! Shared data model, configuration, error, and resilience primitives used
//! by every other flowforge crate — the foundation crate the queue,
//! orchestration, and server crates all depend on.

pub mod config;
pub mod error;
pub mod ids;
pub mod models;
pub mod resilience;

pub use error::{FlowforgeError, FlowforgeResult};
