//! Per-tenant-fair task queue (4.A) and the foreman/worker pool that
//! drains it (4.B).

pub mod fairqueue;
pub mod foreman;
pub mod kv;
pub mod wire;

pub use fairqueue::{Claim, FairQueue, QueueBackend};
pub use foreman::{Foreman, ForemanConfig, TaskHandler};
pub use kv::{InMemoryBackend, PopOutcome, QueueStore, RedisBackend};
pub use wire::WireTask;
