//! Umbrella error type.
//!
//! Crate-local error enums (`QueueError`, `ContactError`, `CommitError`)
//! convert into `FlowforgeError` via `#[from]`, the same two-tier scheme the
//! teacher uses for `ClientError` -> `TaskerError`.

use thiserror::Error;

pub type FlowforgeResult<T> = Result<T, FlowforgeError>;

#[derive(Debug, Error)]
pub enum FlowforgeError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queue transport error: {0}")]
    Queue(String),

    #[error("messaging error: {0}")]
    Messaging(String),

    #[error("orchestration error: {0}")]
    Orchestration(String),

    #[error("contact conflict: {0}")]
    ContactConflict(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

impl FlowforgeError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    pub fn orchestration(msg: impl Into<String>) -> Self {
        Self::Orchestration(msg.into())
    }

    /// Whether this error represents a transient infra failure that a
    /// caller should retry with backoff, per the error taxonomy in
    /// the commit engine / task dispatcher design.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Queue(_) | Self::Messaging(_))
    }
}
