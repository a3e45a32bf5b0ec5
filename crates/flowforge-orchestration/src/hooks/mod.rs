//! Commit hooks (spec.md §4.F).
//!
//! Each hook owns one step of what the commit engine applies pre- or
//! post-session-persistence. A hook is handed every session's queued
//! payloads for its name in one call so it can coalesce before writing —
//! per spec.md §4.F step 2, "each hook, given its `session -> [payload]`
//! map, must fold payloads such that conflicting operations collapse."

pub mod audit_log;
pub mod contact_attrs;
pub mod field_value;
pub mod group_membership;
pub mod message_outbox;
pub mod ticket_lifecycle;
pub mod urn_change;

use flowforge_shared::error::FlowforgeResult;
use flowforge_shared::ids::SessionId;
use serde_json::Value;
use sqlx::{Postgres, Transaction};
use std::collections::HashMap;

/// All payloads queued for one hook across one commit batch, keyed by
/// session so hooks can preserve per-session ordering while coalescing.
pub type HookBatch = HashMap<SessionId, Vec<Value>>;

#[async_trait::async_trait]
pub trait CommitHook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this hook runs before (`true`) or after (`false`) the
    /// session rows themselves are written (spec.md §4.F steps 4 and 6).
    fn is_pre_commit(&self) -> bool;

    async fn apply(&self, tx: &mut Transaction<'_, Postgres>, batch: &HookBatch) -> FlowforgeResult<()>;
}

pub use audit_log::AuditLogHook;
pub use contact_attrs::ContactAttrsHook;
pub use field_value::FieldValueHook;
pub use group_membership::GroupMembershipHook;
pub use message_outbox::MessageOutboxHook;
pub use ticket_lifecycle::TicketLifecycleHook;
pub use urn_change::UrnChangeHook;

/// All hooks in the order the commit engine should register them —
/// pre-commit hooks run in this order, then session persistence, then
/// post-commit hooks in this order (spec.md §4.F).
pub fn default_hooks() -> Vec<std::sync::Arc<dyn CommitHook>> {
    vec![
        std::sync::Arc::new(GroupMembershipHook),
        std::sync::Arc::new(FieldValueHook),
        std::sync::Arc::new(ContactAttrsHook),
        std::sync::Arc::new(UrnChangeHook),
        std::sync::Arc::new(MessageOutboxHook),
        std::sync::Arc::new(TicketLifecycleHook),
        std::sync::Arc::new(AuditLogHook),
    ]
}
