//! Session commit engine (spec.md §4.F).
//!
//! Takes one org's worth of advanced sessions and makes them durable in a
//! single transaction: pre-commit hooks apply first (contact-shape
//! changes the session rows themselves may reference), then the session
//! rows are written, then post-commit hooks (anything that wants the
//! session row to already exist, e.g. an outbound message FK'd to it).
//!
//! Every hook sees its payloads grouped by session so it can coalesce
//! before writing — per hook, not globally, since different hooks have
//! different merge rules (field/group/attr last-write-wins, URN
//! final-target-replaces-intermediates, message/ticket/audit no merge at
//! all).

use crate::hooks::{CommitHook, HookBatch};
use flowforge_shared::error::{FlowforgeError, FlowforgeResult};
use flowforge_shared::ids::ContactId;
use flowforge_shared::models::{Session, SessionStatus};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::sync::Arc;

pub struct CommitEngine {
    pool: PgPool,
    hooks: Vec<Arc<dyn CommitHook>>,
}

impl CommitEngine {
    pub fn new(pool: PgPool, hooks: Vec<Arc<dyn CommitHook>>) -> Self {
        Self { pool, hooks }
    }

    /// Commits `sessions` in one transaction (spec.md §4.F steps 1-7):
    ///
    /// 1. group each hook's payloads by session across the whole batch
    /// 2. each hook folds its own payloads (its own coalescing rule)
    /// 3. begin transaction
    /// 4. apply pre-commit hooks in registration order
    /// 5. interrupt any waiting session for a contact a newly-waiting
    ///    session in this batch also belongs to, then upsert session rows
    /// 6. apply post-commit hooks in registration order
    /// 7. commit
    pub async fn commit(&self, sessions: &[Session]) -> FlowforgeResult<()> {
        if sessions.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(FlowforgeError::Database)?;

        for hook in self.hooks.iter().filter(|h| h.is_pre_commit()) {
            let batch = gather(sessions, hook.name(), true);
            hook.apply(&mut tx, &batch).await?;
        }

        interrupt_prior_waiting_sessions(&mut tx, sessions).await?;
        upsert_sessions(&mut tx, sessions).await?;

        for hook in self.hooks.iter().filter(|h| !h.is_pre_commit()) {
            let batch = gather(sessions, hook.name(), false);
            hook.apply(&mut tx, &batch).await?;
        }

        tx.commit().await.map_err(FlowforgeError::Database)?;
        Ok(())
    }

    /// Interrupts every currently-waiting session for `contact_ids`
    /// unconditionally, independent of any new session being written —
    /// used by the `interrupt_sessions` task, not by a commit batch.
    pub async fn interrupt_contacts(&self, contact_ids: &[ContactId]) -> FlowforgeResult<()> {
        if contact_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = contact_ids.iter().map(|id| id.value()).collect();
        sqlx::query(
            "UPDATE flows_flowsession SET status = 'interrupted', modified_on = now() \
             WHERE contact_id = ANY($1) AND status = 'waiting'",
        )
        .bind(&ids)
        .execute(&self.pool)
        .await
        .map_err(FlowforgeError::Database)?;
        Ok(())
    }
}

/// Builds one hook's `session -> [payload]` map from the batch, preserving
/// the order each session queued its entries in.
fn gather(sessions: &[Session], hook_name: &str, pre: bool) -> HookBatch {
    let mut batch = HookBatch::new();
    for session in sessions {
        let entries = if pre { &session.pre_commits } else { &session.post_commits };
        let payloads: Vec<_> = entries
            .iter()
            .filter(|e| e.hook == hook_name)
            .map(|e| e.payload.clone())
            .collect();
        if !payloads.is_empty() {
            batch.insert(session.id, payloads);
        }
    }
    batch
}

/// A contact can only have one active (waiting) session at a time; a newly
/// persisted waiting session therefore interrupts whatever that contact's
/// previous waiting session was (spec.md §4.F step 5).
async fn interrupt_prior_waiting_sessions(tx: &mut Transaction<'_, Postgres>, sessions: &[Session]) -> FlowforgeResult<()> {
    let waiting_contacts: Vec<i64> = sessions
        .iter()
        .filter(|s| s.is_waiting())
        .map(|s| s.contact_id.value())
        .collect();
    if waiting_contacts.is_empty() {
        return Ok(());
    }
    let incoming_ids: Vec<uuid::Uuid> = sessions.iter().map(|s| s.id.0).collect();
    sqlx::query(
        "UPDATE flows_flowsession SET status = 'interrupted', modified_on = now() \
         WHERE contact_id = ANY($1) AND status = 'waiting' AND uuid != ALL($2)",
    )
    .bind(&waiting_contacts)
    .bind(&incoming_ids)
    .execute(&mut **tx)
    .await
    .map_err(FlowforgeError::Database)?;
    Ok(())
}

async fn upsert_sessions(tx: &mut Transaction<'_, Postgres>, sessions: &[Session]) -> FlowforgeResult<()> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO flows_flowsession \
         (uuid, contact_id, status, current_flow_id, wait_state, timeout_on, modified_on, output) ",
    );
    builder.push_values(sessions, |mut row, session: &Session| {
        row.push_bind(session.id.0)
            .push_bind(session.contact_id.value())
            .push_bind(session.status.code())
            .push_bind(session.current_flow_id.value())
            .push_bind(session.wait_state.clone())
            .push_bind(session.timeout_on)
            .push_bind(session.modified_on)
            .push_bind(session.output.clone());
    });
    builder.push(
        " ON CONFLICT (uuid) DO UPDATE SET \
          status = EXCLUDED.status, current_flow_id = EXCLUDED.current_flow_id, \
          wait_state = EXCLUDED.wait_state, timeout_on = EXCLUDED.timeout_on, \
          modified_on = EXCLUDED.modified_on, output = EXCLUDED.output",
    );
    builder
        .build()
        .execute(&mut **tx)
        .await
        .map_err(FlowforgeError::Database)?;
    Ok(())
}

/// Whether `status` leaves a contact with no active session, used by
/// callers that need to know whether a contact is free to start a new
/// flow without waiting for this batch's interrupt pass.
pub fn terminal(status: SessionStatus) -> bool {
    !matches!(status, SessionStatus::Waiting)
}

/// Distinct contacts touched by a commit batch, for callers that want to
/// invalidate per-contact caches after a commit.
pub fn touched_contacts(sessions: &[Session]) -> Vec<ContactId> {
    let mut ids: Vec<ContactId> = sessions.iter().map(|s| s.contact_id).collect();
    ids.sort_by_key(|id| id.value());
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_shared::ids::{FlowId, SessionId};

    fn session(status: SessionStatus) -> Session {
        let mut s = Session::new(SessionId(uuid::Uuid::new_v4()), ContactId::new(1), FlowId::new(1), chrono::Utc::now());
        s.status = status;
        s
    }

    #[test]
    fn gather_only_pulls_entries_for_the_named_hook() {
        let mut s = session(SessionStatus::Waiting);
        s.push_pre_commit("field_value", serde_json::json!({"a": 1}));
        s.push_pre_commit("group_membership", serde_json::json!({"b": 2}));
        let batch = gather(&[s.clone()], "field_value", true);
        assert_eq!(batch.get(&s.id).unwrap().len(), 1);
    }

    #[test]
    fn gather_omits_sessions_with_no_payloads_for_the_hook() {
        let s = session(SessionStatus::Waiting);
        let batch = gather(&[s.clone()], "field_value", true);
        assert!(batch.get(&s.id).is_none());
    }

    #[test]
    fn touched_contacts_deduplicates_and_sorts() {
        let mut a = session(SessionStatus::Waiting);
        a.contact_id = ContactId::new(3);
        let mut b = session(SessionStatus::Completed);
        b.contact_id = ContactId::new(1);
        let mut c = session(SessionStatus::Waiting);
        c.contact_id = ContactId::new(3);
        let ids = touched_contacts(&[a, b, c]);
        assert_eq!(ids, vec![ContactId::new(1), ContactId::new(3)]);
    }

    #[test]
    fn terminal_status_excludes_waiting_only() {
        assert!(!terminal(SessionStatus::Waiting));
        assert!(terminal(SessionStatus::Completed));
        assert!(terminal(SessionStatus::Interrupted));
    }
}
