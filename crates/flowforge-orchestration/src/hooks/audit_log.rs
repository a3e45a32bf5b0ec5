//! Audit-log commit hook (spec.md §3 `EventRecord`): the catch-all
//! post-commit hook for event kinds that have no first-class table of
//! their own (`input_labels_added`, `session_triggered`, `campaign_fired`,
//! `webhook_called`) — they still leave a row behind for replay/audit even
//! though the core has no dedicated collaborator for them.

use super::{CommitHook, HookBatch};
use flowforge_shared::error::{FlowforgeError, FlowforgeResult};
use flowforge_shared::ids::SessionId;
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder, Transaction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogOp {
    pub kind: String,
    pub detail: serde_json::Value,
}

pub struct AuditLogHook;

#[async_trait::async_trait]
impl CommitHook for AuditLogHook {
    fn name(&self) -> &'static str {
        "audit_log"
    }

    fn is_pre_commit(&self) -> bool {
        false
    }

    async fn apply(&self, tx: &mut Transaction<'_, Postgres>, batch: &HookBatch) -> FlowforgeResult<()> {
        let mut rows: Vec<(SessionId, AuditLogOp)> = Vec::new();
        for (session_id, payloads) in batch {
            for payload in payloads {
                rows.push((*session_id, serde_json::from_value(payload.clone())?));
            }
        }
        if rows.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO flows_flowsession_event (session_id, kind, detail, occurred_on) ");
        builder.push_values(rows.iter(), |mut row, (session_id, op)| {
            row.push_bind(session_id.0)
                .push_bind(&op.kind)
                .push_bind(&op.detail)
                .push("now()");
        });
        builder
            .build()
            .execute(&mut **tx)
            .await
            .map_err(FlowforgeError::Database)?;
        Ok(())
    }
}
