//! Ticket lifecycle commit hook (spec.md §3, §4.F): `ticket_opened` and
//! `ticket_closed` events resolve to inserts/updates on `tickets_ticket`.
//! Post-commit because an opened ticket is referenced by its session for
//! audit, so the session row must already exist.

use super::{CommitHook, HookBatch};
use flowforge_shared::error::{FlowforgeError, FlowforgeResult};
use flowforge_shared::ids::{ChannelId, ContactId, TicketId};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TicketOp {
    Open {
        contact_id: ContactId,
        channel_id: ChannelId,
        subject: String,
    },
    Close {
        ticket_id: TicketId,
    },
}

pub struct TicketLifecycleHook;

#[async_trait::async_trait]
impl CommitHook for TicketLifecycleHook {
    fn name(&self) -> &'static str {
        "ticket_lifecycle"
    }

    fn is_pre_commit(&self) -> bool {
        false
    }

    async fn apply(&self, tx: &mut Transaction<'_, Postgres>, batch: &HookBatch) -> FlowforgeResult<()> {
        for payloads in batch.values() {
            for payload in payloads {
                match serde_json::from_value::<TicketOp>(payload.clone())? {
                    TicketOp::Open { contact_id, channel_id, subject } => {
                        sqlx::query(
                            "INSERT INTO tickets_ticket (contact_id, channel_id, subject, status, opened_on) \
                             VALUES ($1, $2, $3, 'open', now())",
                        )
                        .bind(contact_id.value())
                        .bind(channel_id.value())
                        .bind(subject)
                        .execute(&mut **tx)
                        .await
                        .map_err(FlowforgeError::Database)?;
                    }
                    TicketOp::Close { ticket_id } => {
                        sqlx::query(
                            "UPDATE tickets_ticket SET status = 'closed', closed_on = now() WHERE id = $1",
                        )
                        .bind(ticket_id.value())
                        .execute(&mut **tx)
                        .await
                        .map_err(FlowforgeError::Database)?;
                    }
                }
            }
        }
        Ok(())
    }
}
