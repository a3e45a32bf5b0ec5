//! Message outbox commit hook (spec.md §4.F): a post-commit hook so
//! outgoing messages can reference the session row by id once it exists.
//!
//! No coalescing rule applies here — unlike group/field/URN changes, a
//! sent message is not an idempotent state update; every `msg_created`
//! event becomes its own outbox row, in emission order per session.

use super::{CommitHook, HookBatch};
use flowforge_shared::error::{FlowforgeError, FlowforgeResult};
use flowforge_shared::ids::{ChannelId, ContactId, SessionId};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder, Transaction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageOutboxOp {
    pub contact_id: ContactId,
    pub channel_id: Option<ChannelId>,
    pub text: String,
    pub attachments: Vec<String>,
}

pub struct MessageOutboxHook;

#[async_trait::async_trait]
impl CommitHook for MessageOutboxHook {
    fn name(&self) -> &'static str {
        "message_outbox"
    }

    fn is_pre_commit(&self) -> bool {
        false
    }

    async fn apply(&self, tx: &mut Transaction<'_, Postgres>, batch: &HookBatch) -> FlowforgeResult<()> {
        let mut rows: Vec<(SessionId, i32, MessageOutboxOp)> = Vec::new();
        for (session_id, payloads) in batch {
            for (position, payload) in payloads.iter().enumerate() {
                let op: MessageOutboxOp = serde_json::from_value(payload.clone())?;
                rows.push((*session_id, position as i32, op));
            }
        }
        if rows.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO msgs_msg (session_id, contact_id, channel_id, text, attachments, sent_order, created_on) ",
        );
        builder.push_values(rows.iter(), |mut row, (session_id, position, op)| {
            row.push_bind(session_id.0)
                .push_bind(op.contact_id.value())
                .push_bind(op.channel_id.map(|c| c.value()))
                .push_bind(&op.text)
                .push_bind(serde_json::to_value(&op.attachments).unwrap_or(serde_json::Value::Null))
                .push_bind(*position)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_round_trips_through_json() {
        let op = MessageOutboxOp {
            contact_id: ContactId::new(1),
            channel_id: Some(ChannelId::new(2)),
            text: "hi".into(),
            attachments: vec!["s3://a".into()],
        };
        let value = serde_json::to_value(&op).unwrap();
        let back: MessageOutboxOp = serde_json::from_value(value).unwrap();
        assert_eq!(back.text, "hi");
        assert_eq!(back.attachments.len(), 1);
    }
}
