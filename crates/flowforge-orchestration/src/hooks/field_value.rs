//! Field-value commit hook (spec.md §4.F): last write wins per field key,
//! the same idempotence rule the group-membership hook applies to groups.

use super::{CommitHook, HookBatch};
use flowforge_shared::error::{FlowforgeError, FlowforgeResult};
use flowforge_shared::ids::ContactId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Postgres, Transaction};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldValueOp {
    pub contact_id: ContactId,
    pub field_key: String,
    pub value: Value,
}

pub struct FieldValueHook;

impl FieldValueHook {
    fn coalesce(ops: &[FieldValueOp]) -> HashMap<(ContactId, String), Value> {
        let mut resolved = HashMap::new();
        for op in ops {
            resolved.insert((op.contact_id, op.field_key.clone()), op.value.clone());
        }
        resolved
    }
}

#[async_trait::async_trait]
impl CommitHook for FieldValueHook {
    fn name(&self) -> &'static str {
        "field_value"
    }

    fn is_pre_commit(&self) -> bool {
        true
    }

    async fn apply(&self, tx: &mut Transaction<'_, Postgres>, batch: &HookBatch) -> FlowforgeResult<()> {
        let mut resolved: HashMap<(ContactId, String), Value> = HashMap::new();
        for payloads in batch.values() {
            let ops: Vec<FieldValueOp> = payloads
                .iter()
                .map(|p| serde_json::from_value(p.clone()))
                .collect::<Result<_, _>>()?;
            resolved.extend(Self::coalesce(&ops));
        }

        for ((contact_id, field_key), value) in resolved {
            sqlx::query(
                "INSERT INTO contacts_contactfield (contact_id, field_key, value) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (contact_id, field_key) DO UPDATE SET value = EXCLUDED.value",
            )
            .bind(contact_id.value())
            .bind(field_key)
            .bind(value)
            .execute(&mut **tx)
            .await
            .map_err(FlowforgeError::Database)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_value_for_same_key_wins() {
        let ops = vec![
            FieldValueOp {
                contact_id: ContactId::new(1),
                field_key: "age".into(),
                value: Value::from(30),
            },
            FieldValueOp {
                contact_id: ContactId::new(1),
                field_key: "age".into(),
                value: Value::from(31),
            },
        ];
        let resolved = FieldValueHook::coalesce(&ops);
        assert_eq!(
            resolved.get(&(ContactId::new(1), "age".to_string())),
            Some(&Value::from(31))
        );
    }

    #[test]
    fn distinct_keys_both_survive() {
        let ops = vec![
            FieldValueOp {
                contact_id: ContactId::new(1),
                field_key: "age".into(),
                value: Value::from(30),
            },
            FieldValueOp {
                contact_id: ContactId::new(1),
                field_key: "city".into(),
                value: Value::from("NYC"),
            },
        ];
        let resolved = FieldValueHook::coalesce(&ops);
        assert_eq!(resolved.len(), 2);
    }
}
