//! URN-change commit hook (spec.md §4.F): "URN hook: final target set
//! replaces intermediates" — a contact's own `ContactUrnsChanged` events
//! within one session do not merge; the last one wins outright, same as
//! the field-value hook's last-write-wins rule but applied to the whole
//! target list rather than per key.
//!
//! Reuses [`crate::contacts::reconcile_contact_urns_tx`] so the commit-time
//! write and the standalone `update_contact_urns` API apply identical
//! reconciliation rules (detach/re-parent/insert/repriortize).

use super::{CommitHook, HookBatch};
use crate::contacts::reconcile_contact_urns_tx;
use flowforge_shared::error::FlowforgeResult;
use flowforge_shared::ids::{ContactId, OrgId};
use flowforge_shared::models::UrnTarget;
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrnChangeOp {
    pub org_id: OrgId,
    pub contact_id: ContactId,
    pub targets: Vec<UrnTarget>,
}

pub struct UrnChangeHook;

#[async_trait::async_trait]
impl CommitHook for UrnChangeHook {
    fn name(&self) -> &'static str {
        "urn_change"
    }

    fn is_pre_commit(&self) -> bool {
        true
    }

    async fn apply(&self, tx: &mut Transaction<'_, Postgres>, batch: &HookBatch) -> FlowforgeResult<()> {
        for payloads in batch.values() {
            let ops: Vec<UrnChangeOp> = payloads
                .iter()
                .map(|p| serde_json::from_value(p.clone()))
                .collect::<Result<_, _>>()?;
            // Last event for this session's contact replaces all earlier
            // ones outright — no merging across ops.
            let Some(last) = ops.last() else { continue };
            reconcile_contact_urns_tx(tx, last.org_id, last.contact_id, &last.targets).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_last_op_in_a_session_survives_coalescing() {
        let ops = vec![
            UrnChangeOp {
                org_id: OrgId::new(1),
                contact_id: ContactId::new(1),
                targets: vec![UrnTarget::new("tel:+1")],
            },
            UrnChangeOp {
                org_id: OrgId::new(1),
                contact_id: ContactId::new(1),
                targets: vec![UrnTarget::new("tel:+2"), UrnTarget::new("tel:+3")],
            },
        ];
        let last = ops.last().unwrap();
        assert_eq!(last.targets.len(), 2);
        assert_eq!(last.targets[0].raw, "tel:+2");
    }
}
