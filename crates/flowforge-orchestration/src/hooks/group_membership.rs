//! Group-membership commit hook (spec.md §4.F, grounded on the original's
//! `handlers/contact_groups_changed.go`).
//!
//! Coalescing rule: within one session, a later event always overrides an
//! earlier one for the same group — seeing a remove after an add cancels
//! the add and vice versa, so each `(session, group)` pair resolves to at
//! most one final operation.

use super::{CommitHook, HookBatch};
use flowforge_shared::error::{FlowforgeError, FlowforgeResult};
use flowforge_shared::ids::{ContactId, GroupId};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder, Transaction};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GroupMembershipOp {
    pub contact_id: ContactId,
    pub group_id: GroupId,
    pub add: bool,
}

pub struct GroupMembershipHook;

impl GroupMembershipHook {
    /// Folds a session's ops into a single add/remove set per group,
    /// last-write-wins (spec.md §4.F step 2).
    fn coalesce(ops: &[GroupMembershipOp]) -> (HashSet<(ContactId, GroupId)>, HashSet<(ContactId, GroupId)>) {
        let mut adds = HashSet::new();
        let mut removes = HashSet::new();
        for op in ops {
            let key = (op.contact_id, op.group_id);
            if op.add {
                removes.remove(&key);
                adds.insert(key);
            } else {
                adds.remove(&key);
                removes.insert(key);
            }
        }
        (adds, removes)
    }
}

#[async_trait::async_trait]
impl CommitHook for GroupMembershipHook {
    fn name(&self) -> &'static str {
        "group_membership"
    }

    fn is_pre_commit(&self) -> bool {
        true
    }

    async fn apply(&self, tx: &mut Transaction<'_, Postgres>, batch: &HookBatch) -> FlowforgeResult<()> {
        let mut all_adds: HashSet<(ContactId, GroupId)> = HashSet::new();
        let mut all_removes: HashSet<(ContactId, GroupId)> = HashSet::new();

        for payloads in batch.values() {
            let ops: Vec<GroupMembershipOp> = payloads
                .iter()
                .map(|p| serde_json::from_value(p.clone()))
                .collect::<Result<_, _>>()?;
            let (adds, removes) = Self::coalesce(&ops);
            all_adds.extend(adds);
            all_removes.extend(removes);
        }

        if !all_adds.is_empty() {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO contacts_contactgroup_contacts (contact_id, contactgroup_id) ",
            );
            builder.push_values(all_adds.iter(), |mut row, (contact_id, group_id)| {
                row.push_bind(contact_id.value()).push_bind(group_id.value());
            });
            builder.push(" ON CONFLICT DO NOTHING");
            builder
                .build()
                .execute(&mut **tx)
                .await
                .map_err(FlowforgeError::Database)?;
        }

        for (contact_id, group_id) in &all_removes {
            sqlx::query(
                "DELETE FROM contacts_contactgroup_contacts WHERE contact_id = $1 AND contactgroup_id = $2",
            )
            .bind(contact_id.value())
            .bind(group_id.value())
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

    fn op(add: bool) -> GroupMembershipOp {
        GroupMembershipOp {
            contact_id: ContactId::new(1),
            group_id: GroupId::new(10),
            add,
        }
    }

    #[test]
    fn later_remove_cancels_earlier_add() {
        let (adds, removes) = GroupMembershipHook::coalesce(&[op(true), op(false)]);
        assert!(adds.is_empty());
        assert_eq!(removes.len(), 1);
    }

    #[test]
    fn later_add_cancels_earlier_remove() {
        let (adds, removes) = GroupMembershipHook::coalesce(&[op(false), op(true)]);
        assert!(removes.is_empty());
        assert_eq!(adds.len(), 1);
    }

    #[test]
    fn repeated_identical_ops_collapse_to_one() {
        let (adds, _) = GroupMembershipHook::coalesce(&[op(true), op(true), op(true)]);
        assert_eq!(adds.len(), 1);
    }

    #[test]
    fn independent_groups_each_resolve_separately() {
        let mut a = op(true);
        a.group_id = GroupId::new(1);
        let mut b = op(false);
        b.group_id = GroupId::new(2);
        let (adds, removes) = GroupMembershipHook::coalesce(&[a, b]);
        assert_eq!(adds.len(), 1);
        assert_eq!(removes.len(), 1);
    }
}
