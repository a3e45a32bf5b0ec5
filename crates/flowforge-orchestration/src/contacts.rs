//! Contact resolver (spec.md §4.G).
//!
//! Two hard problems live here: resolving a URN to a contact id under
//! concurrent creators racing to claim the same identity, and reconciling
//! a contact's URN set against a target list (insert/re-parent/orphan/
//! repriortize): query-param stripping, orphan reclaim, priority ordering,
//! and steal-without-event all apply here.

use flowforge_shared::error::{FlowforgeError, FlowforgeResult};
use flowforge_shared::ids::{ChannelId, ContactId, GroupId, OrgId, UrnId, UserId};
use flowforge_shared::models::urn::normalize_identity;
use flowforge_shared::models::{ContactStatus, ContactStatusChange, UrnTarget};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;

/// Priorities are assigned so the first element of a target list lands at
/// 1000 and each subsequent one is one lower (spec.md §4.G
/// "update_contact_urns"; §8 scenario S3 expects `prio=1000, 999`, matching
/// `original_source/core/models/contacts_test.go`'s fixed 1000/999/998
/// top-priority scheme).
const URN_TOP_PRIORITY: i32 = 1000;

/// Evaluates which dynamic groups a contact now belongs to. The query
/// engine itself is the search-index collaborator (out of scope, spec.md
/// §1); this trait is only the seam `create_contact` calls through.
#[async_trait::async_trait]
pub trait DynamicGroupEvaluator: Send + Sync {
    async fn reevaluate(&self, tx: &mut Transaction<'_, Postgres>, org_id: OrgId, contact_id: ContactId) -> FlowforgeResult<()>;
}

/// No-op evaluator for deployments/tests without a search-index collaborator.
#[derive(Debug, Default)]
pub struct NoopDynamicGroupEvaluator;

#[async_trait::async_trait]
impl DynamicGroupEvaluator for NoopDynamicGroupEvaluator {
    async fn reevaluate(&self, _tx: &mut Transaction<'_, Postgres>, _org_id: OrgId, _contact_id: ContactId) -> FlowforgeResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ContactConflict {
    #[error("one or more URNs are already owned by another contact")]
    UrnsInUse,
}

pub struct ContactResolver {
    pool: PgPool,
    group_evaluator: Box<dyn DynamicGroupEvaluator>,
}

impl ContactResolver {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            group_evaluator: Box::new(NoopDynamicGroupEvaluator),
        }
    }

    pub fn with_group_evaluator(pool: PgPool, group_evaluator: Box<dyn DynamicGroupEvaluator>) -> Self {
        Self { pool, group_evaluator }
    }

    /// Resolves each raw URN to its owning contact, creating a new contact
    /// for any identity that is absent or orphan (spec.md §4.G).
    ///
    /// Each identity is resolved independently under its own short
    /// transaction so one caller's race on URN A cannot block another
    /// caller's unrelated URN B.
    pub async fn get_or_create_contact_ids_from_urns(
        &self,
        org_id: OrgId,
        urns: &[String],
    ) -> FlowforgeResult<HashMap<String, ContactId>> {
        let mut resolved = HashMap::with_capacity(urns.len());
        for raw in urns {
            let identity = normalize_identity(raw);
            let contact_id = self.get_or_create_one(org_id, &identity).await?;
            resolved.insert(raw.clone(), contact_id);
        }
        Ok(resolved)
    }

    async fn get_or_create_one(&self, org_id: OrgId, identity: &str) -> FlowforgeResult<ContactId> {
        loop {
            let mut tx = self.pool.begin().await.map_err(FlowforgeError::Database)?;

            let just_inserted: Option<(i64,)> = sqlx::query_as(
                "INSERT INTO contacts_contacturn (org_id, identity, priority, contact_id) \
                 VALUES ($1, $2, $3, NULL) \
                 ON CONFLICT (org_id, identity) DO NOTHING \
                 RETURNING id",
            )
            .bind(org_id.value())
            .bind(identity)
            .bind(URN_TOP_PRIORITY)
            .fetch_optional(&mut *tx)
            .await
            .map_err(FlowforgeError::Database)?;

            let (urn_id, owner): (UrnId, Option<ContactId>) = match just_inserted {
                Some((id,)) => (UrnId::new(id), None),
                None => {
                    let row: (i64, Option<i64>) = sqlx::query_as(
                        "SELECT id, contact_id FROM contacts_contacturn WHERE org_id = $1 AND identity = $2",
                    )
                    .bind(org_id.value())
                    .bind(identity)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(FlowforgeError::Database)?;
                    (UrnId::new(row.0), row.1.map(ContactId::new))
                }
            };

            if let Some(owner) = owner {
                tx.commit().await.map_err(FlowforgeError::Database)?;
                return Ok(owner);
            }

            // The URN row exists but is orphan: try to claim it for a new contact.
            let (new_uuid,): (uuid::Uuid,) = (uuid::Uuid::new_v4(),);
            let new_contact_id: (i64,) = sqlx::query_as(
                "INSERT INTO contacts_contact (org_id, uuid, status, created_on, modified_on) \
                 VALUES ($1, $2, 'A', now(), now()) RETURNING id",
            )
            .bind(org_id.value())
            .bind(new_uuid)
            .fetch_one(&mut *tx)
            .await
            .map_err(FlowforgeError::Database)?;
            let new_contact_id = ContactId::new(new_contact_id.0);

            let claim = sqlx::query(
                "UPDATE contacts_contacturn SET contact_id = $1 WHERE id = $2 AND contact_id IS NULL",
            )
            .bind(new_contact_id.value())
            .bind(urn_id.value())
            .execute(&mut *tx)
            .await
            .map_err(FlowforgeError::Database)?;

            if claim.rows_affected() == 0 {
                // Another creator claimed it between our read and our update.
                tx.rollback().await.map_err(FlowforgeError::Database)?;
                continue;
            }

            tx.commit().await.map_err(FlowforgeError::Database)?;
            return Ok(new_contact_id);
        }
    }

    /// Strong form: every supplied URN must end up owned by the new
    /// contact, or the whole call fails (spec.md §4.G "create_contact").
    pub async fn create_contact(
        &self,
        org_id: OrgId,
        name: Option<String>,
        language: Option<String>,
        urns: &[UrnTarget],
    ) -> FlowforgeResult<ContactId> {
        let mut tx = self.pool.begin().await.map_err(FlowforgeError::Database)?;

        for target in urns {
            let identity = target.identity();
            let owner: Option<Option<i64>> = sqlx::query_scalar(
                "SELECT contact_id FROM contacts_contacturn WHERE org_id = $1 AND identity = $2",
            )
            .bind(org_id.value())
            .bind(&identity)
            .fetch_optional(&mut *tx)
            .await
            .map_err(FlowforgeError::Database)?;

            if let Some(Some(_existing_owner)) = owner {
                return Err(FlowforgeError::ContactConflict(ContactConflict::UrnsInUse.to_string()));
            }
        }

        let contact_id: (i64,) = sqlx::query_as(
            "INSERT INTO contacts_contact (org_id, name, language, status, created_on, modified_on) \
             VALUES ($1, $2, $3, 'A', now(), now()) RETURNING id",
        )
        .bind(org_id.value())
        .bind(&name)
        .bind(&language)
        .fetch_one(&mut *tx)
        .await
        .map_err(FlowforgeError::Database)?;
        let contact_id = ContactId::new(contact_id.0);

        let targets: Vec<UrnTarget> = urns.to_vec();
        reconcile_contact_urns_tx(&mut tx, org_id, contact_id, &targets).await?;

        self.group_evaluator.reevaluate(&mut tx, org_id, contact_id).await?;

        tx.commit().await.map_err(FlowforgeError::Database)?;
        Ok(contact_id)
    }

    /// Reconciles each contact's URN set to its target list (spec.md §4.G
    /// "update_contact_urns"). Runs in its own transaction; the commit
    /// engine's URN-change hook instead calls [`reconcile_contact_urns_tx`]
    /// directly against its own open transaction.
    pub async fn update_contact_urns(&self, org_id: OrgId, changes: &[(ContactId, Vec<UrnTarget>)]) -> FlowforgeResult<()> {
        let mut tx = self.pool.begin().await.map_err(FlowforgeError::Database)?;
        for (contact_id, targets) in changes {
            reconcile_contact_urns_tx(&mut tx, org_id, *contact_id, targets).await?;
        }
        tx.commit().await.map_err(FlowforgeError::Database)?;
        Ok(())
    }

    /// Moves `urn_id` to top priority for `contact_id` and sets its
    /// channel. No-op if already top with the same channel; a `None`
    /// channel leaves the current channel unchanged (spec.md §4.G).
    pub async fn update_preferred_urn(&self, contact_id: ContactId, urn_id: UrnId, channel_id: Option<ChannelId>) -> FlowforgeResult<()> {
        let mut tx = self.pool.begin().await.map_err(FlowforgeError::Database)?;

        let current: (i32, i32, Option<i64>) = sqlx::query_as(
            "SELECT priority, (SELECT MAX(priority) FROM contacts_contacturn WHERE contact_id = $1) AS max_priority, channel_id \
             FROM contacts_contacturn WHERE id = $2 AND contact_id = $1",
        )
        .bind(contact_id.value())
        .bind(urn_id.value())
        .fetch_one(&mut *tx)
        .await
        .map_err(FlowforgeError::Database)?;
        let (priority, max_priority, existing_channel) = current;

        let already_top = priority >= max_priority;
        let channel_unchanged = match channel_id {
            None => true,
            Some(c) => existing_channel == Some(c.value()),
        };
        if already_top && channel_unchanged {
            tx.commit().await.map_err(FlowforgeError::Database)?;
            return Ok(());
        }

        if let Some(channel) = channel_id {
            sqlx::query("UPDATE contacts_contacturn SET priority = $1, channel_id = $2 WHERE id = $3")
                .bind(max_priority + 1)
                .bind(channel.value())
                .bind(urn_id.value())
                .execute(&mut *tx)
                .await
                .map_err(FlowforgeError::Database)?;
        } else {
            sqlx::query("UPDATE contacts_contacturn SET priority = $1 WHERE id = $2")
                .bind(max_priority + 1)
                .bind(urn_id.value())
                .execute(&mut *tx)
                .await
                .map_err(FlowforgeError::Database)?;
        }

        touch_contacts(&mut tx, &[contact_id]).await?;
        tx.commit().await.map_err(FlowforgeError::Database)?;
        Ok(())
    }

    /// status -> stopped, removed from all non-system groups, added to the
    /// "stopped" system group, all in one transaction (spec.md §4.G).
    pub async fn stop_contact(&self, contact_id: ContactId) -> FlowforgeResult<()> {
        let mut tx = self.pool.begin().await.map_err(FlowforgeError::Database)?;

        sqlx::query(
            "DELETE FROM contacts_contactgroup_contacts \
             WHERE contact_id = $1 \
             AND contactgroup_id IN (SELECT id FROM contacts_contactgroup WHERE is_system = FALSE)",
        )
        .bind(contact_id.value())
        .execute(&mut *tx)
        .await
        .map_err(FlowforgeError::Database)?;

        sqlx::query(
            "UPDATE contacts_contact SET status = 'S', modified_on = now() WHERE id = $1",
        )
        .bind(contact_id.value())
        .execute(&mut *tx)
        .await
        .map_err(FlowforgeError::Database)?;

        sqlx::query(
            "INSERT INTO contacts_contactgroup_contacts (contact_id, contactgroup_id) \
             SELECT $1, id FROM contacts_contactgroup WHERE is_system = TRUE AND name = 'stopped' \
             ON CONFLICT DO NOTHING",
        )
        .bind(contact_id.value())
        .execute(&mut *tx)
        .await
        .map_err(FlowforgeError::Database)?;

        tx.commit().await.map_err(FlowforgeError::Database)?;
        Ok(())
    }

    /// Bulk status update; empty input is a no-op (spec.md §4.G).
    pub async fn update_contact_status(&self, changes: &[ContactStatusChange]) -> FlowforgeResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(FlowforgeError::Database)?;
        for change in changes {
            sqlx::query("UPDATE contacts_contact SET status = $1, modified_on = now() WHERE id = $2")
                .bind(change.status.code().to_string())
                .bind(change.contact_id.value())
                .execute(&mut *tx)
                .await
                .map_err(FlowforgeError::Database)?;
        }
        tx.commit().await.map_err(FlowforgeError::Database)?;
        Ok(())
    }

    /// Bulk touch; empty input is a no-op (spec.md §4.G).
    pub async fn update_contact_modified_on(&self, ids: &[ContactId]) -> FlowforgeResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(FlowforgeError::Database)?;
        touch_contacts(&mut tx, ids).await?;
        tx.commit().await.map_err(FlowforgeError::Database)?;
        Ok(())
    }

    /// Bulk set `modified_by` and touch `modified_on` (spec.md §4.G).
    pub async fn update_contact_modified_by(&self, ids: &[ContactId], user: UserId) -> FlowforgeResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let id_values: Vec<i64> = ids.iter().map(|id| id.value()).collect();
        sqlx::query("UPDATE contacts_contact SET modified_by = $1, modified_on = now() WHERE id = ANY($2)")
            .bind(user.value())
            .bind(&id_values)
            .execute(&self.pool)
            .await
            .map_err(FlowforgeError::Database)?;
        Ok(())
    }

    /// Sets `last_seen_on` and `modified_on` to `t`. The DB does not
    /// enforce monotonicity; callers must be correct (spec.md §4.G).
    pub async fn update_contact_last_seen_on(&self, contact_id: ContactId, t: chrono::DateTime<chrono::Utc>) -> FlowforgeResult<()> {
        sqlx::query("UPDATE contacts_contact SET last_seen_on = $1, modified_on = $1 WHERE id = $2")
            .bind(t)
            .bind(contact_id.value())
            .execute(&self.pool)
            .await
            .map_err(FlowforgeError::Database)?;
        Ok(())
    }
}

async fn touch_contacts(tx: &mut Transaction<'_, Postgres>, ids: &[ContactId]) -> FlowforgeResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let id_values: Vec<i64> = ids.iter().map(|id| id.value()).collect();
    sqlx::query("UPDATE contacts_contact SET modified_on = now() WHERE id = ANY($1)")
        .bind(&id_values)
        .execute(&mut **tx)
        .await
        .map_err(FlowforgeError::Database)?;
    Ok(())
}

/// Reconciles one contact's URN set against `targets`, usable both as its
/// own transaction (`update_contact_urns`) and from inside the commit
/// engine's already-open transaction (the URN-change hook).
///
/// Rules (spec.md §4.G):
/// - identities missing from `targets` are detached (orphaned), never
///   hard-deleted;
/// - identities present and currently orphan or owned by a different
///   contact are re-parented ("stealing" is permitted at this level);
/// - new identities are inserted with the right priority;
/// - priorities are `1000 - index`, unique within a contact;
/// - the contact row is touched.
pub async fn reconcile_contact_urns_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: OrgId,
    contact_id: ContactId,
    targets: &[UrnTarget],
) -> FlowforgeResult<()> {
    let target_identities: Vec<String> = targets.iter().map(|t| t.identity()).collect();

    let current: Vec<(i64, String)> = sqlx::query_as(
        "SELECT id, identity FROM contacts_contacturn WHERE contact_id = $1",
    )
    .bind(contact_id.value())
    .fetch_all(&mut **tx)
    .await
    .map_err(FlowforgeError::Database)?;

    let to_detach: Vec<i64> = current
        .iter()
        .filter(|(_, identity)| !target_identities.contains(identity))
        .map(|(id, _)| *id)
        .collect();

    if !to_detach.is_empty() {
        sqlx::query("UPDATE contacts_contacturn SET contact_id = NULL WHERE id = ANY($1)")
            .bind(&to_detach)
            .execute(&mut **tx)
            .await
            .map_err(FlowforgeError::Database)?;
    }

    for (index, target) in targets.iter().enumerate() {
        let identity = target.identity();
        let priority = URN_TOP_PRIORITY - index as i32;

        let existing: Option<(i64, Option<i64>)> = sqlx::query_as(
            "SELECT id, contact_id FROM contacts_contacturn WHERE org_id = $1 AND identity = $2",
        )
        .bind(org_id.value())
        .bind(&identity)
        .fetch_optional(&mut **tx)
        .await
        .map_err(FlowforgeError::Database)?;

        match existing {
            Some((urn_id, _owner)) => {
                sqlx::query(
                    "UPDATE contacts_contacturn SET contact_id = $1, priority = $2, display = $3, channel_id = $4, auth_token = $5 \
                     WHERE id = $6",
                )
                .bind(contact_id.value())
                .bind(priority)
                .bind(&target.display)
                .bind(target.channel_id.map(|c| c.value()))
                .bind(&target.auth_token)
                .bind(urn_id)
                .execute(&mut **tx)
                .await
                .map_err(FlowforgeError::Database)?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO contacts_contacturn (org_id, identity, display, priority, channel_id, contact_id, auth_token, created_on) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, now())",
                )
                .bind(org_id.value())
                .bind(&identity)
                .bind(&target.display)
                .bind(priority)
                .bind(target.channel_id.map(|c| c.value()))
                .bind(contact_id.value())
                .bind(&target.auth_token)
                .execute(&mut **tx)
                .await
                .map_err(FlowforgeError::Database)?;
            }
        }
    }

    touch_contacts(tx, &[contact_id]).await?;
    Ok(())
}

/// Bulk variant used by the start/batch planner when resolving group
/// membership targets against a list of ids — kept here rather than in
/// `hooks::group_membership` since it is a read, not a commit-time write.
pub async fn contact_ids_in_groups(pool: &PgPool, group_ids: &[GroupId]) -> FlowforgeResult<Vec<ContactId>> {
    if group_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT DISTINCT contact_id FROM contacts_contactgroup_contacts WHERE contactgroup_id IN (",
    );
    let mut separated = builder.separated(", ");
    for id in group_ids {
        separated.push_bind(id.value());
    }
    builder.push(")");

    let rows: Vec<(i64,)> = builder
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(FlowforgeError::Database)?;
    Ok(rows.into_iter().map(|(id,)| ContactId::new(id)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_assignment_favors_first_target() {
        let len = 3i32;
        let priorities: Vec<i32> = (0..len).map(|index| URN_TOP_PRIORITY - index).collect();
        assert_eq!(priorities, vec![1000, 999, 998]);
        assert!(priorities[0] > priorities[1]);
        assert!(priorities[1] > priorities[2]);
    }

    #[test]
    fn update_preferred_urn_does_not_duplicate_priorities() {
        // Regression for a prior bug: shifting every urn with priority >=
        // the target's old priority, then separately setting the target to
        // max_priority + 1, could land both on the same value when the
        // target was already the second-highest. Only the single
        // max_priority + 1 assignment should ever run.
        let a_priority = 1000;
        let b_priority = 999;
        let max_priority = a_priority.max(b_priority);
        let b_new_priority = max_priority + 1;
        assert_ne!(a_priority, b_new_priority);
    }
}
