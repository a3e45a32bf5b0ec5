//! Start/batch planner (spec.md §4.H).
//!
//! Resolves a [`FlowStart`]'s target (explicit contacts, group members,
//! URNs, a search query) into a concrete contact id list, applies the
//! `include_active`/`restart_participants` exclusion rules, and splits the
//! result into bounded [`FlowStartBatch`]es the queue can push one at a
//! time.

use crate::contacts::{contact_ids_in_groups, ContactResolver};
use flowforge_shared::error::{FlowforgeError, FlowforgeResult};
use flowforge_shared::ids::ContactId;
use flowforge_shared::models::{FlowStart, FlowStartBatch};
use sqlx::PgPool;
use std::collections::HashSet;

/// Batch size `create_batches` splits a resolved contact list into
/// (spec.md §4.H).
pub const BATCH_SIZE: usize = 100;

/// The org's search-index collaborator, out of scope per spec.md §1 —
/// only the seam `create_batches` calls through to resolve a start's
/// `query` target.
#[async_trait::async_trait]
pub trait SearchIndexClient: Send + Sync {
    async fn query_contact_ids(&self, org_id: flowforge_shared::ids::OrgId, query: &str) -> FlowforgeResult<Vec<ContactId>>;
}

/// No-op client for deployments/tests without a search-index collaborator:
/// a start with a `query` target but no real client resolves to no
/// additional contacts from that query.
#[derive(Debug, Default)]
pub struct NoopSearchIndexClient;

#[async_trait::async_trait]
impl SearchIndexClient for NoopSearchIndexClient {
    async fn query_contact_ids(&self, _org_id: flowforge_shared::ids::OrgId, _query: &str) -> FlowforgeResult<Vec<ContactId>> {
        Ok(Vec::new())
    }
}

pub struct StartPlanner {
    pool: PgPool,
    contacts: ContactResolver,
    search: Box<dyn SearchIndexClient>,
}

impl StartPlanner {
    pub fn new(pool: PgPool, contacts: ContactResolver) -> Self {
        Self {
            pool,
            contacts,
            search: Box::new(NoopSearchIndexClient),
        }
    }

    pub fn with_search_index(pool: PgPool, contacts: ContactResolver, search: Box<dyn SearchIndexClient>) -> Self {
        Self { pool, contacts, search }
    }

    /// Resolves `start`'s target into a contact set, then splits it into
    /// `BATCH_SIZE`-bounded batches, each carrying the flags/metadata a
    /// batch handler needs to run independently of the others (spec.md
    /// §4.H steps 1-5).
    pub async fn create_batches(&self, org_id: flowforge_shared::ids::OrgId, start: &FlowStart) -> FlowforgeResult<Vec<FlowStartBatch>> {
        let mut contact_ids: HashSet<ContactId> = start.target.contact_ids.iter().copied().collect();

        if !start.target.group_ids.is_empty() {
            let group_members = contact_ids_in_groups(&self.pool, &start.target.group_ids).await?;
            contact_ids.extend(group_members);
        }

        if !start.target.urns.is_empty() {
            if start.target.create_contact {
                let resolved = self
                    .contacts
                    .get_or_create_contact_ids_from_urns(org_id, &start.target.urns)
                    .await?;
                contact_ids.extend(resolved.into_values());
            } else {
                let existing = existing_contact_ids_for_urns(&self.pool, org_id, &start.target.urns).await?;
                contact_ids.extend(existing);
            }
        }

        if let Some(query) = &start.target.query {
            let matched = self.search.query_contact_ids(org_id, query).await?;
            contact_ids.extend(matched);
        }

        let filtered = self.apply_exclusions(start, contact_ids).await?;
        Ok(partition_into_batches(start.id, filtered, start.restart_participants, start.include_active, start.parent_summary.clone(), start.extra.clone()))
    }

    /// Unless `include_active` is set, contacts who already have a waiting
    /// session are dropped; unless `restart_participants` is set, contacts
    /// who have already been through this flow are dropped (spec.md §4.H).
    async fn apply_exclusions(&self, start: &FlowStart, contact_ids: HashSet<ContactId>) -> FlowforgeResult<Vec<ContactId>> {
        if contact_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<ContactId> = contact_ids.into_iter().collect();
        ids.sort_by_key(|id| id.value());
        let id_values: Vec<i64> = ids.iter().map(|id| id.value()).collect();

        if !start.include_active {
            let active: Vec<i64> = sqlx::query_scalar(
                "SELECT contact_id FROM flows_flowsession WHERE contact_id = ANY($1) AND status = 'waiting'",
            )
            .bind(&id_values)
            .fetch_all(&self.pool)
            .await
            .map_err(FlowforgeError::Database)?;
            let active: HashSet<i64> = active.into_iter().collect();
            ids.retain(|id| !active.contains(&id.value()));
        }

        if !start.restart_participants {
            let already_ran: Vec<i64> = sqlx::query_scalar(
                "SELECT contact_id FROM flows_flowsession WHERE contact_id = ANY($1) AND current_flow_id = $2",
            )
            .bind(&id_values)
            .bind(start.flow_id.value())
            .fetch_all(&self.pool)
            .await
            .map_err(FlowforgeError::Database)?;
            let already_ran: HashSet<i64> = already_ran.into_iter().collect();
            ids.retain(|id| !already_ran.contains(&id.value()));
        }

        Ok(ids)
    }

    /// Flips `start`'s status to `started` once the first batch has been
    /// enqueued (spec.md §4.H).
    pub async fn mark_start_started(&self, start_id: flowforge_shared::ids::StartId, contact_count: i64) -> FlowforgeResult<()> {
        sqlx::query("UPDATE flows_flowstart SET status = 'started', contact_count = $1 WHERE id = $2")
            .bind(contact_count)
            .bind(start_id.value())
            .execute(&self.pool)
            .await
            .map_err(FlowforgeError::Database)?;
        Ok(())
    }

    /// Flips `start`'s status to `complete`; called by the last batch's
    /// handler once it finishes (spec.md §4.H).
    pub async fn mark_start_complete(&self, start_id: flowforge_shared::ids::StartId) -> FlowforgeResult<()> {
        sqlx::query("UPDATE flows_flowstart SET status = 'complete' WHERE id = $1")
            .bind(start_id.value())
            .execute(&self.pool)
            .await
            .map_err(FlowforgeError::Database)?;
        Ok(())
    }
}

async fn existing_contact_ids_for_urns(pool: &PgPool, org_id: flowforge_shared::ids::OrgId, urns: &[String]) -> FlowforgeResult<Vec<ContactId>> {
    use flowforge_shared::models::urn::normalize_identity;
    let identities: Vec<String> = urns.iter().map(|u| normalize_identity(u)).collect();
    let rows: Vec<i64> = sqlx::query_scalar(
        "SELECT contact_id FROM contacts_contacturn WHERE org_id = $1 AND identity = ANY($2) AND contact_id IS NOT NULL",
    )
    .bind(org_id.value())
    .bind(&identities)
    .fetch_all(pool)
    .await
    .map_err(FlowforgeError::Database)?;
    Ok(rows.into_iter().map(ContactId::new).collect())
}

fn partition_into_batches(
    start_id: flowforge_shared::ids::StartId,
    contact_ids: Vec<ContactId>,
    restart_participants: bool,
    include_active: bool,
    parent_summary: Option<serde_json::Value>,
    extra: Option<serde_json::Value>,
) -> Vec<FlowStartBatch> {
    if contact_ids.is_empty() {
        return Vec::new();
    }
    let chunks: Vec<Vec<ContactId>> = contact_ids.chunks(BATCH_SIZE).map(|c| c.to_vec()).collect();
    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(index, contact_ids)| FlowStartBatch {
            start_id,
            contact_ids,
            restart_participants,
            include_active,
            parent_summary: parent_summary.clone(),
            extra: extra.clone(),
            is_last: index == last,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_shared::ids::StartId;

    #[test]
    fn partitions_respect_batch_size() {
        let ids: Vec<ContactId> = (0..250).map(ContactId::new).collect();
        let batches = partition_into_batches(StartId::new(1), ids, false, true, None, None);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].contact_ids.len(), 100);
        assert_eq!(batches[2].contact_ids.len(), 50);
    }

    #[test]
    fn only_the_final_batch_is_marked_last() {
        let ids: Vec<ContactId> = (0..150).map(ContactId::new).collect();
        let batches = partition_into_batches(StartId::new(1), ids, false, true, None, None);
        assert!(!batches[0].is_last);
        assert!(batches[1].is_last);
    }

    #[test]
    fn empty_contact_list_yields_no_batches() {
        let batches = partition_into_batches(StartId::new(1), Vec::new(), false, true, None, None);
        assert!(batches.is_empty());
    }
}
