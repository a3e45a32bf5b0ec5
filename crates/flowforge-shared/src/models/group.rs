//! Group entity (spec.md §3).

use crate::ids::{ContactId, GroupId, OrgId};
use chrono::{DateTime, Utc};

/// The four per-org system groups every contact belongs to exactly one of,
/// partitioned by [`ContactStatus`](super::contact::ContactStatus).
pub const SYSTEM_GROUP_NAMES: [&str; 4] = ["active", "blocked", "stopped", "archived"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// Explicit membership, adjusted only by group-membership hooks.
    Static,
    /// Membership defined by a query, re-evaluated against contact
    /// attributes/fields. Eventually consistent with the query.
    Dynamic,
    /// One of the four status-partition groups; membership follows
    /// `ContactStatus` transitions rather than explicit add/remove.
    System,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Group {
    pub id: GroupId,
    pub org_id: OrgId,
    pub name: String,
    pub is_dynamic: bool,
    pub is_system: bool,
    pub query: Option<String>,
    pub created_on: DateTime<Utc>,
}

impl Group {
    pub fn kind(&self) -> GroupKind {
        if self.is_system {
            GroupKind::System
        } else if self.is_dynamic {
            GroupKind::Dynamic
        } else {
            GroupKind::Static
        }
    }
}

/// A single contact/group membership row.
#[derive(Debug, Clone, Copy)]
pub struct Membership {
    pub contact_id: ContactId,
    pub group_id: GroupId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_kind_prefers_system_over_dynamic() {
        let g = Group {
            id: GroupId::new(1),
            org_id: OrgId::new(1),
            name: "stopped".into(),
            is_dynamic: false,
            is_system: true,
            query: None,
            created_on: Utc::now(),
        };
        assert_eq!(g.kind(), GroupKind::System);
    }
}
