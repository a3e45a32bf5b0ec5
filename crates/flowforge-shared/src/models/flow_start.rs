//! FlowStart / FlowStartBatch (spec.md §3, §4.H).
//!
//! A start is created pending, resolved to a contact list, split into
//! bounded batches, and flipped to complete when its last batch's handler
//! finishes.

use crate::ids::{ContactId, FlowId, GroupId, StartId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartType {
    Manual,
    Api,
    FlowAction,
    Trigger,
}

impl StartType {
    /// Single-char code stored in the `flows_flowstart.start_type` column.
    pub fn code(self) -> char {
        match self {
            Self::Manual => 'M',
            Self::Api => 'A',
            Self::FlowAction => 'F',
            Self::Trigger => 'T',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Pending,
    Started,
    Complete,
    Failed,
}

/// Who/what a start targets, prior to resolution into a concrete contact
/// list by the start/batch planner (4.H).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartTarget {
    #[serde(default)]
    pub group_ids: Vec<GroupId>,
    #[serde(default)]
    pub contact_ids: Vec<ContactId>,
    #[serde(default)]
    pub urns: Vec<String>,
    pub query: Option<String>,
    /// Whether unresolved URNs should create new contacts (4.G) or be
    /// dropped from the resolved set.
    #[serde(default)]
    pub create_contact: bool,
}

#[derive(Debug, Clone)]
pub struct FlowStart {
    pub id: StartId,
    pub uuid: uuid::Uuid,
    pub start_type: StartType,
    pub flow_id: FlowId,
    pub target: StartTarget,
    pub restart_participants: bool,
    pub include_active: bool,
    pub parent_summary: Option<Value>,
    pub extra: Option<Value>,
    pub status: StartStatus,
    pub contact_count: i64,
}

impl FlowStart {
    pub fn new(id: StartId, uuid: uuid::Uuid, start_type: StartType, flow_id: FlowId, target: StartTarget) -> Self {
        Self {
            id,
            uuid,
            start_type,
            flow_id,
            target,
            restart_participants: false,
            include_active: true,
            parent_summary: None,
            extra: None,
            status: StartStatus::Pending,
            contact_count: 0,
        }
    }
}

/// A unit of work produced by `create_batches` (4.H): one start_id, a
/// bounded contact_id list, and propagated flags/metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStartBatch {
    pub start_id: StartId,
    pub contact_ids: Vec<ContactId>,
    pub restart_participants: bool,
    pub include_active: bool,
    pub parent_summary: Option<Value>,
    pub extra: Option<Value>,
    pub is_last: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_type_codes_match_original_constants() {
        assert_eq!(StartType::Manual.code(), 'M');
        assert_eq!(StartType::Api.code(), 'A');
        assert_eq!(StartType::FlowAction.code(), 'F');
        assert_eq!(StartType::Trigger.code(), 'T');
    }

    #[test]
    fn new_start_defaults_to_pending_with_zero_contacts() {
        let start = FlowStart::new(
            StartId::new(1),
            uuid::Uuid::new_v4(),
            StartType::Manual,
            FlowId::new(1),
            StartTarget::default(),
        );
        assert_eq!(start.status, StartStatus::Pending);
        assert_eq!(start.contact_count, 0);
    }
}
