//! Task envelope carried by the queue (spec.md §3, §4.A, §6).

use crate::ids::OrgId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// The minimum task kinds the dispatcher registers handlers for (spec.md §6).
///
/// `Unknown` carries the raw wire kind through rather than collapsing it
/// into a registered variant, so the dispatcher's unregistered-kind arm
/// (spec.md §4.C, §7: "log error and drop") is the thing that handles a
/// genuinely unrecognized task kind, not whatever variant happens to sit
/// in a `match`'s default arm.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKind {
    StartFlow,
    StartFlowBatch,
    HandleContactEvent,
    FireCampaignEvent,
    SendBroadcast,
    InterruptSessions,
    Unknown(String),
}

impl TaskKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::StartFlow => "start_flow",
            Self::StartFlowBatch => "start_flow_batch",
            Self::HandleContactEvent => "handle_contact_event",
            Self::FireCampaignEvent => "fire_campaign_event",
            Self::SendBroadcast => "send_broadcast",
            Self::InterruptSessions => "interrupt_sessions",
            Self::Unknown(raw) => raw,
        }
    }

    /// Parses a wire task kind string, preserving anything unrecognized as
    /// `Unknown` rather than guessing a registered variant for it.
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "start_flow" => Self::StartFlow,
            "start_flow_batch" => Self::StartFlowBatch,
            "handle_contact_event" => Self::HandleContactEvent,
            "fire_campaign_event" => Self::FireCampaignEvent,
            "send_broadcast" => Self::SendBroadcast,
            "interrupt_sessions" => Self::InterruptSessions,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl Serialize for TaskKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

/// Wire format: `{ "type": "<kind>", "org_id": <int>, "task": <opaque-json>,
/// "queued_on": <iso8601>, "priority": <bool> }` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub org_id: OrgId,
    pub task: Value,
    pub queued_on: DateTime<Utc>,
    pub priority: bool,
}

impl Task {
    pub fn new(kind: TaskKind, org_id: OrgId, body: Value, queued_on: DateTime<Utc>, priority: bool) -> Self {
        Self {
            kind,
            org_id,
            task: body,
            queued_on,
            priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_round_trips_through_json() {
        let task = Task::new(
            TaskKind::StartFlowBatch,
            OrgId::new(1),
            serde_json::json!({"start_id": 7}),
            Utc::now(),
            true,
        );
        let encoded = serde_json::to_string(&task).expect("serialize");
        assert!(encoded.contains("\"type\":\"start_flow_batch\""));
        let decoded: Task = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded.kind, TaskKind::StartFlowBatch);
        assert!(decoded.priority);
    }
}
