//! Events emitted by the flow runner for a session (spec.md §3, §4.E).

use crate::ids::{ChannelId, GroupId, TicketId};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// One event kind per variant. Each kind is dispatched to exactly one
/// registered event handler (4.E); handlers may push entries onto a
/// session's `pre_commits`/`post_commits` lists but never write directly.
#[derive(Debug, Clone)]
pub enum Event {
    MsgCreated {
        channel_id: Option<ChannelId>,
        text: String,
        attachments: Vec<String>,
    },
    ContactGroupsAdded {
        group_ids: Vec<GroupId>,
    },
    ContactGroupsRemoved {
        group_ids: Vec<GroupId>,
    },
    ContactFieldChanged {
        field_key: String,
        value: Value,
    },
    ContactUrnsChanged {
        urns: Vec<String>,
    },
    ContactLanguageChanged {
        language: String,
    },
    ContactNameChanged {
        name: String,
    },
    InputLabelsAdded {
        label_ids: Vec<i64>,
    },
    SessionTriggered {
        flow_uuid: uuid::Uuid,
    },
    TicketOpened {
        ticket_id: TicketId,
        subject: String,
    },
    TicketClosed {
        ticket_id: TicketId,
    },
    CampaignFired {
        campaign_id: i64,
        point_id: i64,
    },
    WebhookCalled {
        url: String,
        status: i32,
    },
}

impl Event {
    /// Stable name used for logging and as the commit-hook lookup key
    /// prefix, matching the wire vocabulary in spec.md §3.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MsgCreated { .. } => "msg_created",
            Self::ContactGroupsAdded { .. } => "contact_groups_added",
            Self::ContactGroupsRemoved { .. } => "contact_groups_removed",
            Self::ContactFieldChanged { .. } => "contact_field_changed",
            Self::ContactUrnsChanged { .. } => "contact_urns_changed",
            Self::ContactLanguageChanged { .. } => "contact_language_changed",
            Self::ContactNameChanged { .. } => "contact_name_changed",
            Self::InputLabelsAdded { .. } => "input_labels_added",
            Self::SessionTriggered { .. } => "session_triggered",
            Self::TicketOpened { .. } => "ticket_opened",
            Self::TicketClosed { .. } => "ticket_closed",
            Self::CampaignFired { .. } => "campaign_fired",
            Self::WebhookCalled { .. } => "webhook_called",
        }
    }
}

/// A persisted record of an event having been applied, for audit/replay.
/// Not written by the flow runner itself — the commit engine stamps these
/// alongside the hook payloads it derives.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRecord {
    pub session_id: uuid::Uuid,
    pub kind: String,
    pub occurred_on: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        let event = Event::ContactGroupsAdded {
            group_ids: vec![GroupId::new(1)],
        };
        assert_eq!(event.kind(), "contact_groups_added");
    }
}
