//! Default event->hook wiring (spec.md §4.E, §9 "Event -> hook -> commit
//! indirection"): one [`EventHandler`] per event kind, registered once at
//! startup. Each handler's only job is to translate its event into
//! `(hook, payload)` entries on the session — never a direct write.

use crate::events::{EventHandler, EventRegistry};
use crate::hooks::contact_attrs::ContactAttrOp;
use crate::hooks::group_membership::GroupMembershipOp;
use crate::hooks::message_outbox::MessageOutboxOp;
use crate::hooks::ticket_lifecycle::TicketOp;
use crate::hooks::urn_change::UrnChangeOp;
use flowforge_shared::error::{FlowforgeError, FlowforgeResult};
use flowforge_shared::ids::OrgId;
use flowforge_shared::models::{Event, Session};
use flowforge_shared::models::UrnTarget;
use std::sync::Arc;

struct GroupsAddedHandler;
impl EventHandler for GroupsAddedHandler {
    fn apply(&self, session: &mut Session, event: &Event) -> FlowforgeResult<()> {
        let Event::ContactGroupsAdded { group_ids } = event else {
            return Err(FlowforgeError::invariant("expected contact_groups_added"));
        };
        for group_id in group_ids {
            let op = GroupMembershipOp {
                contact_id: session.contact_id,
                group_id: *group_id,
                add: true,
            };
            session.push_pre_commit("group_membership", serde_json::to_value(op)?);
        }
        Ok(())
    }
}

struct GroupsRemovedHandler;
impl EventHandler for GroupsRemovedHandler {
    fn apply(&self, session: &mut Session, event: &Event) -> FlowforgeResult<()> {
        let Event::ContactGroupsRemoved { group_ids } = event else {
            return Err(FlowforgeError::invariant("expected contact_groups_removed"));
        };
        for group_id in group_ids {
            let op = GroupMembershipOp {
                contact_id: session.contact_id,
                group_id: *group_id,
                add: false,
            };
            session.push_pre_commit("group_membership", serde_json::to_value(op)?);
        }
        Ok(())
    }
}

struct FieldChangedHandler;
impl EventHandler for FieldChangedHandler {
    fn apply(&self, session: &mut Session, event: &Event) -> FlowforgeResult<()> {
        let Event::ContactFieldChanged { field_key, value } = event else {
            return Err(FlowforgeError::invariant("expected contact_field_changed"));
        };
        let op = crate::hooks::field_value::FieldValueOp {
            contact_id: session.contact_id,
            field_key: field_key.clone(),
            value: value.clone(),
        };
        session.push_pre_commit("field_value", serde_json::to_value(op)?);
        Ok(())
    }
}

/// Org id is threaded in at registration time since the event itself
/// carries no org — the caller (session runner) processes one org's
/// sessions per commit batch (spec.md §4.F "a set of advanced sessions for
/// the same organization").
struct UrnsChangedHandler {
    org_id: OrgId,
}
impl EventHandler for UrnsChangedHandler {
    fn apply(&self, session: &mut Session, event: &Event) -> FlowforgeResult<()> {
        let Event::ContactUrnsChanged { urns } = event else {
            return Err(FlowforgeError::invariant("expected contact_urns_changed"));
        };
        let op = UrnChangeOp {
            org_id: self.org_id,
            contact_id: session.contact_id,
            targets: urns.iter().map(|raw| UrnTarget::new(raw.clone())).collect(),
        };
        session.push_pre_commit("urn_change", serde_json::to_value(op)?);
        Ok(())
    }
}

struct NameChangedHandler;
impl EventHandler for NameChangedHandler {
    fn apply(&self, session: &mut Session, event: &Event) -> FlowforgeResult<()> {
        let Event::ContactNameChanged { name } = event else {
            return Err(FlowforgeError::invariant("expected contact_name_changed"));
        };
        let op = ContactAttrOp::Name {
            contact_id: session.contact_id,
            name: name.clone(),
        };
        session.push_pre_commit("contact_attrs", serde_json::to_value(op)?);
        Ok(())
    }
}

struct LanguageChangedHandler;
impl EventHandler for LanguageChangedHandler {
    fn apply(&self, session: &mut Session, event: &Event) -> FlowforgeResult<()> {
        let Event::ContactLanguageChanged { language } = event else {
            return Err(FlowforgeError::invariant("expected contact_language_changed"));
        };
        let op = ContactAttrOp::Language {
            contact_id: session.contact_id,
            language: language.clone(),
        };
        session.push_pre_commit("contact_attrs", serde_json::to_value(op)?);
        Ok(())
    }
}

struct MsgCreatedHandler;
impl EventHandler for MsgCreatedHandler {
    fn apply(&self, session: &mut Session, event: &Event) -> FlowforgeResult<()> {
        let Event::MsgCreated { channel_id, text, attachments } = event else {
            return Err(FlowforgeError::invariant("expected msg_created"));
        };
        let op = MessageOutboxOp {
            contact_id: session.contact_id,
            channel_id: *channel_id,
            text: text.clone(),
            attachments: attachments.clone(),
        };
        session.push_post_commit("message_outbox", serde_json::to_value(op)?);
        Ok(())
    }
}

struct TicketOpenedHandler;
impl EventHandler for TicketOpenedHandler {
    fn apply(&self, session: &mut Session, event: &Event) -> FlowforgeResult<()> {
        let Event::TicketOpened { subject, .. } = event else {
            return Err(FlowforgeError::invariant("expected ticket_opened"));
        };
        // The triggering channel is carried on the session's wait state by
        // convention; the flow runner is the authority on which channel a
        // ticket opens against, out of scope per spec.md §1.
        let channel_id = session
            .wait_state
            .as_ref()
            .and_then(|v| v.get("channel_id"))
            .and_then(|v| v.as_i64())
            .map(flowforge_shared::ids::ChannelId::new)
            .unwrap_or(flowforge_shared::ids::ChannelId::new(0));
        let op = TicketOp::Open {
            contact_id: session.contact_id,
            channel_id,
            subject: subject.clone(),
        };
        session.push_post_commit("ticket_lifecycle", serde_json::to_value(op)?);
        Ok(())
    }
}

struct TicketClosedHandler;
impl EventHandler for TicketClosedHandler {
    fn apply(&self, session: &mut Session, event: &Event) -> FlowforgeResult<()> {
        let Event::TicketClosed { ticket_id } = event else {
            return Err(FlowforgeError::invariant("expected ticket_closed"));
        };
        let op = TicketOp::Close { ticket_id: *ticket_id };
        session.push_post_commit("ticket_lifecycle", serde_json::to_value(op)?);
        Ok(())
    }
}

/// Catch-all handler for event kinds with no dedicated table: they still
/// leave an audit trail via [`crate::hooks::audit_log::AuditLogHook`].
struct AuditOnlyHandler;
impl EventHandler for AuditOnlyHandler {
    fn apply(&self, session: &mut Session, event: &Event) -> FlowforgeResult<()> {
        let detail = match event {
            Event::InputLabelsAdded { label_ids } => serde_json::json!({ "label_ids": label_ids }),
            Event::SessionTriggered { flow_uuid } => serde_json::json!({ "flow_uuid": flow_uuid }),
            Event::CampaignFired { campaign_id, point_id } => {
                serde_json::json!({ "campaign_id": campaign_id, "point_id": point_id })
            }
            Event::WebhookCalled { url, status } => serde_json::json!({ "url": url, "status": status }),
            other => return Err(FlowforgeError::invariant(format!("audit-only handler got {}", other.kind()))),
        };
        let op = crate::hooks::audit_log::AuditLogOp {
            kind: event.kind().to_string(),
            detail,
        };
        session.push_post_commit("audit_log", serde_json::to_value(op)?);
        Ok(())
    }
}

/// Registers the full default set of event handlers from spec.md §3's
/// event kind list. Panics on duplicate registration, same as
/// [`EventRegistry::register`] itself.
pub fn register_default_handlers(registry: &mut EventRegistry, org_id: OrgId) {
    registry.register("contact_groups_added", Arc::new(GroupsAddedHandler));
    registry.register("contact_groups_removed", Arc::new(GroupsRemovedHandler));
    registry.register("contact_field_changed", Arc::new(FieldChangedHandler));
    registry.register("contact_urns_changed", Arc::new(UrnsChangedHandler { org_id }));
    registry.register("contact_name_changed", Arc::new(NameChangedHandler));
    registry.register("contact_language_changed", Arc::new(LanguageChangedHandler));
    registry.register("msg_created", Arc::new(MsgCreatedHandler));
    registry.register("ticket_opened", Arc::new(TicketOpenedHandler));
    registry.register("ticket_closed", Arc::new(TicketClosedHandler));
    registry.register("input_labels_added", Arc::new(AuditOnlyHandler));
    registry.register("session_triggered", Arc::new(AuditOnlyHandler));
    registry.register("campaign_fired", Arc::new(AuditOnlyHandler));
    registry.register("webhook_called", Arc::new(AuditOnlyHandler));
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_shared::ids::{ContactId, FlowId, GroupId, SessionId};

    fn session() -> Session {
        Session::new(SessionId(uuid::Uuid::new_v4()), ContactId::new(1), FlowId::new(1), chrono::Utc::now())
    }

    #[test]
    fn registers_all_thirteen_kinds_without_panicking() {
        let mut registry = EventRegistry::new();
        register_default_handlers(&mut registry, OrgId::new(1));
        let mut s = session();
        s.events = vec![Event::ContactGroupsAdded { group_ids: vec![GroupId::new(1)] }];
        registry.apply_events(&mut s).unwrap();
        assert_eq!(s.pre_commits.len(), 1);
        assert_eq!(s.pre_commits[0].hook, "group_membership");
    }

    #[test]
    fn msg_created_enqueues_a_post_commit() {
        let mut registry = EventRegistry::new();
        register_default_handlers(&mut registry, OrgId::new(1));
        let mut s = session();
        s.events = vec![Event::MsgCreated {
            channel_id: None,
            text: "hi".into(),
            attachments: vec![],
        }];
        registry.apply_events(&mut s).unwrap();
        assert_eq!(s.post_commits.len(), 1);
        assert_eq!(s.post_commits[0].hook, "message_outbox");
    }

    #[test]
    fn audit_only_kinds_enqueue_audit_log_post_commits() {
        let mut registry = EventRegistry::new();
        register_default_handlers(&mut registry, OrgId::new(1));
        let mut s = session();
        s.events = vec![Event::WebhookCalled { url: "https://x".into(), status: 200 }];
        registry.apply_events(&mut s).unwrap();
        assert_eq!(s.post_commits.len(), 1);
        assert_eq!(s.post_commits[0].hook, "audit_log");
    }
}
