//! Session runtime state (spec.md §3, §4.D, §4.F).

use crate::ids::{ContactId, FlowId, SessionId};
use crate::models::event::Event;
use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Waiting,
    Completed,
    Interrupted,
    Expired,
    Failed,
}

impl SessionStatus {
    pub fn code(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }
}

/// An opaque `(hook, payload)` pair queued by an event handler for the
/// commit engine to apply. `hook` names a registered commit hook (spec.md
/// §4.F); `payload` is the hook-specific data the handler extracted from
/// the triggering event.
#[derive(Debug, Clone)]
pub struct HookEntry {
    pub hook: String,
    pub payload: Value,
}

/// Runtime state for one contact advancing through a flow.
///
/// Held in memory while a task processes one or more sessions; the commit
/// engine (4.F) is what makes a session's state durable. `pre_commits` and
/// `post_commits` accumulate as the session's events are walked by the
/// event->hook binder (4.E) — they are not populated by the flow library
/// itself.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub contact_id: ContactId,
    pub status: SessionStatus,
    pub current_flow_id: FlowId,
    pub wait_state: Option<Value>,
    pub timeout_on: Option<DateTime<Utc>>,
    pub modified_on: DateTime<Utc>,
    pub output: Value,
    pub events: Vec<Event>,
    pub pre_commits: Vec<HookEntry>,
    pub post_commits: Vec<HookEntry>,
}

impl Session {
    pub fn new(id: SessionId, contact_id: ContactId, current_flow_id: FlowId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            contact_id,
            status: SessionStatus::Waiting,
            current_flow_id,
            wait_state: None,
            timeout_on: None,
            modified_on: now,
            output: Value::Null,
            events: Vec::new(),
            pre_commits: Vec::new(),
            post_commits: Vec::new(),
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self.status, SessionStatus::Waiting)
    }

    pub fn push_pre_commit(&mut self, hook: impl Into<String>, payload: Value) {
        self.pre_commits.push(HookEntry {
            hook: hook.into(),
            payload,
        });
    }

    pub fn push_post_commit(&mut self, hook: impl Into<String>, payload: Value) {
        self.post_commits.push(HookEntry {
            hook: hook.into(),
            payload,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn new_session_starts_waiting_with_no_hooks() {
        let session = Session::new(
            SessionId(Uuid::new_v4()),
            ContactId::new(1),
            FlowId::new(1),
            Utc::now(),
        );
        assert!(session.is_waiting());
        assert!(session.pre_commits.is_empty());
        assert!(session.post_commits.is_empty());
    }

    #[test]
    fn hook_entries_accumulate_in_push_order() {
        let mut session = Session::new(
            SessionId(Uuid::new_v4()),
            ContactId::new(1),
            FlowId::new(1),
            Utc::now(),
        );
        session.push_pre_commit("group_membership", Value::Null);
        session.push_pre_commit("field_value", Value::Null);
        assert_eq!(session.pre_commits[0].hook, "group_membership");
        assert_eq!(session.pre_commits[1].hook, "field_value");
    }
}
