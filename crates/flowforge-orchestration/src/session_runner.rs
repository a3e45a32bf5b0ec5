//! Session runner (spec.md §4.D): the boundary with the external flow
//! library.
//!
//! The flow library itself — the thing that actually interprets a flow
//! definition and advances a contact through it — is out of scope (spec.md
//! §1 "Deliberately out of scope"). `FlowLibrary` is only the contract the
//! rest of the core holds it to: given org assets and a batch of
//! `(contact, trigger)` pairs, produce one session per pair, each carrying
//! the events it emitted. The call is modeled as synchronous and
//! side-effect-free from the core's point of view — it does not touch the
//! system's stores.

use flowforge_shared::ids::FlowId;
use flowforge_shared::models::{Contact, Event, Session};
use serde_json::Value;

/// What triggered a session: an inbound message, a flow start, a resumed
/// wait, a campaign fire, etc. Opaque to the core beyond routing.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub flow_id: FlowId,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct SessionInput {
    pub contact: Contact,
    pub trigger: Trigger,
}

/// Opaque, per-org data the flow library needs to run (flow definitions,
/// channel config, etc.) — assembled and cached by the caller (spec.md §5
/// "org asset cache").
#[derive(Debug, Clone)]
pub struct OrgAssets {
    pub version: i64,
    pub data: Value,
}

pub trait FlowLibrary: Send + Sync {
    /// Advances every input to its next suspension point (or completion),
    /// returning one session per input in the same order, each already
    /// populated with the events it produced.
    fn advance(&self, org_assets: &OrgAssets, inputs: &[SessionInput]) -> Vec<Session>;
}

/// A `FlowLibrary` that produces no events, for wiring tests that only
/// exercise the commit engine and dispatcher around it.
#[derive(Debug, Default)]
pub struct NullFlowLibrary;

impl FlowLibrary for NullFlowLibrary {
    fn advance(&self, _org_assets: &OrgAssets, inputs: &[SessionInput]) -> Vec<Session> {
        inputs
            .iter()
            .map(|input| {
                Session::new(
                    flowforge_shared::ids::SessionId(uuid::Uuid::new_v4()),
                    input.contact.id,
                    input.trigger.flow_id,
                    chrono::Utc::now(),
                )
            })
            .collect()
    }
}

/// Appends events onto an already-produced session — used by tests that
/// want to drive the event->hook binder without a real flow library.
pub fn with_events(mut session: Session, events: Vec<Event>) -> Session {
    session.events = events;
    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_shared::ids::{ContactId, OrgId};
    use flowforge_shared::models::ContactStatus;

    fn contact() -> Contact {
        Contact {
            id: ContactId::new(1),
            org_id: OrgId::new(1),
            uuid: uuid::Uuid::new_v4(),
            name: None,
            language: None,
            status: ContactStatus::Active,
            created_on: chrono::Utc::now(),
            modified_on: chrono::Utc::now(),
            last_seen_on: None,
            modified_by: None,
        }
    }

    #[test]
    fn null_library_returns_one_waiting_session_per_input() {
        let lib = NullFlowLibrary;
        let inputs = vec![SessionInput {
            contact: contact(),
            trigger: Trigger {
                flow_id: FlowId::new(1),
                payload: Value::Null,
            },
        }];
        let sessions = lib.advance(
            &OrgAssets {
                version: 1,
                data: Value::Null,
            },
            &inputs,
        );
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].is_waiting());
    }
}
