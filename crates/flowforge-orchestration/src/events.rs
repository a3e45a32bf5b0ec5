//! Event->hook binder (spec.md §4.E).
//!
//! One registered handler per event kind, populated at startup. Duplicate
//! registration for a kind is refused the same way the task dispatcher
//! (4.C) refuses it — and the same way the original's
//! `RegisterEventHandler` does, where a duplicate is a startup bug, not a
//! runtime condition. A handler's only job is to translate the event into
//! zero or more `(hook, payload)` entries appended to the session's
//! `pre_commits`/`post_commits` lists; handlers never write to a store
//! directly.

use flowforge_shared::error::{FlowforgeError, FlowforgeResult};
use flowforge_shared::models::{Event, Session};
use std::collections::HashMap;
use std::sync::Arc;

pub trait EventHandler: Send + Sync {
    /// Translates `event` into hook entries on `session`.
    fn apply(&self, session: &mut Session, event: &Event) -> FlowforgeResult<()>;
}

#[derive(Default)]
pub struct EventRegistry {
    handlers: HashMap<&'static str, Arc<dyn EventHandler>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Panics if `kind` already has a registered handler.
    pub fn register(&mut self, kind: &'static str, handler: Arc<dyn EventHandler>) {
        if self.handlers.insert(kind, handler).is_some() {
            panic!("duplicate event handler registration for {kind}");
        }
    }

    /// Walks `session`'s events in emission order, applying each one's
    /// handler. Events are never reordered here — only the hooks they
    /// enqueue get grouped and coalesced later, by the commit engine.
    pub fn apply_events(&self, session: &mut Session) -> FlowforgeResult<()> {
        let events = session.events.clone();
        for event in &events {
            let handler = self.handlers.get(event.kind()).ok_or_else(|| {
                FlowforgeError::invariant(format!("no event handler registered for {}", event.kind()))
            })?;
            handler.apply(session, event)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_shared::ids::{ContactId, FlowId, SessionId};
    use flowforge_shared::models::Event;

    struct RecordingHandler;
    impl EventHandler for RecordingHandler {
        fn apply(&self, session: &mut Session, _event: &Event) -> FlowforgeResult<()> {
            session.push_post_commit("recorded", serde_json::Value::Null);
            Ok(())
        }
    }

    fn session_with(events: Vec<Event>) -> Session {
        let mut session = Session::new(
            SessionId(uuid::Uuid::new_v4()),
            ContactId::new(1),
            FlowId::new(1),
            chrono::Utc::now(),
        );
        session.events = events;
        session
    }

    #[test]
    #[should_panic(expected = "duplicate event handler registration")]
    fn duplicate_registration_panics() {
        let mut registry = EventRegistry::new();
        registry.register("msg_created", Arc::new(RecordingHandler));
        registry.register("msg_created", Arc::new(RecordingHandler));
    }

    #[test]
    fn unregistered_kind_is_an_invariant_error() {
        let registry = EventRegistry::new();
        let mut session = session_with(vec![Event::ContactLanguageChanged {
            language: "es".into(),
        }]);
        assert!(registry.apply_events(&mut session).is_err());
    }

    #[test]
    fn applies_handlers_in_event_order() {
        let mut registry = EventRegistry::new();
        registry.register("contact_name_changed", Arc::new(RecordingHandler));
        registry.register("contact_language_changed", Arc::new(RecordingHandler));

        let mut session = session_with(vec![
            Event::ContactNameChanged { name: "Ann".into() },
            Event::ContactLanguageChanged { language: "fr".into() },
        ]);
        registry.apply_events(&mut session).unwrap();
        assert_eq!(session.post_commits.len(), 2);
    }
}
