//! Task registry & dispatcher (spec.md §4.C).
//!
//! A process-wide `task_kind -> handler` registry populated at startup.
//! Registering the same kind twice is a programming error, the same
//! stance the original's `RegisterEventHandler` takes on duplicate event
//! registration ("bug if we try to register more than one handler for a
//! type") — so `register` panics rather than silently overwriting.

use flowforge_queue::TaskHandler;
use flowforge_shared::error::FlowforgeResult;
use flowforge_shared::ids::OrgId;
use flowforge_shared::models::{Task, TaskKind};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::error;

/// Routes claimed tasks to their registered handler by `TaskKind`.
/// Implements [`TaskHandler`] itself so a `Foreman` can be handed a
/// dispatcher directly as its single handler.
#[derive(Default)]
pub struct TaskDispatcher {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl TaskDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`. Panics if `kind` already has a
    /// registered handler — a startup wiring bug, not a runtime condition.
    pub fn register(&mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) {
        if self.handlers.insert(kind, handler).is_some() {
            panic!("duplicate task handler registration for {kind:?}");
        }
    }
}

impl TaskHandler for TaskDispatcher {
    fn handle(&self, org_id: OrgId, task: Task) -> Pin<Box<dyn Future<Output = FlowforgeResult<()>> + Send>> {
        let handler = self.handlers.get(&task.kind).cloned();
        Box::pin(async move {
            match handler {
                Some(handler) => handler.handle(org_id, task).await,
                None => {
                    error!(kind = ?task.kind, org_id = %org_id, "no handler registered for task kind, dropping");
                    Ok(())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: Arc<AtomicUsize>) -> Arc<dyn TaskHandler> {
        Arc::new(move |_org_id: OrgId, _task: Task| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[test]
    #[should_panic(expected = "duplicate task handler registration")]
    fn registering_same_kind_twice_panics() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = TaskDispatcher::new();
        dispatcher.register(TaskKind::StartFlow, counting_handler(counter.clone()));
        dispatcher.register(TaskKind::StartFlow, counting_handler(counter));
    }

    #[tokio::test]
    async fn routes_to_the_registered_handler() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = TaskDispatcher::new();
        dispatcher.register(TaskKind::StartFlow, counting_handler(counter.clone()));

        let task = Task::new(
            TaskKind::StartFlow,
            OrgId::new(1),
            serde_json::json!({}),
            chrono::Utc::now(),
            false,
        );
        dispatcher.handle(OrgId::new(1), task).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_kind_is_logged_and_dropped_without_error() {
        let dispatcher = TaskDispatcher::new();
        let task = Task::new(
            TaskKind::SendBroadcast,
            OrgId::new(1),
            serde_json::json!({}),
            chrono::Utc::now(),
            false,
        );
        assert!(dispatcher.handle(OrgId::new(1), task).await.is_ok());
    }

    #[tokio::test]
    async fn genuinely_unrecognized_wire_kind_hits_the_drop_path_not_a_registered_handler() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = TaskDispatcher::new();
        // Register every named kind so that if `Unknown` were ever
        // misrouted to one of them instead of falling through to `None`,
        // this handler would fire and the count would be nonzero.
        dispatcher.register(TaskKind::InterruptSessions, counting_handler(counter.clone()));

        let task = Task::new(
            TaskKind::Unknown("some_future_kind".to_string()),
            OrgId::new(1),
            serde_json::json!({}),
            chrono::Utc::now(),
            false,
        );
        assert!(dispatcher.handle(OrgId::new(1), task).await.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
