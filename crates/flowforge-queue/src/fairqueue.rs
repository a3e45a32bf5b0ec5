//! Fair queue client (spec.md §4.A).
//!
//! Exposes `push`/`pop`/`complete`/`size` over a [`QueueStore`] backend.
//! Enum dispatch over the two backends, the same preference the rest of
//! this codebase has for enum wrappers over `dyn Trait` at a seam with a
//! small, closed set of implementations.

use crate::kv::{InMemoryBackend, PopOutcome, QueueStore, RedisBackend};
use crate::wire::WireTask;
use flowforge_shared::error::FlowforgeResult;
use flowforge_shared::ids::OrgId;
use flowforge_shared::models::{Task, TaskKind};
use std::fmt;

#[derive(Debug, Clone)]
pub enum QueueBackend {
    Redis(RedisBackend),
    InMemory(InMemoryBackend),
}

#[async_trait::async_trait]
impl QueueStore for QueueBackend {
    async fn push(&self, queue: &str, org_id: OrgId, task: WireTask, priority: bool) -> FlowforgeResult<()> {
        match self {
            Self::Redis(b) => b.push(queue, org_id, task, priority).await,
            Self::InMemory(b) => b.push(queue, org_id, task, priority).await,
        }
    }

    async fn pop(&self, queue: &str) -> FlowforgeResult<PopOutcome> {
        match self {
            Self::Redis(b) => b.pop(queue).await,
            Self::InMemory(b) => b.pop(queue).await,
        }
    }

    async fn complete(&self, queue: &str, org_id: OrgId) -> FlowforgeResult<()> {
        match self {
            Self::Redis(b) => b.complete(queue, org_id).await,
            Self::InMemory(b) => b.complete(queue, org_id).await,
        }
    }

    async fn size(&self, queue: &str) -> FlowforgeResult<u64> {
        match self {
            Self::Redis(b) => b.size(queue).await,
            Self::InMemory(b) => b.size(queue).await,
        }
    }
}

/// What a caller gets back from [`FairQueue::pop`].
pub enum Claim {
    Empty,
    Task { org_id: OrgId, task: Task },
}

impl fmt::Debug for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Claim::Empty"),
            Self::Task { org_id, .. } => write!(f, "Claim::Task {{ org_id: {org_id:?} }}"),
        }
    }
}

/// A single named queue, fair across the organizations pushing to it
/// (spec.md §4.A).
#[derive(Debug, Clone)]
pub struct FairQueue {
    name: String,
    backend: QueueBackend,
}

impl FairQueue {
    pub fn new(name: impl Into<String>, backend: QueueBackend) -> Self {
        Self {
            name: name.into(),
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn push(&self, org_id: OrgId, kind: TaskKind, body: serde_json::Value, priority: bool) -> FlowforgeResult<()> {
        let now = chrono::Utc::now();
        let wire = WireTask::new(kind.as_str(), org_id.value(), body, now);
        self.backend.push(&self.name, org_id, wire, priority).await
    }

    pub async fn pop(&self) -> FlowforgeResult<Claim> {
        match self.backend.pop(&self.name).await? {
            PopOutcome::Empty => Ok(Claim::Empty),
            PopOutcome::Task { org_id, task } => {
                let kind = TaskKind::from_wire(&task.kind);
                let queued_on = task.queued_on().unwrap_or_else(chrono::Utc::now);
                Ok(Claim::Task {
                    org_id,
                    task: Task::new(kind, org_id, task.task, queued_on, false),
                })
            }
        }
    }

    pub async fn complete(&self, org_id: OrgId) -> FlowforgeResult<()> {
        self.backend.complete(&self.name, org_id).await
    }

    pub async fn size(&self) -> FlowforgeResult<u64> {
        self.backend.size(&self.name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> FairQueue {
        FairQueue::new("batch", QueueBackend::InMemory(InMemoryBackend::new()))
    }

    #[tokio::test]
    async fn push_then_pop_round_trips_a_task() {
        let q = queue();
        q.push(OrgId::new(1), TaskKind::StartFlow, serde_json::json!({"x": 1}), false)
            .await
            .unwrap();

        match q.pop().await.unwrap() {
            Claim::Task { org_id, task } => {
                assert_eq!(org_id, OrgId::new(1));
                assert_eq!(task.kind, TaskKind::StartFlow);
            }
            Claim::Empty => panic!("expected a task"),
        }
    }

    #[tokio::test]
    async fn pop_on_empty_queue_is_empty() {
        let q = queue();
        assert!(matches!(q.pop().await.unwrap(), Claim::Empty));
    }

    #[tokio::test]
    async fn unrecognized_wire_kind_round_trips_as_unknown_instead_of_misrouting() {
        let backend = InMemoryBackend::new();
        backend
            .push(
                "batch",
                OrgId::new(1),
                WireTask::new("some_future_kind", 1, serde_json::json!({}), chrono::Utc::now()),
                false,
            )
            .await
            .unwrap();
        let q = FairQueue::new("batch", QueueBackend::InMemory(backend));

        match q.pop().await.unwrap() {
            Claim::Task { task, .. } => {
                assert_eq!(task.kind, TaskKind::Unknown("some_future_kind".to_string()));
            }
            Claim::Empty => panic!("expected a task"),
        }
    }

    #[tokio::test]
    async fn size_reflects_pending_tasks_only() {
        let q = queue();
        q.push(OrgId::new(1), TaskKind::StartFlow, serde_json::json!({}), false)
            .await
            .unwrap();
        q.push(OrgId::new(1), TaskKind::StartFlow, serde_json::json!({}), false)
            .await
            .unwrap();
        assert_eq!(q.size().await.unwrap(), 2);
        q.pop().await.unwrap();
        assert_eq!(q.size().await.unwrap(), 1);
    }
}
