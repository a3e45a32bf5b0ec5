//! Foreman and worker pool (spec.md §4.B).
//!
//! One foreman per named queue. A bounded `free-worker` channel is
//! pre-filled with `max_workers` tokens; the foreman loop waits for a
//! token, claims one task, and hands it to a worker that returns the
//! token when done. The "free worker" slot channel plus a join set stand
//! in for a buffered worker channel and wait group — here the
//! wait-group ticket is just the `JoinHandle` the caller awaits after
//! `run` returns.

use crate::fairqueue::{Claim, FairQueue};
use flowforge_shared::error::FlowforgeResult;
use flowforge_shared::ids::OrgId;
use flowforge_shared::models::Task;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const MIN_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Registered per task kind by the dispatcher (4.C); invoked by the
/// foreman's workers inside a panic-isolated task.
pub trait TaskHandler: Send + Sync + 'static {
    fn handle(&self, org_id: OrgId, task: Task) -> Pin<Box<dyn Future<Output = FlowforgeResult<()>> + Send>>;
}

impl<F, Fut> TaskHandler for F
where
    F: Fn(OrgId, Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FlowforgeResult<()>> + Send + 'static,
{
    fn handle(&self, org_id: OrgId, task: Task) -> Pin<Box<dyn Future<Output = FlowforgeResult<()>> + Send>> {
        Box::pin(self(org_id, task))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ForemanConfig {
    pub max_workers: usize,
}

impl Default for ForemanConfig {
    fn default() -> Self {
        Self { max_workers: 32 }
    }
}

pub struct Foreman {
    queue: FairQueue,
    handler: Arc<dyn TaskHandler>,
    config: ForemanConfig,
}

impl Foreman {
    pub fn new(queue: FairQueue, handler: Arc<dyn TaskHandler>, config: ForemanConfig) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    /// Drains the queue with bounded parallelism until `shutdown` fires.
    ///
    /// Per spec: stop claiming new tasks as soon as `shutdown` fires, then
    /// wait for all in-flight workers to return before this future
    /// resolves. An in-flight task always runs to completion (or failure)
    /// — workers never abandon a claimed task mid-flight.
    pub async fn run(&self, shutdown: CancellationToken) {
        let max_workers = self.config.max_workers.max(1);
        let (free_tx, mut free_rx) = mpsc::channel::<()>(max_workers);
        for _ in 0..max_workers {
            let _ = free_tx.send(()).await;
        }

        let mut in_flight = JoinSet::new();
        let mut backoff = MIN_BACKOFF;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                slot = free_rx.recv() => {
                    if slot.is_none() {
                        break;
                    }
                    match self.queue.pop().await {
                        Ok(Claim::Task { org_id, task }) => {
                            backoff = MIN_BACKOFF;
                            let handler = self.handler.clone();
                            let queue = self.queue.clone();
                            let free_tx = free_tx.clone();
                            let queue_name = self.queue.name().to_string();
                            in_flight.spawn(async move {
                                let kind = task.kind.clone();
                                // Caught here, not just by the JoinSet, so that a handler
                                // panic still runs `complete` and returns the worker slot
                                // (spec.md §4.B: "on any outcome ... call queue.complete").
                                let outcome = AssertUnwindSafe(handler.handle(org_id, task)).catch_unwind().await;
                                match outcome {
                                    Ok(Err(err)) => {
                                        error!(queue = %queue_name, org_id = %org_id, kind = ?kind, error = %err, "task handler failed");
                                    }
                                    Err(_) => {
                                        error!(queue = %queue_name, org_id = %org_id, kind = ?kind, "task handler panicked");
                                    }
                                    Ok(Ok(())) => {}
                                }
                                if let Err(err) = queue.complete(org_id).await {
                                    error!(queue = %queue_name, org_id = %org_id, error = %err, "failed to mark task complete");
                                }
                                let _ = free_tx.send(()).await;
                            });
                        }
                        Ok(Claim::Empty) => {
                            let _ = free_tx.send(()).await;
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = tokio::time::sleep(backoff) => {}
                            }
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                        }
                        Err(err) => {
                            warn!(queue = %self.queue.name(), error = %err, "queue pop failed, backing off");
                            let _ = free_tx.send(()).await;
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = tokio::time::sleep(backoff) => {}
                            }
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                        }
                    }
                }
            }
        }

        debug!(queue = %self.queue.name(), "foreman stopped claiming, draining in-flight workers");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(join_err) = joined {
                // The handler panic itself is caught and logged above, and
                // `complete`/the free-worker slot still ran for it; a join
                // error here means the spawned task was aborted outright.
                error!(queue = %self.queue.name(), error = %join_err, "worker task aborted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairqueue::QueueBackend;
    use crate::kv::InMemoryBackend;
    use flowforge_shared::models::TaskKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    fn queue() -> FairQueue {
        FairQueue::new("batch", QueueBackend::InMemory(InMemoryBackend::new()))
    }

    #[tokio::test]
    async fn drains_pushed_tasks_then_stops_on_shutdown() {
        let q = queue();
        for _ in 0..5 {
            q.push(OrgId::new(1), TaskKind::StartFlow, serde_json::json!({}), false)
                .await
                .unwrap();
        }

        let processed = Arc::new(AtomicUsize::new(0));
        let processed_for_handler = processed.clone();
        let handler: Arc<dyn TaskHandler> = Arc::new(move |_org_id: OrgId, _task: Task| {
            let processed = processed_for_handler.clone();
            async move {
                processed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let foreman = Foreman::new(q.clone(), handler, ForemanConfig { max_workers: 2 });
        let shutdown = CancellationToken::new();
        let shutdown_for_task = shutdown.clone();

        let run = tokio::spawn(async move { foreman.run(shutdown_for_task).await });

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        shutdown.cancel();
        run.await.unwrap();

        assert_eq!(processed.load(Ordering::SeqCst), 5);
        assert_eq!(q.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn handler_error_does_not_stop_the_worker() {
        let q = queue();
        q.push(OrgId::new(1), TaskKind::StartFlow, serde_json::json!({}), false)
            .await
            .unwrap();

        let handler: Arc<dyn TaskHandler> = Arc::new(|_org_id: OrgId, _task: Task| async move {
            Err(flowforge_shared::error::FlowforgeError::orchestration("boom"))
        });

        let foreman = Foreman::new(q.clone(), handler, ForemanConfig { max_workers: 1 });
        let shutdown = CancellationToken::new();
        let shutdown_for_task = shutdown.clone();
        let run = tokio::spawn(async move { foreman.run(shutdown_for_task).await });

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        shutdown.cancel();
        run.await.unwrap();

        // The task still gets marked complete even though the handler failed.
        assert_eq!(q.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn handler_panic_still_completes_the_task_and_frees_the_worker_slot() {
        let q = queue();
        for _ in 0..3 {
            q.push(OrgId::new(1), TaskKind::StartFlow, serde_json::json!({}), false)
                .await
                .unwrap();
        }

        let processed = Arc::new(AtomicUsize::new(0));
        let processed_for_handler = processed.clone();
        // A single worker: if a panic ever leaks the slot or skips
        // `complete`, the queue never drains past the first task.
        let handler: Arc<dyn TaskHandler> = Arc::new(move |_org_id: OrgId, _task: Task| {
            let processed = processed_for_handler.clone();
            async move {
                let n = processed.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    panic!("boom");
                }
                Ok(())
            }
        });

        let foreman = Foreman::new(q.clone(), handler, ForemanConfig { max_workers: 1 });
        let shutdown = CancellationToken::new();
        let shutdown_for_task = shutdown.clone();
        let run = tokio::spawn(async move { foreman.run(shutdown_for_task).await });

        tokio::time::sleep(StdDuration::from_millis(150)).await;
        shutdown.cancel();
        run.await.unwrap();

        assert_eq!(processed.load(Ordering::SeqCst), 3);
        assert_eq!(q.size().await.unwrap(), 0);
    }
}
