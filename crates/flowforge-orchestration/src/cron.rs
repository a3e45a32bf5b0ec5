//! Cron scheduler (spec.md §4.I).
//!
//! Registered jobs run on a fixed interval, leader-elected across however
//! many server processes are running, via a KV `SET NX EX` lock with a
//! safety lease — the same `SET`-based mutual exclusion idea the fair
//! queue's Lua scripting builds on, just a plain command sequence instead
//! of a script since a single `SET NX EX` is already atomic.

use flowforge_shared::error::FlowforgeResult;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Leadership lock for cron jobs. `try_acquire` and `refresh` both return
/// whether the caller currently holds the lease; a held lease must be
/// refreshed before it expires or another instance may take over mid-job.
#[async_trait::async_trait]
pub trait LeaderLock: Send + Sync {
    async fn try_acquire(&self, key: &str, lease: Duration) -> FlowforgeResult<bool>;
    async fn refresh(&self, key: &str, lease: Duration) -> FlowforgeResult<bool>;
    async fn release(&self, key: &str) -> FlowforgeResult<()>;
}

/// `SET key instance_id NX EX lease_secs` / conditional refresh, against a
/// Redis-shaped store. Two commands (`GET` then `EXPIRE` only if the value
/// still matches) rather than one script; losing a race here just means
/// this instance stops being leader a beat early, which is safe since the
/// job simply won't run until it wins leadership again.
#[derive(Clone)]
pub struct RedisLeaderLock {
    conn: redis::aio::ConnectionManager,
    instance_id: String,
}

impl RedisLeaderLock {
    pub fn new(conn: redis::aio::ConnectionManager, instance_id: impl Into<String>) -> Self {
        Self {
            conn,
            instance_id: instance_id.into(),
        }
    }
}

#[async_trait::async_trait]
impl LeaderLock for RedisLeaderLock {
    async fn try_acquire(&self, key: &str, lease: Duration) -> FlowforgeResult<bool> {
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&self.instance_id)
            .arg("NX")
            .arg("EX")
            .arg(lease.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| flowforge_shared::error::FlowforgeError::Queue(e.to_string()))?;
        Ok(acquired.is_some())
    }

    async fn refresh(&self, key: &str, lease: Duration) -> FlowforgeResult<bool> {
        let mut conn = self.conn.clone();
        let current: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| flowforge_shared::error::FlowforgeError::Queue(e.to_string()))?;
        if current.as_deref() != Some(self.instance_id.as_str()) {
            return Ok(false);
        }
        let _: () = redis::cmd("EXPIRE")
            .arg(key)
            .arg(lease.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| flowforge_shared::error::FlowforgeError::Queue(e.to_string()))?;
        Ok(true)
    }

    async fn release(&self, key: &str) -> FlowforgeResult<()> {
        let mut conn = self.conn.clone();
        let current: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| flowforge_shared::error::FlowforgeError::Queue(e.to_string()))?;
        if current.as_deref() == Some(self.instance_id.as_str()) {
            let _: () = redis::cmd("DEL")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(|e| flowforge_shared::error::FlowforgeError::Queue(e.to_string()))?;
        }
        Ok(())
    }
}

/// Always-leader lock for single-instance deployments and tests where no
/// real KV store is wired up.
#[derive(Debug, Default)]
pub struct SingletonLeaderLock;

#[async_trait::async_trait]
impl LeaderLock for SingletonLeaderLock {
    async fn try_acquire(&self, _key: &str, _lease: Duration) -> FlowforgeResult<bool> {
        Ok(true)
    }

    async fn refresh(&self, _key: &str, _lease: Duration) -> FlowforgeResult<bool> {
        Ok(true)
    }

    async fn release(&self, _key: &str) -> FlowforgeResult<()> {
        Ok(())
    }
}

type JobFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = FlowforgeResult<()>> + Send>> + Send + Sync>;

/// A registered periodic job. `all_instances` skips leader gating entirely
/// — for work that's safe or desirable to run on every process, matching
/// the original's per-job `AllInstances` flag.
pub struct CronJob {
    pub name: &'static str,
    pub interval: Duration,
    pub all_instances: bool,
    run: JobFn,
}

impl CronJob {
    pub fn new<F, Fut>(name: &'static str, interval: Duration, all_instances: bool, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowforgeResult<()>> + Send + 'static,
    {
        Self {
            name,
            interval,
            all_instances,
            run: Arc::new(move || Box::pin(run())),
        }
    }
}

const LEASE: Duration = Duration::from_secs(300);

/// Runs `job` on its own `tokio::time::interval` loop until `shutdown`
/// fires, acquiring and refreshing leadership before each tick unless the
/// job opted into running on every instance (spec.md §4.I).
pub async fn run_job(job: CronJob, lock: Arc<dyn LeaderLock>, shutdown: CancellationToken) {
    let lock_key = format!("cron:lock:{}", job.name);
    let mut ticker = tokio::time::interval(job.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let should_run = if job.all_instances {
            true
        } else {
            match lock.try_acquire(&lock_key, LEASE).await {
                Ok(true) => true,
                Ok(false) => match lock.refresh(&lock_key, LEASE).await {
                    Ok(held) => held,
                    Err(err) => {
                        warn!(job = job.name, error = %err, "cron leadership refresh failed");
                        false
                    }
                },
                Err(err) => {
                    warn!(job = job.name, error = %err, "cron leadership acquire failed");
                    false
                }
            }
        };

        if !should_run {
            debug!(job = job.name, "skipping tick, not leader");
            continue;
        }

        info!(job = job.name, "running cron job");
        if let Err(err) = (job.run)().await {
            error!(job = job.name, error = %err, "cron job failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn singleton_lock_always_grants_leadership() {
        let lock = SingletonLeaderLock;
        assert!(lock.try_acquire("k", Duration::from_secs(1)).await.unwrap());
        assert!(lock.refresh("k", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn run_job_executes_at_least_once_before_shutdown() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_for_job = counter.clone();
        let job = CronJob::new("test_job", Duration::from_millis(10), false, move || {
            let counter = counter_for_job.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let shutdown = CancellationToken::new();
        let shutdown_for_task = shutdown.clone();
        let lock: Arc<dyn LeaderLock> = Arc::new(SingletonLeaderLock);
        let handle = tokio::spawn(run_job(job, lock, shutdown_for_task));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(counter.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn all_instances_job_skips_leadership_check() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_for_job = counter.clone();
        let job = CronJob::new("broadcast_job", Duration::from_millis(10), true, move || {
            let counter = counter_for_job.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let shutdown = CancellationToken::new();
        let shutdown_for_task = shutdown.clone();
        // A lock that always denies leadership — the job should still run
        // since `all_instances` bypasses the check.
        struct DenyLock;
        #[async_trait::async_trait]
        impl LeaderLock for DenyLock {
            async fn try_acquire(&self, _key: &str, _lease: Duration) -> FlowforgeResult<bool> {
                Ok(false)
            }
            async fn refresh(&self, _key: &str, _lease: Duration) -> FlowforgeResult<bool> {
                Ok(false)
            }
            async fn release(&self, _key: &str) -> FlowforgeResult<()> {
                Ok(())
            }
        }
        let handle = tokio::spawn(run_job(job, Arc::new(DenyLock), shutdown_for_task));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(counter.load(Ordering::SeqCst) >= 1);
    }
}
