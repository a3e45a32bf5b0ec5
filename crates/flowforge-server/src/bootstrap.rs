//! Process wiring (spec.md §6): connects to Postgres and Redis, builds
//! every orchestration component, registers task and event handlers, and
//! spawns the foremen, cron jobs, and admin HTTP surface.
//!
//! Grounded on the teacher's `OrchestrationBootstrap` shape — one
//! `bootstrap()` entry point returning a handle the caller awaits for
//! graceful shutdown — generalized from that system's web/gRPC surface to
//! this one's queue foremen and cron jobs.

use flowforge_orchestration::hooks::default_hooks;
use flowforge_orchestration::session_runner::NullFlowLibrary;
use flowforge_orchestration::{
    CommitEngine, ContactResolver, CronJob, NullOrgAssetLoader, OrgAssetCache, RedisLeaderLock, StartPlanner, TaskDispatcher,
};
use flowforge_queue::foreman::{Foreman, ForemanConfig};
use flowforge_queue::kv::RedisBackend;
use flowforge_queue::{FairQueue, QueueBackend};
use flowforge_shared::config::FlowforgeConfig;
use flowforge_shared::error::{FlowforgeError, FlowforgeResult};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::handlers::{register_all, Handlers};
use crate::health::{self, AdminState};

const HANDLER_QUEUE: &str = "handler";
const BATCH_QUEUE: &str = "batch";
const ADMIN_ADDR: &str = "0.0.0.0:8080";

/// Everything the running server owns. Dropping this without calling
/// [`ServerHandle::stop`] leaks the background tasks; `main` is expected to
/// always call `stop` on the way out.
pub struct ServerHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Signals every foreman, cron job, and the admin server to stop, then
    /// waits for them to finish draining in-flight work.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "background task panicked during shutdown");
            }
        }
    }
}

/// Connects, wires, and starts the whole orchestration server (spec.md
/// §4, §6): foremen for both queues, the registered cron jobs, and the
/// admin/health HTTP surface. Returns once everything has started
/// listening/polling; the returned handle is how the caller later stops it.
pub async fn bootstrap(config: &FlowforgeConfig) -> FlowforgeResult<ServerHandle> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_pool_size)
        .connect(&config.db_url)
        .await
        .map_err(FlowforgeError::Database)?;

    let redis_client = redis::Client::open(config.redis_url.as_str()).map_err(|e| FlowforgeError::Queue(e.to_string()))?;
    let redis_conn = redis_client
        .get_connection_manager()
        .await
        .map_err(|e| FlowforgeError::Queue(e.to_string()))?;

    let handler_queue = FairQueue::new(HANDLER_QUEUE, QueueBackend::Redis(RedisBackend::new(redis_conn.clone())));
    let batch_queue = FairQueue::new(BATCH_QUEUE, QueueBackend::Redis(RedisBackend::new(redis_conn.clone())));

    let contacts = Arc::new(ContactResolver::new(pool.clone()));
    let commit = Arc::new(CommitEngine::new(pool.clone(), default_hooks()));
    let planner = Arc::new(StartPlanner::new(pool.clone(), ContactResolver::new(pool.clone())));
    let assets = Arc::new(OrgAssetCache::new(Arc::new(NullOrgAssetLoader), 10_000));

    let handlers = Arc::new(Handlers {
        pool: pool.clone(),
        flow_library: Arc::new(NullFlowLibrary),
        assets: assets.clone(),
        commit: commit.clone(),
        contacts: contacts.clone(),
        planner: planner.clone(),
        batch_queue: batch_queue.clone(),
    });

    let mut dispatcher = TaskDispatcher::new();
    register_all(&mut dispatcher, handlers);
    let dispatcher: Arc<dyn flowforge_queue::TaskHandler> = Arc::new(dispatcher);

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    let handler_foreman = Foreman::new(handler_queue, dispatcher.clone(), ForemanConfig { max_workers: config.handler_workers });
    let handler_shutdown = shutdown.clone();
    tasks.push(tokio::spawn(async move { handler_foreman.run(handler_shutdown).await }));

    let batch_foreman = Foreman::new(batch_queue.clone(), dispatcher, ForemanConfig { max_workers: config.batch_workers });
    let batch_shutdown = shutdown.clone();
    tasks.push(tokio::spawn(async move { batch_foreman.run(batch_shutdown).await }));

    let leader_lock: Arc<dyn flowforge_orchestration::LeaderLock> = Arc::new(RedisLeaderLock::new(redis_conn, "flowforge-server"));
    for job in cron_jobs(pool.clone()) {
        let lock = leader_lock.clone();
        let job_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move { flowforge_orchestration::cron::run_job(job, lock, job_shutdown).await }));
    }

    let admin_state = Arc::new(AdminState { pool, planner, batch_queue });
    let admin_shutdown = shutdown.clone();
    let listener = tokio::net::TcpListener::bind(ADMIN_ADDR)
        .await
        .map_err(|e| FlowforgeError::orchestration(format!("failed to bind admin surface on {ADMIN_ADDR}: {e}")))?;
    tasks.push(tokio::spawn(async move {
        let router = health::router(admin_state);
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            admin_shutdown.cancelled().await;
        });
        if let Err(err) = serve.await {
            tracing::error!(error = %err, "admin http surface exited with error");
        }
    }));

    tracing::info!(addr = ADMIN_ADDR, "admin/health surface listening");
    Ok(ServerHandle { shutdown, tasks })
}

/// Periodic jobs this server runs under leader election (spec.md §4.I):
/// session timeout sweeps and campaign point firing are the two recurring
/// background passes the rest of the system depends on existing somewhere.
fn cron_jobs(pool: sqlx::PgPool) -> Vec<CronJob> {
    let timeout_pool = pool.clone();
    let timeouts = CronJob::new("session_timeouts", Duration::from_secs(30), false, move || {
        let pool = timeout_pool.clone();
        async move { sweep_session_timeouts(&pool).await }
    });

    let campaign_pool = pool;
    let campaigns = CronJob::new("campaign_points", Duration::from_secs(60), false, move || {
        let pool = campaign_pool.clone();
        async move { fire_due_campaign_points(&pool).await }
    });

    vec![timeouts, campaigns]
}

/// Marks every session whose `timeout_on` has passed as timed out, so a
/// later queue task can resume it (spec.md §4.F wait-state handling is out
/// of scope for this sweep — it only flags the rows).
async fn sweep_session_timeouts(pool: &sqlx::PgPool) -> FlowforgeResult<()> {
    let touched = sqlx::query(
        "UPDATE flows_flowsession SET status = 'waiting', wait_state = wait_state || jsonb_build_object('timed_out', true) \
         WHERE status = 'waiting' AND timeout_on IS NOT NULL AND timeout_on <= now()",
    )
    .execute(pool)
    .await
    .map_err(FlowforgeError::Database)?;
    if touched.rows_affected() > 0 {
        tracing::debug!(count = touched.rows_affected(), "flagged timed-out sessions");
    }
    Ok(())
}

/// Placeholder until campaign scheduling (out of scope per spec.md §1's
/// campaign-event Non-goal on point *creation*, though firing due points
/// that already exist is part of spec.md §4.I's job list) has a concrete
/// point-source table to read from.
async fn fire_due_campaign_points(_pool: &sqlx::PgPool) -> FlowforgeResult<()> {
    Ok(())
}
