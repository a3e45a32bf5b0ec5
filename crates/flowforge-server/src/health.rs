//! Admin/health HTTP surface (spec.md §1 "a thin axum admin/health
//! surface is added as ambient stack, not a flow API"). Two endpoints:
//! liveness/readiness for the orchestrator, and a manual start trigger for
//! operators who need to kick off a flow run outside the queue's normal
//! event-driven path.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use flowforge_orchestration::StartPlanner;
use flowforge_queue::FairQueue;
use flowforge_shared::ids::{FlowId, OrgId, StartId};
use flowforge_shared::models::{FlowStart, StartTarget, StartType, TaskKind};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

pub struct AdminState {
    pub pool: PgPool,
    pub planner: Arc<StartPlanner>,
    pub batch_queue: FairQueue,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
}

async fn healthz() -> impl IntoResponse {
    Json(HealthBody { status: "ok" })
}

async fn readyz(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => (StatusCode::OK, Json(HealthBody { status: "ready" })).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "readiness check failed, database unreachable");
            (StatusCode::SERVICE_UNAVAILABLE, Json(HealthBody { status: "not ready" })).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct TriggerStartBody {
    org_id: i64,
    flow_id: i64,
    target: StartTarget,
    #[serde(default)]
    restart_participants: bool,
    #[serde(default = "default_true")]
    include_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct TriggerStartResponse {
    batches: usize,
    contact_count: usize,
}

/// Resolves `target` and enqueues its batches directly, without first
/// persisting a `FlowStart` row — a convenience path for operators, not
/// a replacement for the normal API-driven start flow (out of scope per
/// spec.md §1).
async fn trigger_start(State(state): State<Arc<AdminState>>, Json(body): Json<TriggerStartBody>) -> impl IntoResponse {
    let org_id = OrgId::new(body.org_id);
    let flow_id = FlowId::new(body.flow_id);
    let mut start = FlowStart::new(StartId::new(0), uuid::Uuid::new_v4(), StartType::Api, flow_id, body.target);
    start.restart_participants = body.restart_participants;
    start.include_active = body.include_active;

    let batches = match state.planner.create_batches(org_id, &start).await {
        Ok(batches) => batches,
        Err(err) => {
            tracing::error!(error = %err, "failed to plan start batches");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": err.to_string() }))).into_response();
        }
    };

    let contact_count: usize = batches.iter().map(|b| b.contact_ids.len()).sum();
    for batch in &batches {
        let body = serde_json::json!({ "batch": batch, "flow_id": flow_id });
        if let Err(err) = state.batch_queue.push(org_id, TaskKind::StartFlowBatch, body, false).await {
            tracing::error!(error = %err, "failed to enqueue start batch");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": err.to_string() }))).into_response();
        }
    }

    (
        StatusCode::ACCEPTED,
        Json(TriggerStartResponse { batches: batches.len(), contact_count }),
    )
        .into_response()
}

pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/admin/starts", post(trigger_start))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
