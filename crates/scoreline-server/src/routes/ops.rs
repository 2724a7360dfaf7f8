//! Health and status routes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use scoreline_core::now_secs;
use serde_json::json;

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(get_health))
        .route("/status", get(get_status))
}

/// GET /ops/health: liveness plus the upstream circuit state.
async fn get_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "circuit": state.governor.circuit_state(),
        "uptimeSecs": now_secs() - state.started_at,
    }))
}

/// GET /ops/status: governor, queue, recovery and store counters.
async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = match state.store.stats() {
        Ok(stats) => stats,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            );
        }
    };
    let jobs: Vec<_> = state.jobs.read().iter().map(|j| j.stats()).collect();

    (
        StatusCode::OK,
        Json(json!({
            "governor": state.governor.snapshot(),
            "queue": state.queue.stats(),
            "recovery": {
                "lastTick": state.ladder.last_report(),
                "cooldowns": state.ladder.cooldown_len(),
            },
            "changeFeed": {
                "cursor": state.poller.cursor(),
            },
            "store": {
                "totalRecords": store.total_records,
                "byStatus": store.by_status,
                "activeLocks": store.active_locks,
                "dbPath": store.db_path,
            },
            "jobs": jobs,
            "subscribers": state.changes.subscriber_count(),
            "config": state.config,
        })),
    )
}
