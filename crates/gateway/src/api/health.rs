//! Health and metrics endpoints.

use axum::extract::State;
use axum::response::Json;
use chrono::Utc;

use hs_store::queries::{events, projects, sessions, tasks};

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /health — liveness probe (public, no auth)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database_ok = state.store.ping().is_ok();
    let workers_ok = state.worker_health.all_healthy();
    let status = if database_ok && workers_ok {
        "healthy"
    } else {
        "degraded"
    };

    Json(serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "database": if database_ok { "ok" } else { "error" },
        "broadcaster": {
            "subscribers": state.broadcaster.subscriber_count(),
        },
        "workers": state.worker_health.snapshot(),
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/metrics — runtime counters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn metrics(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let (project_count, active_sessions, total_sessions, open_tasks, event_count) = state
        .store
        .with_conn(|conn| {
            Ok((
                projects::list(conn)?.len(),
                sessions::list(conn, true)?.len(),
                sessions::list(conn, false)?.len(),
                tasks::count_open(conn)?,
                events::count(conn)?,
            ))
        })
        .map_err(ApiError::from)?;

    Ok(Json(serde_json::json!({
        "projects": project_count,
        "sessions": { "active": active_sessions, "total": total_sessions },
        "tasks": { "open": open_tasks },
        "events": event_count,
        "broadcaster": { "subscribers": state.broadcaster.subscriber_count() },
        "session_locks": state.dispatcher.locks().session_count(),
        "tracked_panes": state.availability.len(),
    })))
}
