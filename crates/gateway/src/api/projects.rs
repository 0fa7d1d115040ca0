//! Project registration — the only way projects come into being.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Deserialize;

use hs_domain::broadcast::BroadcastKind;
use hs_store::queries::{events, projects};
use hs_store::records::NewEvent;

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterProject {
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterProject>,
) -> ApiResult<Response> {
    let path = req.path.trim().trim_end_matches('/').to_owned();
    if path.is_empty() || !path.starts_with('/') {
        return Err(ApiError::validation("path must be absolute"));
    }
    let name = req
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| {
            path.rsplit('/')
                .next()
                .unwrap_or("project")
                .to_owned()
        });

    // Re-registration acknowledges the existing row instead of failing.
    if let Some(existing) = state
        .store
        .with_conn(|conn| projects::get_by_path(conn, &path))
        .map_err(ApiError::from)?
    {
        return Ok((StatusCode::OK, Json(serde_json::json!(existing))).into_response());
    }

    let project = state
        .store
        .with_tx(|tx| {
            let project = projects::insert(tx, &path, &name, Utc::now())?;
            hs_store::queries::events::append(
                tx,
                &NewEvent::new("project_registered")
                    .project(project.id)
                    .payload(serde_json::json!({ "path": path, "name": name })),
                Utc::now(),
            )?;
            Ok(project)
        })
        .map_err(ApiError::from)?;

    state.broadcaster.publish(
        BroadcastKind::ProjectChanged,
        Some(project.id),
        None,
        serde_json::json!({ "id": project.id, "path": project.path, "name": project.name }),
    );

    Ok((StatusCode::CREATED, Json(serde_json::json!(project))).into_response())
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let projects = state
        .store
        .with_conn(|conn| projects::list(conn))
        .map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "projects": projects })))
}

#[derive(Debug, Deserialize)]
pub struct EventHistoryQuery {
    #[serde(default = "d_event_limit")]
    pub limit: usize,
}

fn d_event_limit() -> usize {
    100
}

/// `GET /api/projects/{id}/events` — recent audit log for one project.
pub async fn event_history(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    Query(query): Query<EventHistoryQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let history = state
        .store
        .with_conn(|conn| {
            if projects::get_by_id(conn, project_id)?.is_none() {
                return Ok(None);
            }
            events::by_project(conn, project_id, query.limit.min(1_000)).map(Some)
        })
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found(format!("project {project_id}")))?;
    Ok(Json(serde_json::json!({ "events": history })))
}
