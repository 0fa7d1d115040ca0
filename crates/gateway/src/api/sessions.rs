//! Launcher-facing session registration and lifecycle.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Deserialize;

use hs_domain::broadcast::BroadcastKind;
use hs_domain::session_event::{Provenance, SessionEvent, Trigger};
use hs_domain::Error;
use hs_store::queries::{events, projects, sessions};
use hs_store::records::NewEvent;

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterSession {
    pub external_session_id: String,
    pub project_path: String,
    #[serde(default)]
    pub pane_handle: Option<String>,
    #[serde(default)]
    pub tmux_session: Option<String>,
    #[serde(default)]
    pub persona_slug: Option<String>,
    #[serde(default)]
    pub previous_session_id: Option<String>,
}

/// `POST /api/sessions` — the launcher registers a session before the
/// agent's first hook fires. The project must already exist; nothing is
/// auto-created here.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterSession>,
) -> ApiResult<Response> {
    let external_id = req.external_session_id.trim().to_owned();
    if external_id.is_empty() {
        return Err(ApiError::validation("external_session_id is required"));
    }
    let project_path = req.project_path.trim().trim_end_matches('/').to_owned();

    let (session, project, created) = state
        .store
        .with_tx_domain(|tx| {
            let project = projects::get_by_path(tx, &project_path)
                .map_err(Error::from)?
                .or(projects::find_owning(tx, &project_path).map_err(Error::from)?)
                .ok_or_else(|| Error::UnregisteredProject(project_path.clone()))?;

            let attrs = sessions::SessionAttrs {
                pane_id: req.pane_handle.clone(),
                tmux_session: req.tmux_session.clone(),
                persona_slug: req.persona_slug.clone(),
                predecessor_id: match req.previous_session_id.as_deref() {
                    Some(previous) => sessions::get_by_external_id(tx, previous)
                        .map_err(Error::from)?
                        .map(|s| s.id),
                    None => None,
                },
                transcript_path: None,
            };

            if let Some(existing) = sessions::get_active_by_external_id(tx, &external_id)
                .map_err(Error::from)?
            {
                sessions::adopt_attrs(tx, existing.id, None, &attrs, Utc::now())
                    .map_err(Error::from)?;
                let session = sessions::get_by_id(tx, existing.id)
                    .map_err(Error::from)?
                    .ok_or_else(|| Error::NotFound(format!("session {}", existing.id)))?;
                return Ok((session, project, false));
            }

            let session = sessions::insert(tx, &external_id, project.id, Utc::now(), &attrs)
                .map_err(Error::from)?;
            events::append(
                tx,
                &NewEvent::new("session_registered")
                    .project(project.id)
                    .session(session.id)
                    .payload(serde_json::json!({ "external_session_id": external_id })),
                Utc::now(),
            )
            .map_err(Error::from)?;
            Ok((session, project, true))
        })
        .map_err(ApiError::from)?;

    state.broadcaster.publish(
        BroadcastKind::CardRefresh,
        Some(project.id),
        Some(session.id),
        state
            .dispatcher
            .card_snapshot(session.id)
            .unwrap_or_default(),
    );

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(serde_json::json!({
            "id": session.id,
            "project_id": project.id,
            "project_name": project.name,
        })),
    )
        .into_response())
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let records = state
        .store
        .with_conn(|conn| sessions::list(conn, false))
        .map_err(ApiError::from)?;
    let mut cards = Vec::with_capacity(records.len());
    for record in &records {
        cards.push(
            state
                .dispatcher
                .card_snapshot(record.id)
                .unwrap_or_default(),
        );
    }
    Ok(Json(serde_json::json!({ "sessions": cards })))
}

/// `GET /api/sessions/{external_id}/events` — recent audit log for one
/// session.
pub async fn event_history(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
    Query(query): Query<crate::api::projects::EventHistoryQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let history = state
        .store
        .with_conn(|conn| {
            let Some(session) = sessions::get_by_external_id(conn, &external_id)? else {
                return Ok(None);
            };
            events::by_session(conn, session.id, query.limit.min(1_000)).map(Some)
        })
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found(format!("session {external_id}")))?;
    Ok(Json(serde_json::json!({ "events": history })))
}

/// `DELETE /api/sessions/{external_id}` — mark a session ended, closing
/// any open task through the state machine.
pub async fn end(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = state
        .store
        .with_conn(|conn| sessions::get_by_external_id(conn, &external_id))
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found(format!("session {external_id}")))?;

    let event = SessionEvent::new(session.id, Trigger::SessionEnd, Provenance::System);
    state.dispatcher.dispatch(event).await.map_err(ApiError::from)?;

    Ok(Json(serde_json::json!({ "status": "ended", "id": session.id })))
}
