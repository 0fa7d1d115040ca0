//! Remote respond: deliver user text into an agent's terminal.
//!
//! `POST /api/respond/{session_id}` resolves the session's pane, drives
//! the bridge's verified send, and on success raises the matching user
//! turn through the state machine. Failures are classified so clients
//! can distinguish "retry later" from "wrong session state".

use axum::extract::{Path, State};
use axum::response::Json;
use chrono::Utc;
use serde::Deserialize;

use hs_domain::session_event::{
    Actor, Intent, Provenance, SessionEvent, TaskState, Trigger, TsSource,
};
use hs_domain::Error;
use hs_store::queries::{sessions, tasks};

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RespondMode {
    /// Answer the question the agent is waiting on (requires
    /// awaiting-input state).
    #[default]
    Answer,
    /// Inject a fresh command regardless of the current task state. The
    /// asserted intent rides on the dispatched event, so a waiting task
    /// is closed and a new one opened instead of recording an answer.
    Command,
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub text: String,
    #[serde(default)]
    pub mode: RespondMode,
}

pub async fn respond(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
    Json(req): Json<RespondRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if req.text.trim().is_empty() {
        return Err(ApiError::validation("text must not be empty"));
    }

    let session = state
        .store
        .with_conn(|conn| sessions::get_by_external_id(conn, &external_id))
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found(format!("session {external_id}")))?;

    if !session.is_active() {
        return Err(ApiError::from(Error::WrongState(format!(
            "session {external_id} has ended"
        ))));
    }

    let pane = session
        .pane_id
        .clone()
        .ok_or_else(|| ApiError::not_found(format!("session {external_id} has no pane")))?;

    // Answer mode is only meaningful while the agent is waiting.
    if req.mode == RespondMode::Answer {
        let open = state
            .store
            .with_conn(|conn| tasks::open_task(conn, session.id))
            .map_err(ApiError::from)?;
        let awaiting = open
            .as_ref()
            .map(|t| t.state == TaskState::AwaitingInput)
            .unwrap_or(false);
        if !awaiting {
            return Err(ApiError::from(Error::WrongState(format!(
                "session {external_id} is not awaiting input (state: {})",
                open.map(|t| t.state.as_str()).unwrap_or("idle")
            ))));
        }
    }

    // Known-dead panes fail fast; the availability tracker will flip the
    // affordance back on once the pane probes alive.
    if state.availability.is_alive(session.id) == Some(false) {
        return Err(ApiError::from(Error::PaneUnavailable(format!(
            "pane {pane} last probed dead"
        ))));
    }

    let outcome = hs_bridge::send_text(
        state.pane_driver.as_ref(),
        &pane,
        &req.text,
        &state.config.bridge,
    )
    .await
    .map_err(ApiError::from)?;

    let mut event = SessionEvent::new(session.id, Trigger::UserCmd, Provenance::Respond)
        .with_text(Actor::User, req.text.clone())
        .at(Utc::now(), TsSource::User);
    if req.mode == RespondMode::Command {
        event = event.with_intent(Intent::Command);
    }
    let applied = state.dispatcher.dispatch(event).await.map_err(ApiError::from)?;

    Ok(Json(serde_json::json!({
        "status": "sent",
        "attempts": outcome.attempts,
        "ghost_dismissals": outcome.ghost_dismissals,
        "task_id": applied.task_id,
        "turn_id": applied.turn_id,
        "state": applied.state.as_str(),
    })))
}
