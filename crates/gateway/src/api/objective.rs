//! The singleton user objective with append-only history.

use axum::extract::State;
use axum::response::Json;
use chrono::Utc;
use serde::Deserialize;

use hs_domain::broadcast::BroadcastKind;
use hs_store::queries::{events, objective};
use hs_store::records::NewEvent;

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn get(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let current = state
        .store
        .with_conn(|conn| objective::get(conn))
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("no objective set"))?;
    Ok(Json(serde_json::json!({
        "text": current.text,
        "updated_at": current.updated_at.to_rfc3339(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct SetObjective {
    pub text: String,
}

pub async fn set(
    State(state): State<AppState>,
    Json(req): Json<SetObjective>,
) -> ApiResult<Json<serde_json::Value>> {
    let text = req.text.trim();
    if text.is_empty() {
        return Err(ApiError::validation("text must not be empty"));
    }

    state
        .store
        .with_tx(|tx| {
            objective::set(tx, text, Utc::now())?;
            events::append(
                tx,
                &NewEvent::new("objective_changed")
                    .payload(serde_json::json!({ "text": text })),
                Utc::now(),
            )?;
            Ok(())
        })
        .map_err(ApiError::from)?;

    state.broadcaster.publish(
        BroadcastKind::HeadspaceUpdate,
        None,
        None,
        serde_json::json!({ "objective": text }),
    );

    Ok(Json(serde_json::json!({ "status": "updated" })))
}
