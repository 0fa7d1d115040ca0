//! Hook ingestion surface.
//!
//! `POST /hook/{kind}` for the eight lifecycle kinds. The handler does
//! only bounded work inline — payload validation, idempotency check,
//! correlation, audit append — and hands the state-machine dispatch to a
//! task so responses stay inside the latency budget. Late work still
//! lands correctly: dispatch is serialised per session and idempotent.

use axum::extract::{Path, State};
use axum::response::Json;

use hs_domain::hook::{HookKind, HookPayload};

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn receive(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<serde_json::Value>> {
    let kind = HookKind::from_path(&kind)
        .ok_or_else(|| ApiError::not_found(format!("unknown hook kind: {kind}")))?;
    let payload = HookPayload::parse(kind, body).map_err(ApiError::from)?;

    let accepted = state.dispatcher.accept_hook(&payload).map_err(ApiError::from)?;
    if accepted.already_applied {
        return Ok(Json(serde_json::json!({ "status": "already_applied" })));
    }

    if let Some(event) = accepted.event {
        let dispatcher = state.dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(event).await {
                tracing::warn!(error = %e, "deferred hook dispatch failed");
            }
        });
    }

    Ok(Json(serde_json::json!({
        "status": "accepted",
        "session_id": accepted.session.id,
        "external_session_id": accepted.session.external_id,
        "resolution": accepted.resolution,
    })))
}
