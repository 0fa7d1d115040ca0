//! Live event stream.
//!
//! `GET /api/events` is a long-lived SSE response. Filters are applied
//! server-side at subscribe time; `Last-Event-ID` resumes from the
//! replay ring best-effort (gaps surface as `dropped` markers).

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_core::Stream;
use serde::Deserialize;

use hs_domain::broadcast::BroadcastKind;

use crate::api::error::{ApiError, ApiResult};
use crate::runtime::broadcaster::{Filter, SubscribeError, Subscription};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Comma-separated event kinds; empty = all.
    #[serde(default)]
    pub types: Option<String>,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub session_id: Option<i64>,
}

pub async fn stream(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let mut kinds = Vec::new();
    if let Some(types) = query.types.as_deref() {
        for raw in types.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let kind = BroadcastKind::parse(raw)
                .ok_or_else(|| ApiError::validation(format!("unknown event type: {raw}")))?;
            kinds.push(kind);
        }
    }

    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let subscription = state
        .broadcaster
        .subscribe(
            Filter {
                kinds,
                project_id: query.project_id,
                session_id: query.session_id,
            },
            last_event_id,
        )
        .map_err(|e| match e {
            SubscribeError::Limit { retry_after_secs } => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "subscriber_limit",
                "too many concurrent subscribers",
            )
            .retryable(Some(retry_after_secs)),
            SubscribeError::Closed => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "server_error",
                "broadcaster is shutting down",
            )
            .retryable(Some(1)),
        })?;

    let heartbeat = state.broadcaster.heartbeat();
    Ok(Sse::new(subscription_stream(subscription))
        .keep_alive(KeepAlive::new().interval(heartbeat).text("heartbeat"))
        .into_response())
}

/// Frame loop for one subscription. Dropping the stream (client
/// disconnect) drops the subscription, which unregisters it.
fn subscription_stream(
    subscription: Subscription,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        loop {
            match subscription.next().await {
                Some(envelope) => {
                    let data = serde_json::to_string(&envelope).unwrap_or_default();
                    let closing = envelope.kind == BroadcastKind::Closing;
                    yield Ok(Event::default()
                        .id(envelope.id.to_string())
                        .event(envelope.kind.as_str())
                        .data(data));
                    if closing {
                        break;
                    }
                }
                None => break,
            }
        }
    }
}
