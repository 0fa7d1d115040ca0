pub mod auth;
pub mod error;
pub mod events;
pub mod health;
pub mod hooks;
pub mod objective;
pub mod projects;
pub mod respond;
pub mod sessions;

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// `/health` is public; everything else sits behind the bearer-token
/// middleware (a no-op in local dev mode when no token is configured).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/health", get(health::health));

    let protected = Router::new()
        // Hook surface (eight lifecycle kinds)
        .route("/hook/:kind", post(hooks::receive))
        // Projects (explicit registration only)
        .route("/api/projects", post(projects::register))
        .route("/api/projects", get(projects::list))
        .route("/api/projects/:id/events", get(projects::event_history))
        // Sessions (launcher contract)
        .route("/api/sessions", post(sessions::register))
        .route("/api/sessions", get(sessions::list))
        .route("/api/sessions/:external_id", delete(sessions::end))
        .route(
            "/api/sessions/:external_id/events",
            get(sessions::event_history),
        )
        // Terminal input bridge
        .route("/api/respond/:session_id", post(respond::respond))
        // Live event stream
        .route("/api/events", get(events::stream))
        // Objective
        .route("/api/objective", get(objective::get))
        .route("/api/objective", put(objective::set))
        // Metrics
        .route("/api/metrics", get(health::metrics))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
