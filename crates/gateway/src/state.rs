//! Shared application state passed to all API handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use hs_bridge::{AvailabilityTracker, PaneDriver};
use hs_domain::config::Config;
use hs_store::Store;

use crate::runtime::broadcaster::Broadcaster;
use crate::runtime::dispatcher::Dispatcher;
use crate::runtime::watcher::HookActivity;
use crate::runtime::workers::WorkerHealth;

/// Application context, built once at startup and cloned into handlers.
/// Components register here instead of living in globals; shutdown walks
/// them in reverse construction order.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── Persistence & dispatch ───────────────────────────────────────
    pub store: Arc<Store>,
    pub dispatcher: Arc<Dispatcher>,

    // ── Broadcast fabric ─────────────────────────────────────────────
    pub broadcaster: Arc<Broadcaster>,

    // ── Terminal bridge ──────────────────────────────────────────────
    pub pane_driver: Arc<dyn PaneDriver>,
    pub availability: Arc<AvailabilityTracker>,

    // ── Liveness bookkeeping ─────────────────────────────────────────
    pub hook_activity: Arc<HookActivity>,
    pub worker_health: Arc<WorkerHealth>,
    pub started_at: DateTime<Utc>,

    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = local dev mode, no auth enforced.
    pub api_token_hash: Option<Vec<u8>>,
}
