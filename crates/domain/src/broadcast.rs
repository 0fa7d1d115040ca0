//! Broadcast envelope pushed to long-lived subscribers.

use serde::{Deserialize, Serialize};

/// Event kinds a subscriber can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastKind {
    StateChanged,
    /// Composite per-session snapshot for card rendering.
    CardRefresh,
    AvailabilityChanged,
    PriorityUpdate,
    HeadspaceUpdate,
    ProjectChanged,
    SessionInactive,
    /// Buffer-overflow marker inserted in place of evicted events.
    Dropped,
    /// Terminal frame sent on graceful shutdown.
    Closing,
}

impl BroadcastKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastKind::StateChanged => "state_changed",
            BroadcastKind::CardRefresh => "card_refresh",
            BroadcastKind::AvailabilityChanged => "availability_changed",
            BroadcastKind::PriorityUpdate => "priority_update",
            BroadcastKind::HeadspaceUpdate => "headspace_update",
            BroadcastKind::ProjectChanged => "project_changed",
            BroadcastKind::SessionInactive => "session_inactive",
            BroadcastKind::Dropped => "dropped",
            BroadcastKind::Closing => "closing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "state_changed" => Some(BroadcastKind::StateChanged),
            "card_refresh" => Some(BroadcastKind::CardRefresh),
            "availability_changed" => Some(BroadcastKind::AvailabilityChanged),
            "priority_update" => Some(BroadcastKind::PriorityUpdate),
            "headspace_update" => Some(BroadcastKind::HeadspaceUpdate),
            "project_changed" => Some(BroadcastKind::ProjectChanged),
            "session_inactive" => Some(BroadcastKind::SessionInactive),
            "dropped" => Some(BroadcastKind::Dropped),
            "closing" => Some(BroadcastKind::Closing),
            _ => None,
        }
    }
}

/// One frame on a subscriber stream. `id` is assigned by the broadcaster
/// and increases monotonically per subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub kind: BroadcastKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<i64>,
    pub data: serde_json::Value,
}

impl Envelope {
    /// Whether this envelope passes a subscriber's filter. An empty kinds
    /// list means "all kinds"; scope filters match when unset or equal.
    /// Control frames (`dropped`, `closing`) always pass.
    pub fn matches(
        &self,
        kinds: &[BroadcastKind],
        project_id: Option<i64>,
        session_id: Option<i64>,
    ) -> bool {
        if matches!(self.kind, BroadcastKind::Dropped | BroadcastKind::Closing) {
            return true;
        }
        if !kinds.is_empty() && !kinds.contains(&self.kind) {
            return false;
        }
        if let Some(p) = project_id {
            if self.project_id != Some(p) {
                return false;
            }
        }
        if let Some(s) = session_id {
            if self.session_id != Some(s) {
                return false;
            }
        }
        true
    }
}
