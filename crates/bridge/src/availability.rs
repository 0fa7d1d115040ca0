//! Pane availability cache.
//!
//! Single-writer, many-reader: the availability worker refreshes entries,
//! API handlers and the broadcaster only read. Contention is limited to
//! the map lock held for single lookups.

use std::collections::HashMap;

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub alive: bool,
}

#[derive(Default)]
pub struct AvailabilityTracker {
    panes: RwLock<HashMap<i64, Availability>>,
}

impl AvailabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a probe result. Returns `true` when the observed liveness
    /// differs from the cached value (the caller broadcasts the change).
    pub fn update(&self, session_id: i64, alive: bool) -> bool {
        let mut panes = self.panes.write();
        match panes.insert(session_id, Availability { alive }) {
            Some(previous) => previous.alive != alive,
            None => alive, // first sighting only notifies when alive
        }
    }

    pub fn is_alive(&self, session_id: i64) -> Option<bool> {
        self.panes.read().get(&session_id).map(|a| a.alive)
    }

    /// Drop cache entries for sessions that no longer exist.
    pub fn retain(&self, live_sessions: &[i64]) {
        let mut panes = self.panes.write();
        panes.retain(|id, _| live_sessions.contains(id));
    }

    pub fn len(&self) -> usize {
        self.panes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.panes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_reports_changes_only() {
        let tracker = AvailabilityTracker::new();
        assert!(tracker.update(1, true)); // first sighting, alive
        assert!(!tracker.update(1, true)); // unchanged
        assert!(tracker.update(1, false)); // died
        assert!(tracker.update(1, true)); // recovered
        assert_eq!(tracker.is_alive(1), Some(true));
    }

    #[test]
    fn first_dead_sighting_is_silent() {
        let tracker = AvailabilityTracker::new();
        assert!(!tracker.update(7, false));
        assert_eq!(tracker.is_alive(7), Some(false));
    }

    #[test]
    fn retain_drops_stale_entries() {
        let tracker = AvailabilityTracker::new();
        tracker.update(1, true);
        tracker.update(2, true);
        tracker.retain(&[2]);
        assert_eq!(tracker.is_alive(1), None);
        assert_eq!(tracker.is_alive(2), Some(true));
    }
}
