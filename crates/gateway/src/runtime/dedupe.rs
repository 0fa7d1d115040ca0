//! In-memory idempotency store for hook re-delivery.
//!
//! Tracks seen dedupe keys with a TTL so webhook retries and notifier
//! replays do not produce duplicate turns or state changes. The turn
//! content-hash constraint in the store is the durable backstop; this
//! keeps replays off the dispatch path entirely.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub struct DedupeStore {
    seen: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl DedupeStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Whether this key was seen inside the TTL.
    pub fn contains(&self, key: &str) -> bool {
        let map = self.seen.lock();
        match map.get(key) {
            Some(ts) => ts.elapsed() < self.ttl,
            None => false,
        }
    }

    /// Record a key. Called only after the hook was actually accepted, so
    /// a rejected delivery stays replayable.
    pub fn insert(&self, key: &str) {
        let mut map = self.seen.lock();
        let now = Instant::now();

        // Lazy cleanup when the map grows large.
        if map.len() > 10_000 {
            map.retain(|_, ts| now.duration_since(*ts) < self.ttl);
        }

        map.insert(key.to_owned(), now);
    }

    /// Returns `true` if this key was already seen inside the TTL,
    /// inserting it otherwise.
    pub fn check_and_insert(&self, key: &str) -> bool {
        if self.contains(key) {
            return true;
        }
        self.insert(key);
        false
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_detected_inside_ttl() {
        let store = DedupeStore::new(Duration::from_secs(60));
        assert!(!store.check_and_insert("a:stop:1"));
        assert!(store.check_and_insert("a:stop:1"));
        assert!(!store.check_and_insert("a:stop:2"));
    }

    #[test]
    fn expired_keys_are_fresh_again() {
        let store = DedupeStore::new(Duration::from_millis(0));
        assert!(!store.check_and_insert("k"));
        assert!(!store.check_and_insert("k"));
    }
}
