//! Per-session write serialisation.
//!
//! All writes for one session are totally ordered; different sessions
//! proceed in parallel. Each session id maps to a `Semaphore(1)` whose
//! permit is held for the duration of a dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct SessionLockMap {
    locks: Mutex<HashMap<i64, Arc<Semaphore>>>,
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the write lock for a session. The permit auto-releases on
    /// drop; waiters are served in arrival order.
    pub async fn acquire(&self, session_id: i64) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id)
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        // Semaphores here are never closed; prune_idle retains entries
        // that are still held.
        match sem.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("session semaphore closed"),
        }
    }

    /// Try to acquire without waiting.
    pub fn try_acquire(&self, session_id: i64) -> Option<OwnedSemaphorePermit> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id)
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.try_acquire_owned().ok()
    }

    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop map entries for sessions nobody currently holds.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequential_access() {
        let map = SessionLockMap::new();
        let p1 = map.acquire(1).await;
        drop(p1);
        let p2 = map.acquire(1).await;
        drop(p2);
    }

    #[tokio::test]
    async fn different_sessions_concurrent() {
        let map = Arc::new(SessionLockMap::new());
        let p1 = map.acquire(1).await;
        let p2 = map.acquire(2).await;
        assert_eq!(map.session_count(), 2);
        drop(p1);
        drop(p2);
    }

    #[tokio::test]
    async fn same_session_waits() {
        let map = Arc::new(SessionLockMap::new());
        let map2 = map.clone();

        let p1 = map.acquire(1).await;
        let handle = tokio::spawn(async move {
            let _p2 = map2.acquire(1).await;
            42
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        drop(p1);
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn try_acquire_does_not_block() {
        let map = SessionLockMap::new();
        let p1 = map.try_acquire(1).unwrap();
        assert!(map.try_acquire(1).is_none());
        drop(p1);
        assert!(map.try_acquire(1).is_some());
    }
}
