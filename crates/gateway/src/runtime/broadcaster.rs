//! The live broadcast fabric.
//!
//! Publishers hand envelopes to [`Broadcaster::publish`]; each subscriber
//! owns a bounded queue drained by its SSE loop. Ordering is per
//! subscription (monotonic envelope ids); overflow evicts the oldest
//! frame and surfaces a `dropped` marker in its place, never silent loss.
//!
//! Locking: the subscriber registry lock is held only for registration,
//! unregistration, and the per-publish fan-out scan. Each queue has its
//! own lock, single-writer (the publisher) and single-reader (its SSE
//! loop).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use hs_domain::broadcast::{BroadcastKind, Envelope};
use hs_domain::config::BroadcastConfig;

#[derive(Debug)]
pub enum SubscribeError {
    /// Subscriber cap reached; retry after the hinted seconds.
    Limit { retry_after_secs: u64 },
    /// The broadcaster is shutting down.
    Closed,
}

#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub kinds: Vec<BroadcastKind>,
    pub project_id: Option<i64>,
    pub session_id: Option<i64>,
}

#[derive(Debug)]
struct QueueInner {
    buf: VecDeque<Envelope>,
    dropped: u64,
    first_dropped_id: u64,
    last_pop: Instant,
}

#[derive(Debug)]
pub struct SubscriberQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                buf: VecDeque::new(),
                dropped: 0,
                first_dropped_id: 0,
                last_pop: Instant::now(),
            }),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, envelope: Envelope, capacity: usize) {
        {
            let mut inner = self.inner.lock();
            if inner.buf.len() >= capacity {
                if let Some(evicted) = inner.buf.pop_front() {
                    if inner.dropped == 0 {
                        inner.first_dropped_id = evicted.id;
                    }
                    inner.dropped += 1;
                }
            }
            inner.buf.push_back(envelope);
        }
        self.notify.notify_one();
    }

    /// Next frame for the outbound loop. A pending overflow surfaces as a
    /// `dropped` marker before any newer frame.
    pub fn pop(&self) -> Option<Envelope> {
        let mut inner = self.inner.lock();
        inner.last_pop = Instant::now();
        if inner.dropped > 0 {
            let marker = Envelope {
                id: inner.first_dropped_id,
                kind: BroadcastKind::Dropped,
                project_id: None,
                session_id: None,
                data: serde_json::json!({ "count": inner.dropped }),
            };
            inner.dropped = 0;
            return Some(marker);
        }
        inner.buf.pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn is_stalled(&self, capacity: usize, grace: Duration) -> bool {
        let inner = self.inner.lock();
        inner.buf.len() >= capacity && inner.last_pop.elapsed() > grace
    }
}

#[derive(Debug)]
struct SubscriberEntry {
    filter: Filter,
    queue: Arc<SubscriberQueue>,
}

#[derive(Debug)]
pub struct Broadcaster {
    config: BroadcastConfig,
    next_event_id: AtomicU64,
    next_subscriber_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, SubscriberEntry>>,
    replay: Mutex<VecDeque<Envelope>>,
    closed: AtomicBool,
}

impl Broadcaster {
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            next_event_id: AtomicU64::new(0),
            next_subscriber_id: AtomicU64::new(0),
            subscribers: Mutex::new(HashMap::new()),
            replay: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.config.heartbeat_secs)
    }

    /// Assign the next envelope id and fan out to matching subscribers.
    pub fn publish(
        &self,
        kind: BroadcastKind,
        project_id: Option<i64>,
        session_id: Option<i64>,
        data: serde_json::Value,
    ) -> u64 {
        let id = self.next_event_id.fetch_add(1, Ordering::SeqCst) + 1;
        let envelope = Envelope {
            id,
            kind,
            project_id,
            session_id,
            data,
        };

        {
            let mut replay = self.replay.lock();
            if replay.len() >= self.config.replay_capacity {
                replay.pop_front();
            }
            replay.push_back(envelope.clone());
        }

        let subscribers = self.subscribers.lock();
        for entry in subscribers.values() {
            if envelope.matches(
                &entry.filter.kinds,
                entry.filter.project_id,
                entry.filter.session_id,
            ) {
                entry.queue.push(envelope.clone(), self.config.buffer_size);
            }
        }
        id
    }

    /// Register a subscriber. `last_event_id` replays the tail of the
    /// global ring best-effort: a gap older than the ring surfaces as a
    /// `dropped` marker, never as silent loss.
    pub fn subscribe(
        self: &Arc<Self>,
        filter: Filter,
        last_event_id: Option<u64>,
    ) -> Result<Subscription, SubscribeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SubscribeError::Closed);
        }

        let queue = Arc::new(SubscriberQueue::new());

        {
            let mut subscribers = self.subscribers.lock();
            if subscribers.len() >= self.config.max_subscribers {
                return Err(SubscribeError::Limit {
                    retry_after_secs: self.config.heartbeat_secs,
                });
            }

            if let Some(k) = last_event_id {
                let replay = self.replay.lock();
                if let Some(oldest) = replay.front() {
                    if oldest.id > k + 1 {
                        queue.push(
                            Envelope {
                                id: k + 1,
                                kind: BroadcastKind::Dropped,
                                project_id: None,
                                session_id: None,
                                data: serde_json::json!({ "count": oldest.id - k - 1 }),
                            },
                            self.config.buffer_size,
                        );
                    }
                }
                for envelope in replay.iter().filter(|e| e.id > k) {
                    if envelope.matches(
                        &filter.kinds,
                        filter.project_id,
                        filter.session_id,
                    ) {
                        queue.push(envelope.clone(), self.config.buffer_size);
                    }
                }
            }

            let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst) + 1;
            subscribers.insert(
                id,
                SubscriberEntry {
                    filter,
                    queue: queue.clone(),
                },
            );

            Ok(Subscription {
                id,
                queue,
                broadcaster: self.clone(),
            })
        }
    }

    fn unsubscribe(&self, id: u64) {
        if let Some(entry) = self.subscribers.lock().remove(&id) {
            entry.queue.close();
        }
    }

    /// Unregister subscribers whose queue sits full past the write grace
    /// period — the outbound side has stopped draining.
    pub fn prune_stalled(&self) -> usize {
        let grace = Duration::from_secs(self.config.write_grace_secs);
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|id, entry| {
            let stalled = entry.queue.is_stalled(self.config.buffer_size, grace);
            if stalled {
                tracing::warn!(subscriber = id, "pruning stalled subscriber");
                entry.queue.close();
            }
            !stalled
        });
        before - subscribers.len()
    }

    /// Graceful shutdown: every subscriber receives a terminal `closing`
    /// frame, then its queue closes.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let id = self.next_event_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut subscribers = self.subscribers.lock();
        for entry in subscribers.values() {
            entry.queue.push(
                Envelope {
                    id,
                    kind: BroadcastKind::Closing,
                    project_id: None,
                    session_id: None,
                    data: serde_json::json!({}),
                },
                self.config.buffer_size + 1,
            );
            entry.queue.close();
        }
        subscribers.clear();
    }
}

/// A live subscription. Dropping it unregisters the subscriber.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    queue: Arc<SubscriberQueue>,
    broadcaster: Arc<Broadcaster>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn try_next(&self) -> Option<Envelope> {
        self.queue.pop()
    }

    /// Wait for the next frame. `None` once the queue is closed and fully
    /// drained.
    pub async fn next(&self) -> Option<Envelope> {
        loop {
            if let Some(envelope) = self.queue.pop() {
                return Some(envelope);
            }
            if self.queue.is_closed() {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcaster(buffer: usize, max_subscribers: usize) -> Arc<Broadcaster> {
        Arc::new(Broadcaster::new(BroadcastConfig {
            buffer_size: buffer,
            max_subscribers,
            ..Default::default()
        }))
    }

    fn publish_n(b: &Broadcaster, n: u64) {
        for i in 0..n {
            b.publish(
                BroadcastKind::StateChanged,
                Some(1),
                Some(1),
                serde_json::json!({ "seq": i }),
            );
        }
    }

    #[tokio::test]
    async fn ids_are_monotonic_per_subscription() {
        let b = broadcaster(100, 8);
        let sub = b.subscribe(Filter::default(), None).unwrap();
        publish_n(&b, 5);

        let mut last = 0;
        for _ in 0..5 {
            let envelope = sub.next().await.unwrap();
            assert!(envelope.id > last);
            last = envelope.id;
        }
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn filters_are_applied_server_side() {
        let b = broadcaster(100, 8);
        let sub = b
            .subscribe(
                Filter {
                    kinds: vec![BroadcastKind::CardRefresh],
                    session_id: Some(7),
                    ..Default::default()
                },
                None,
            )
            .unwrap();

        b.publish(BroadcastKind::StateChanged, None, Some(7), serde_json::json!({}));
        b.publish(BroadcastKind::CardRefresh, None, Some(8), serde_json::json!({}));
        let id = b.publish(BroadcastKind::CardRefresh, None, Some(7), serde_json::json!({}));

        let envelope = sub.next().await.unwrap();
        assert_eq!(envelope.id, id);
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn overflow_surfaces_dropped_marker() {
        let b = broadcaster(3, 8);
        let sub = b.subscribe(Filter::default(), None).unwrap();
        publish_n(&b, 5); // buffer 3: events 1,2 evicted

        let marker = sub.next().await.unwrap();
        assert_eq!(marker.kind, BroadcastKind::Dropped);
        assert_eq!(marker.id, 1);
        assert_eq!(marker.data["count"], 2);

        let next = sub.next().await.unwrap();
        assert_eq!(next.id, 3);
    }

    #[tokio::test]
    async fn subscriber_limit_is_enforced() {
        let b = broadcaster(10, 1);
        let _first = b.subscribe(Filter::default(), None).unwrap();
        match b.subscribe(Filter::default(), None) {
            Err(SubscribeError::Limit { retry_after_secs }) => {
                assert!(retry_after_secs > 0)
            }
            other => panic!("expected limit error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn drop_frees_a_subscriber_slot() {
        let b = broadcaster(10, 1);
        let first = b.subscribe(Filter::default(), None).unwrap();
        drop(first);
        assert_eq!(b.subscriber_count(), 0);
        b.subscribe(Filter::default(), None).unwrap();
    }

    #[tokio::test]
    async fn reconnect_with_last_event_id_skips_seen_events() {
        let b = broadcaster(100, 8);
        publish_n(&b, 5);

        let sub = b.subscribe(Filter::default(), Some(3)).unwrap();
        let envelope = sub.next().await.unwrap();
        assert_eq!(envelope.id, 4);
        let envelope = sub.next().await.unwrap();
        assert_eq!(envelope.id, 5);
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn reconnect_beyond_ring_gets_gap_marker() {
        let b = Arc::new(Broadcaster::new(BroadcastConfig {
            buffer_size: 100,
            replay_capacity: 3,
            max_subscribers: 8,
            ..Default::default()
        }));
        publish_n(&b, 10); // ring holds 8,9,10

        let sub = b.subscribe(Filter::default(), Some(2)).unwrap();
        let marker = sub.next().await.unwrap();
        assert_eq!(marker.kind, BroadcastKind::Dropped);
        assert_eq!(marker.data["count"], 5); // events 3..=7 lost
        assert_eq!(sub.next().await.unwrap().id, 8);
    }

    #[tokio::test]
    async fn shutdown_sends_closing_frame() {
        let b = broadcaster(10, 8);
        let sub = b.subscribe(Filter::default(), None).unwrap();
        b.shutdown();

        let envelope = sub.next().await.unwrap();
        assert_eq!(envelope.kind, BroadcastKind::Closing);
        assert!(sub.next().await.is_none());
        assert!(matches!(
            b.subscribe(Filter::default(), None),
            Err(SubscribeError::Closed)
        ));
    }
}
