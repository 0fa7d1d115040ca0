//! Named background workers.
//!
//! Every periodic job is an explicit worker with an interval, a
//! cancellation token, and a health entry surfaced via `/health`.
//! Workers start at boot and stop in reverse order on shutdown.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Running,
    Stopped,
}

struct WorkerStatus {
    state: WorkerState,
    interval: Duration,
    last_tick: Option<Instant>,
}

/// Shared health registry, read by the health endpoint.
#[derive(Default)]
pub struct WorkerHealth {
    statuses: RwLock<HashMap<&'static str, WorkerStatus>>,
}

impl WorkerHealth {
    fn register(&self, name: &'static str, interval: Duration) {
        self.statuses.write().insert(
            name,
            WorkerStatus {
                state: WorkerState::Running,
                interval,
                last_tick: None,
            },
        );
    }

    fn mark_tick(&self, name: &'static str) {
        if let Some(status) = self.statuses.write().get_mut(name) {
            status.last_tick = Some(Instant::now());
        }
    }

    fn mark_stopped(&self, name: &'static str) {
        if let Some(status) = self.statuses.write().get_mut(name) {
            status.state = WorkerState::Stopped;
        }
    }

    /// A worker is healthy while running and not more than two intervals
    /// behind on ticks.
    pub fn all_healthy(&self) -> bool {
        self.statuses.read().values().all(|status| {
            status.state == WorkerState::Running
                && match status.last_tick {
                    Some(at) => at.elapsed() <= status.interval * 2 + Duration::from_secs(1),
                    None => true, // not yet ticked after start
                }
        })
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let statuses = self.statuses.read();
        let mut out = serde_json::Map::new();
        for (name, status) in statuses.iter() {
            out.insert(
                (*name).to_owned(),
                serde_json::json!({
                    "running": status.state == WorkerState::Running,
                    "interval_secs": status.interval.as_secs(),
                    "last_tick_secs_ago": status.last_tick.map(|at| at.elapsed().as_secs()),
                }),
            );
        }
        serde_json::Value::Object(out)
    }
}

struct WorkerHandle {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// The set of running workers, stoppable in reverse start order.
pub struct WorkerSet {
    workers: Vec<WorkerHandle>,
    health: Arc<WorkerHealth>,
}

impl Default for WorkerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSet {
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
            health: Arc::new(WorkerHealth::default()),
        }
    }

    pub fn health(&self) -> Arc<WorkerHealth> {
        self.health.clone()
    }

    /// Spawn a named interval worker. `tick` runs to completion on each
    /// interval; cancellation is observed between ticks.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, interval: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let health = self.health.clone();
        health.register(name, interval);

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first interval tick fires immediately; skip it so the
            // worker's cadence starts one interval after boot.
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = timer.tick() => {
                        tick().await;
                        health.mark_tick(name);
                    }
                }
            }
            health.mark_stopped(name);
            tracing::debug!(worker = name, "worker stopped");
        });

        tracing::info!(worker = name, interval_secs = interval.as_secs(), "worker started");
        self.workers.push(WorkerHandle {
            name,
            cancel,
            handle,
        });
    }

    /// Stop all workers in reverse start order and wait for each.
    pub async fn stop_all(mut self) {
        while let Some(worker) = self.workers.pop() {
            worker.cancel.cancel();
            if let Err(e) = worker.handle.await {
                tracing::warn!(worker = worker.name, error = %e, "worker join failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn workers_tick_and_stop_in_reverse_order() {
        let ticks = Arc::new(AtomicU32::new(0));
        let mut set = WorkerSet::new();

        let counter = ticks.clone();
        set.spawn("test-ticker", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert!(ticks.load(Ordering::SeqCst) >= 3);

        let health = set.health();
        assert!(health.all_healthy());

        set.stop_all().await;
        assert!(!health.all_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_reports_every_worker() {
        let mut set = WorkerSet::new();
        set.spawn("a", Duration::from_secs(5), || async {});
        set.spawn("b", Duration::from_secs(7), || async {});

        let snapshot = set.health().snapshot();
        assert!(snapshot.get("a").is_some());
        assert_eq!(snapshot["b"]["interval_secs"], 7);

        set.stop_all().await;
    }
}
