//! Event ingestion and dispatch.
//!
//! The dispatcher is the funnel between capture paths and the state
//! machine: it deduplicates hook re-deliveries, correlates sessions,
//! serialises per-session writes, and fans out broadcasts after commit.
//! Derived-summary inference runs as fire-and-forget tasks that never
//! hold up a transition.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use hs_domain::broadcast::BroadcastKind;
use hs_domain::hook::{HookKind, HookPayload};
use hs_domain::session_event::{Provenance, SessionEvent, TaskState, Trigger, TsSource};
use hs_domain::{Error, Result};
use hs_store::queries::{events, projects, sessions, tasks, turns};
use hs_store::records::{NewEvent, SessionRecord};
use hs_store::Store;

use super::broadcaster::Broadcaster;
use super::correlator::{Correlator, Resolution};
use super::dedupe::DedupeStore;
use super::inference::{Inference, Purpose};
use super::intent::{AgentIntent, IntentDetector};
use super::session_lock::SessionLockMap;
use super::state_machine::{self, Applied};
use super::watcher::HookActivity;

/// TTL for the hook idempotency store.
const DEDUPE_TTL: Duration = Duration::from_secs(86_400);

/// Result of the fast accept phase of a hook.
#[derive(Debug, Clone)]
pub struct AcceptedHook {
    pub session: SessionRecord,
    pub resolution: Resolution,
    /// The canonical event to dispatch, when the hook carries one.
    pub event: Option<SessionEvent>,
    pub already_applied: bool,
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<Store>,
    locks: Arc<SessionLockMap>,
    broadcaster: Arc<Broadcaster>,
    detector: Arc<IntentDetector>,
    inference: Arc<dyn Inference>,
    dedupe: Arc<DedupeStore>,
    correlator: Arc<Correlator>,
    hook_activity: Arc<HookActivity>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        broadcaster: Arc<Broadcaster>,
        detector: IntentDetector,
        inference: Arc<dyn Inference>,
        correlator: Correlator,
        hook_activity: Arc<HookActivity>,
    ) -> Self {
        Self {
            store,
            locks: Arc::new(SessionLockMap::new()),
            broadcaster,
            detector: Arc::new(detector),
            inference,
            dedupe: Arc::new(DedupeStore::new(DEDUPE_TTL)),
            correlator: Arc::new(correlator),
            hook_activity,
        }
    }

    pub fn locks(&self) -> &SessionLockMap {
        &self.locks
    }

    pub fn detector(&self) -> &IntentDetector {
        &self.detector
    }

    /// Fast accept phase for a hook: idempotency check, correlation, and
    /// the `hook_received` audit record. Bounded work — the state-machine
    /// dispatch is handed to a task by the caller.
    pub fn accept_hook(&self, payload: &HookPayload) -> Result<AcceptedHook> {
        self.hook_activity.mark();

        let dedupe_key = payload.dedupe_key();
        if dedupe_key.as_deref().is_some_and(|key| self.dedupe.contains(key)) {
            tracing::debug!(
                kind = %payload.kind(),
                session = %payload.correlation().session_id,
                "duplicate hook delivery, already applied"
            );
            // A prior delivery already created the session; resolving
            // again is read-mostly and finds it.
            let session = self
                .store
                .with_tx_domain(|tx| {
                    self.correlator
                        .resolve(tx, payload.correlation())
                        .map(|(s, _)| s)
                })?;
            return Ok(AcceptedHook {
                session,
                resolution: Resolution::ExternalId,
                event: None,
                already_applied: true,
            });
        }

        let kind = payload.kind();
        let resolved = self.store.with_tx_domain(|tx| {
            let (session, resolution) = self.correlator.resolve(tx, payload.correlation())?;
            let mut audit = serde_json::json!({
                "kind": kind.as_str(),
                "resolution": resolution,
            });
            if kind == HookKind::SessionStart {
                if let Some(slug) = &session.persona_slug {
                    let priming = std::path::Path::new("data/personas")
                        .join(slug)
                        .with_extension("md");
                    audit["priming_available"] = serde_json::json!(priming.exists());
                }
            }
            events::append(
                tx,
                &NewEvent::new("hook_received")
                    .project(session.project_id)
                    .session(session.id)
                    .payload(audit),
                Utc::now(),
            )
            .map_err(Error::from)?;
            Ok((session, resolution))
        });

        let (session, resolution) = match resolved {
            Ok(ok) => ok,
            Err(e) => {
                // The rejection itself is auditable; the main transaction
                // rolled back, so this writes on its own.
                let _ = self.store.with_tx(|tx| {
                    events::append(
                        tx,
                        &NewEvent::new("rejected_hook").payload(serde_json::json!({
                            "kind": kind.as_str(),
                            "session_id": payload.correlation().session_id,
                            "error": e.code(),
                        })),
                        Utc::now(),
                    )
                });
                return Err(e);
            }
        };

        if let Some(key) = dedupe_key.as_deref() {
            self.dedupe.insert(key);
        }

        let event = normalize(payload, session.id);
        if kind == HookKind::SessionStart {
            self.broadcaster.publish(
                BroadcastKind::CardRefresh,
                Some(session.project_id),
                Some(session.id),
                self.card_snapshot(session.id).unwrap_or_default(),
            );
        }

        Ok(AcceptedHook {
            session,
            resolution,
            event,
            already_applied: false,
        })
    }

    /// Apply one canonical event under the session lock, then broadcast.
    pub async fn dispatch(&self, event: SessionEvent) -> Result<Applied> {
        let permit = self.locks.acquire(event.session_id).await;
        let applied = self
            .store
            .with_tx(|tx| state_machine::apply(tx, &event, &self.detector))
            .map_err(Error::from)?;
        drop(permit);

        self.after_commit(&applied);
        Ok(applied)
    }

    fn after_commit(&self, applied: &Applied) {
        if applied.rejected || applied.transitions.is_empty() {
            return;
        }

        for (from, to) in &applied.transitions {
            self.broadcaster.publish(
                BroadcastKind::StateChanged,
                Some(applied.project_id),
                Some(applied.session_id),
                serde_json::json!({
                    "session_id": applied.session_id,
                    "task_id": applied.task_id,
                    "from": from.as_str(),
                    "to": to.as_str(),
                }),
            );
        }

        self.broadcaster.publish(
            BroadcastKind::CardRefresh,
            Some(applied.project_id),
            Some(applied.session_id),
            self.card_snapshot(applied.session_id).unwrap_or_default(),
        );

        if applied.new_task {
            if let Some(task_id) = applied.task_id {
                self.spawn_summary(task_id, Purpose::Instruction);
            }
        }
        if let Some(task_id) = applied.completed_task {
            self.spawn_summary(task_id, Purpose::CompletionSummary);
        }
    }

    /// Composite per-session snapshot for card rendering.
    pub fn card_snapshot(&self, session_id: i64) -> Result<serde_json::Value> {
        self.store
            .with_conn(|conn| {
                let Some(session) = sessions::get_by_id(conn, session_id)? else {
                    return Ok(serde_json::Value::Null);
                };
                let project = projects::get_by_id(conn, session.project_id)?;
                let task = match tasks::open_task(conn, session_id)? {
                    Some(task) => Some(task),
                    None => tasks::latest_task(conn, session_id)?,
                };
                let state = task
                    .as_ref()
                    .map(|t| t.state)
                    .unwrap_or(TaskState::Idle);
                let turn_count = match &task {
                    Some(task) => turns::count_by_task(conn, task.id)?,
                    None => 0,
                };

                Ok(serde_json::json!({
                    "session_id": session.id,
                    "external_id": session.external_id,
                    "project": project.map(|p| serde_json::json!({
                        "id": p.id,
                        "name": p.name,
                        "path": p.path,
                    })),
                    "state": state.as_str(),
                    "active": session.is_active(),
                    "persona": session.persona_slug,
                    "task": task.map(|t| serde_json::json!({
                        "id": t.id,
                        "state": t.state.as_str(),
                        "instruction": t.instruction,
                        "completion_summary": t.completion_summary,
                        "started_at": t.started_at.to_rfc3339(),
                        "turns": turn_count,
                    })),
                    "last_seen_at": session.last_seen_at.to_rfc3339(),
                }))
            })
            .map_err(Error::from)
    }

    /// Fire-and-forget derived-summary generation. Idempotent (the store
    /// only fills empty columns) and never on the dispatch path.
    fn spawn_summary(&self, task_id: i64, purpose: Purpose) {
        let store = self.store.clone();
        let inference = self.inference.clone();
        let broadcaster = self.broadcaster.clone();

        tokio::spawn(async move {
            let source = store.with_conn(|conn| {
                Ok(tasks::get_by_id(conn, task_id)?.and_then(|t| match purpose {
                    Purpose::Instruction => t.command_text.map(|c| (c, t.session_id)),
                    Purpose::CompletionSummary => t.final_text.map(|c| (c, t.session_id)),
                }))
            });
            let Ok(Some((text, session_id))) = source else {
                return;
            };

            let prompt = match purpose {
                Purpose::Instruction => format!(
                    "Summarise this coding-agent command as one short imperative line:\n{text}"
                ),
                Purpose::CompletionSummary => format!(
                    "Summarise what the agent accomplished, one line:\n{text}"
                ),
            };

            match inference.infer(&prompt, purpose).await {
                Ok(summary) => {
                    let write = store.with_tx(|tx| match purpose {
                        Purpose::Instruction => tasks::set_instruction(tx, task_id, &summary),
                        Purpose::CompletionSummary => {
                            tasks::set_completion_summary(tx, task_id, &summary)
                        }
                    });
                    if write.is_ok() {
                        broadcaster.publish(
                            BroadcastKind::CardRefresh,
                            None,
                            Some(session_id),
                            serde_json::json!({ "task_id": task_id, "summary": purpose.as_str() }),
                        );
                    }
                }
                Err(e) => {
                    tracing::debug!(task_id, error = %e, "summary generation skipped");
                }
            }
        });
    }
}

/// Normalise a validated hook payload into the canonical event shape.
/// `session_start` resolves purely through the correlator and carries no
/// state-machine trigger.
pub fn normalize(payload: &HookPayload, session_id: i64) -> Option<SessionEvent> {
    let now = Utc::now();
    let event = match payload {
        HookPayload::SessionStart(_) => return None,
        HookPayload::SessionEnd(_) => {
            SessionEvent::new(session_id, Trigger::SessionEnd, Provenance::Hook)
        }
        HookPayload::UserPromptSubmit(h) => SessionEvent::new(
            session_id,
            Trigger::UserCmd,
            Provenance::Hook,
        )
        .with_text(hs_domain::session_event::Actor::User, h.prompt_text.clone()),
        HookPayload::Stop(h) => {
            let mut event = SessionEvent::new(session_id, Trigger::Stop, Provenance::Hook);
            if let Some(text) = &h.agent_text {
                event = event.with_text(hs_domain::session_event::Actor::Agent, text.clone());
            }
            event
        }
        HookPayload::PreToolUse(_) => {
            SessionEvent::new(session_id, Trigger::AgentProgress, Provenance::Hook)
        }
        HookPayload::PostToolUse(h) => {
            let mut event =
                SessionEvent::new(session_id, Trigger::AgentProgress, Provenance::Hook);
            if let Some(text) = &h.transcript_text {
                event = event.with_text(hs_domain::session_event::Actor::Agent, text.clone());
            }
            event
        }
        HookPayload::Notification(h) => {
            let mut event =
                SessionEvent::new(session_id, Trigger::AttentionRequest, Provenance::Hook);
            if let Some(text) = &h.message {
                event = event.with_text(hs_domain::session_event::Actor::Agent, text.clone());
            }
            event
        }
        HookPayload::PermissionRequest(h) => {
            let mut event =
                SessionEvent::new(session_id, Trigger::AttentionRequest, Provenance::Hook);
            if let Some(text) = &h.message {
                event = event.with_text(hs_domain::session_event::Actor::Agent, text.clone());
            }
            event
        }
    };
    Some(event.at(now, TsSource::Server))
}

/// Classify transcript-derived agent text into its trigger.
pub fn agent_trigger(detector: &IntentDetector, text: &str) -> Trigger {
    match detector.classify(text).0 {
        AgentIntent::Question => Trigger::AgentQuestion,
        AgentIntent::Completion => Trigger::AgentCompletion,
        AgentIntent::Progress => Trigger::AgentProgress,
    }
}
