//! End-to-end scenarios driven through the dispatcher, with a real
//! (in-memory) store and live broadcaster — only the HTTP framing and
//! the terminal itself are stubbed.

use std::sync::Arc;

use chrono::Utc;

use hs_bridge::{send_text, Key, PaneDriver};
use hs_domain::broadcast::BroadcastKind;
use hs_domain::config::{BridgeConfig, BroadcastConfig, IntentConfig, WatcherConfig};
use hs_domain::hook::{HookKind, HookPayload};
use hs_domain::session_event::{
    Actor, Intent, Provenance, SessionEvent, TaskState, Trigger, TsSource,
};
use hs_gateway::runtime::broadcaster::{Broadcaster, Filter};
use hs_gateway::runtime::dispatcher::Dispatcher;
use hs_gateway::runtime::inference::DisabledInference;
use hs_gateway::runtime::state_machine::Applied;
use hs_gateway::runtime::{Correlator, HookActivity, IntentDetector, TranscriptWatcher};
use hs_store::queries::{events, sessions, tasks, turns};
use hs_store::Store;

struct Harness {
    store: Arc<Store>,
    dispatcher: Arc<Dispatcher>,
    broadcaster: Arc<Broadcaster>,
    hook_activity: Arc<HookActivity>,
}

#[derive(Debug)]
enum HookOutcome {
    Applied(Box<Applied>),
    Accepted,
    AlreadyApplied,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let broadcaster = Arc::new(Broadcaster::new(BroadcastConfig::default()));
        let hook_activity = Arc::new(HookActivity::new());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            broadcaster.clone(),
            IntentDetector::from_config(&IntentConfig::default()).unwrap(),
            Arc::new(DisabledInference),
            Correlator::new(30),
            hook_activity.clone(),
        ));
        Self {
            store,
            dispatcher,
            broadcaster,
            hook_activity,
        }
    }

    fn register_project(&self, path: &str, name: &str) {
        self.store
            .with_tx(|tx| {
                hs_store::queries::projects::insert(tx, path, name, Utc::now()).map(|_| ())
            })
            .unwrap();
    }

    /// Deliver a hook end-to-end: accept (validate + correlate + audit)
    /// then dispatch inline for determinism.
    async fn hook(
        &self,
        kind: HookKind,
        body: serde_json::Value,
    ) -> hs_domain::Result<HookOutcome> {
        let payload = HookPayload::parse(kind, body)?;
        let accepted = self.dispatcher.accept_hook(&payload)?;
        if accepted.already_applied {
            return Ok(HookOutcome::AlreadyApplied);
        }
        match accepted.event {
            Some(event) => {
                let applied = self.dispatcher.dispatch(event).await?;
                Ok(HookOutcome::Applied(Box::new(applied)))
            }
            None => Ok(HookOutcome::Accepted),
        }
    }

    fn session_by_external(&self, external_id: &str) -> Option<hs_store::records::SessionRecord> {
        self.store
            .with_conn(|conn| sessions::get_by_external_id(conn, external_id))
            .unwrap()
    }

    fn transitions(&self) -> Vec<(String, String)> {
        self.store
            .with_conn(|conn| events::by_type(conn, "state_transition", 100))
            .unwrap()
            .into_iter()
            .rev()
            .map(|e| {
                (
                    e.payload["from"].as_str().unwrap().to_owned(),
                    e.payload["to"].as_str().unwrap().to_owned(),
                )
            })
            .collect()
    }

    fn task_and_turns(
        &self,
        session_id: i64,
    ) -> Vec<(hs_store::records::TaskRecord, Vec<hs_store::records::TurnRecord>)> {
        self.store
            .with_conn(|conn| {
                let task_list = tasks::list_by_session(conn, session_id)?;
                let mut out = Vec::new();
                for task in task_list {
                    let task_turns = turns::list_by_task(conn, task.id)?;
                    out.push((task, task_turns));
                }
                Ok(out)
            })
            .unwrap()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 1: idle → command → complete
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn idle_command_complete() {
    let h = Harness::new();
    h.register_project("/p", "p");

    h.hook(
        HookKind::SessionStart,
        serde_json::json!({"session_id": "A", "cwd": "/p"}),
    )
    .await
    .unwrap();
    h.hook(
        HookKind::UserPromptSubmit,
        serde_json::json!({"session_id": "A", "cwd": "/p", "prompt_text": "hello"}),
    )
    .await
    .unwrap();
    h.hook(
        HookKind::Stop,
        serde_json::json!({"session_id": "A", "cwd": "/p", "agent_text": "done"}),
    )
    .await
    .unwrap();

    let session = h.session_by_external("A").expect("session A exists");
    let tasks = h.task_and_turns(session.id);
    assert_eq!(tasks.len(), 1);

    let (task, task_turns) = &tasks[0];
    assert_eq!(task.state, TaskState::Complete);
    assert!(task.completed_at.is_some());
    assert_eq!(task.command_text.as_deref(), Some("hello"));
    assert_eq!(task.final_text.as_deref(), Some("done"));

    assert_eq!(task_turns.len(), 2);
    assert_eq!(task_turns[0].actor, Actor::User);
    assert_eq!(task_turns[0].intent, Intent::Command);
    assert_eq!(task_turns[0].text, "hello");
    assert_eq!(task_turns[1].actor, Actor::Agent);
    assert_eq!(task_turns[1].intent, Intent::Completion);
    assert_eq!(task_turns[1].text, "done");

    assert_eq!(
        h.transitions(),
        vec![
            ("idle".into(), "commanded".into()),
            ("commanded".into(), "processing".into()),
            ("processing".into(), "complete".into()),
        ]
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 2: question → remote answer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn question_and_answer() {
    let h = Harness::new();
    h.register_project("/p", "p");

    h.hook(
        HookKind::SessionStart,
        serde_json::json!({"session_id": "B", "cwd": "/p"}),
    )
    .await
    .unwrap();
    h.hook(
        HookKind::UserPromptSubmit,
        serde_json::json!({"session_id": "B", "cwd": "/p", "prompt_text": "what colour?"}),
    )
    .await
    .unwrap();
    h.hook(
        HookKind::Stop,
        serde_json::json!({"session_id": "B", "cwd": "/p", "agent_text": "Red, green, or blue?"}),
    )
    .await
    .unwrap();

    let session = h.session_by_external("B").unwrap();
    let open = h
        .store
        .with_conn(|conn| tasks::open_task(conn, session.id))
        .unwrap()
        .expect("task stays open");
    assert_eq!(open.state, TaskState::AwaitingInput);

    // Subscribe before answering so the broadcast is observable.
    let sub = h
        .broadcaster
        .subscribe(
            Filter {
                kinds: vec![BroadcastKind::StateChanged],
                session_id: Some(session.id),
                ..Default::default()
            },
            None,
        )
        .unwrap();

    // Remote answer through the bridge path.
    let event = SessionEvent::new(session.id, Trigger::UserCmd, Provenance::Respond)
        .with_text(Actor::User, "green")
        .at(Utc::now(), TsSource::User);
    let applied = h.dispatcher.dispatch(event).await.unwrap();
    assert_eq!(applied.state, TaskState::Processing);
    assert!(!applied.new_task);

    let task_turns = h
        .store
        .with_conn(|conn| turns::list_by_task(conn, open.id))
        .unwrap();
    let answer = task_turns
        .iter()
        .find(|t| t.intent == Intent::Answer)
        .expect("answer turn");
    assert_eq!(answer.text, "green");
    assert_eq!(answer.ts_source, TsSource::User);
    let question = task_turns
        .iter()
        .filter(|t| t.intent == Intent::Question)
        .next_back()
        .unwrap();
    assert_eq!(answer.answers_turn_id, Some(question.id));

    let frame = sub.next().await.expect("state_changed broadcast");
    assert_eq!(frame.kind, BroadcastKind::StateChanged);
    assert_eq!(frame.data["to"], "processing");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 3: replay safety
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn hook_replay_is_idempotent() {
    let h = Harness::new();
    h.register_project("/p", "p");

    let prompt = serde_json::json!({
        "session_id": "A", "cwd": "/p", "prompt_text": "hello", "event_id": "evt-1"
    });
    h.hook(
        HookKind::SessionStart,
        serde_json::json!({"session_id": "A", "cwd": "/p"}),
    )
    .await
    .unwrap();
    h.hook(HookKind::UserPromptSubmit, prompt.clone()).await.unwrap();
    h.hook(
        HookKind::Stop,
        serde_json::json!({"session_id": "A", "cwd": "/p", "agent_text": "done"}),
    )
    .await
    .unwrap();

    let session = h.session_by_external("A").unwrap();
    let before = h.task_and_turns(session.id);
    let transitions_before = h.transitions().len();

    // Verbatim re-delivery.
    match h.hook(HookKind::UserPromptSubmit, prompt).await.unwrap() {
        HookOutcome::AlreadyApplied => {}
        _ => panic!("expected already-applied"),
    }

    let after = h.task_and_turns(session.id);
    assert_eq!(before.len(), after.len());
    assert_eq!(before[0].1.len(), after[0].1.len());
    assert_eq!(h.transitions().len(), transitions_before);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 4: transcript reconciliation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn transcript_completes_task_and_late_stop_deduplicates() {
    let h = Harness::new();
    h.register_project("/p", "p");

    let dir = tempfile::tempdir().unwrap();
    let transcript = dir.path().join("session-a.jsonl");
    std::fs::write(&transcript, "").unwrap();

    h.hook(
        HookKind::SessionStart,
        serde_json::json!({
            "session_id": "A",
            "cwd": "/p",
            "transcript_path": transcript.to_str().unwrap(),
        }),
    )
    .await
    .unwrap();
    h.hook(
        HookKind::UserPromptSubmit,
        serde_json::json!({"session_id": "A", "cwd": "/p", "prompt_text": "hello"}),
    )
    .await
    .unwrap();

    let watcher = TranscriptWatcher::new(
        h.store.clone(),
        h.dispatcher.clone(),
        h.broadcaster.clone(),
        WatcherConfig {
            reconcile_interval_secs: 0,
            ..Default::default()
        },
        h.hook_activity.clone(),
    );
    // First tick primes the cursor at the current end of file.
    watcher.tick().await;

    // The agent writes its final message; no stop hook arrives.
    let line = serde_json::json!({
        "type": "assistant",
        "timestamp": "2026-08-01T10:00:00.000Z",
        "message": { "role": "assistant", "content": "done" },
    });
    let mut content = line.to_string();
    content.push('\n');
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&transcript)
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }
    watcher.tick().await;

    let session = h.session_by_external("A").unwrap();
    let tasks_after = h.task_and_turns(session.id);
    assert_eq!(tasks_after.len(), 1);
    let (task, task_turns) = &tasks_after[0];
    assert_eq!(task.state, TaskState::Complete);

    let completion = task_turns
        .iter()
        .find(|t| t.intent == Intent::Completion)
        .expect("completion turn from transcript");
    assert_eq!(completion.ts_source, TsSource::Jsonl);
    assert!(!completion.content_hash.is_empty());

    // A late stop with the same content creates nothing new.
    h.hook(
        HookKind::Stop,
        serde_json::json!({"session_id": "A", "cwd": "/p", "agent_text": "done"}),
    )
    .await
    .unwrap();
    let tasks_final = h.task_and_turns(session.id);
    assert_eq!(tasks_final[0].1.len(), task_turns.len());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 5: unregistered project
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn unregistered_project_is_refused() {
    let h = Harness::new();
    h.register_project("/p", "p");

    let err = h
        .hook(
            HookKind::SessionStart,
            serde_json::json!({"session_id": "C", "cwd": "/unknown"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "unregistered_project");

    assert!(h.session_by_external("C").is_none());

    // The only audit trace is the rejected_hook record.
    let all = h
        .store
        .with_conn(|conn| events::recent(conn, 10))
        .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].event_type, "rejected_hook");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 6: long-text send through the bridge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Scripted pane for the bridge: serves captures in order, records keys.
struct ScriptedPane {
    captures: parking_lot::Mutex<std::collections::VecDeque<String>>,
    actions: parking_lot::Mutex<Vec<String>>,
}

impl ScriptedPane {
    fn new(captures: Vec<String>) -> Self {
        Self {
            captures: parking_lot::Mutex::new(captures.into()),
            actions: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl PaneDriver for ScriptedPane {
    async fn capture(&self, _pane: &str, _rows: u32, _ansi: bool) -> hs_domain::Result<String> {
        let mut captures = self.captures.lock();
        Ok(if captures.len() > 1 {
            captures.pop_front().unwrap()
        } else {
            captures.front().cloned().unwrap_or_default()
        })
    }

    async fn send_literal(&self, _pane: &str, text: &str) -> hs_domain::Result<()> {
        self.actions.lock().push(format!("type:{}", text.len()));
        Ok(())
    }

    async fn send_key(&self, _pane: &str, key: Key) -> hs_domain::Result<()> {
        self.actions.lock().push(format!("key:{}", key.as_tmux_arg()));
        Ok(())
    }

    async fn is_alive(&self, _pane: &str) -> bool {
        true
    }
}

#[tokio::test(start_paused = true)]
async fn long_text_send_verifies_and_resumes_processing() {
    let h = Harness::new();
    h.register_project("/p", "p");

    h.hook(
        HookKind::SessionStart,
        serde_json::json!({"session_id": "D", "cwd": "/p", "tmux_pane_id": "%5"}),
    )
    .await
    .unwrap();
    h.hook(
        HookKind::UserPromptSubmit,
        serde_json::json!({"session_id": "D", "cwd": "/p", "prompt_text": "pick an approach"}),
    )
    .await
    .unwrap();
    h.hook(
        HookKind::Stop,
        serde_json::json!({"session_id": "D", "cwd": "/p", "agent_text": "Should I use approach one or two?"}),
    )
    .await
    .unwrap();

    let session = h.session_by_external("D").unwrap();
    let long_text = format!("use approach one because {}", "reasons ".repeat(250));
    assert!(long_text.len() >= 2_000);

    // Ghost overlay appears after typing; input clears after Enter.
    let pane = ScriptedPane::new(vec![
        String::new(),                      // pre-type ghost check: clean
        "\x1b[2msuggestion\x1b[0m".into(),  // typed content pops ghost text
        "> pending".into(),                 // before Enter
        "> ".into(),                        // after Enter: snippet gone
    ]);

    let outcome = send_text(&pane, "%5", &long_text, &BridgeConfig::default())
        .await
        .unwrap();
    assert_eq!(outcome.attempts, 1);
    assert!(outcome.ghost_dismissals >= 1);

    let event = SessionEvent::new(session.id, Trigger::UserCmd, Provenance::Respond)
        .with_text(Actor::User, long_text.clone())
        .at(Utc::now(), TsSource::User);
    let applied = h.dispatcher.dispatch(event).await.unwrap();

    assert_eq!(applied.state, TaskState::Processing);
    let task_turns = h
        .store
        .with_conn(|conn| turns::list_by_task(conn, applied.task_id.unwrap()))
        .unwrap();
    let answer = task_turns.iter().find(|t| t.intent == Intent::Answer).unwrap();
    assert_eq!(answer.text, long_text);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Command-mode respond while a task awaits input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn command_mode_supersedes_waiting_task() {
    let h = Harness::new();
    h.register_project("/p", "p");

    h.hook(
        HookKind::SessionStart,
        serde_json::json!({"session_id": "E", "cwd": "/p"}),
    )
    .await
    .unwrap();
    h.hook(
        HookKind::UserPromptSubmit,
        serde_json::json!({"session_id": "E", "cwd": "/p", "prompt_text": "pick"}),
    )
    .await
    .unwrap();
    h.hook(
        HookKind::Stop,
        serde_json::json!({"session_id": "E", "cwd": "/p", "agent_text": "Option a or b?"}),
    )
    .await
    .unwrap();

    let session = h.session_by_external("E").unwrap();
    let waiting = h
        .store
        .with_conn(|conn| tasks::open_task(conn, session.id))
        .unwrap()
        .unwrap();
    assert_eq!(waiting.state, TaskState::AwaitingInput);

    // `mode: "command"` on the respond endpoint asserts Command intent
    // on the dispatched event.
    let event = SessionEvent::new(session.id, Trigger::UserCmd, Provenance::Respond)
        .with_text(Actor::User, "forget that, add logging instead")
        .with_intent(Intent::Command)
        .at(Utc::now(), TsSource::User);
    let applied = h.dispatcher.dispatch(event).await.unwrap();

    assert!(applied.new_task);
    assert_eq!(applied.completed_task, Some(waiting.id));
    assert_eq!(applied.state, TaskState::Processing);

    let all = h.task_and_turns(session.id);
    assert_eq!(all.len(), 2);
    let (superseded, _) = &all[0];
    assert_eq!(superseded.state, TaskState::Complete);
    let (fresh, fresh_turns) = &all[1];
    assert_eq!(fresh.command_text.as_deref(), Some("forget that, add logging instead"));
    assert_eq!(fresh_turns[0].intent, Intent::Command);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session restart round-trip
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn restart_with_same_external_id_leaves_no_orphans() {
    let h = Harness::new();
    h.register_project("/p", "p");

    let start = serde_json::json!({"session_id": "A", "cwd": "/p", "event_id": "start-1"});
    h.hook(HookKind::SessionStart, start).await.unwrap();
    h.hook(
        HookKind::UserPromptSubmit,
        serde_json::json!({"session_id": "A", "cwd": "/p", "prompt_text": "work"}),
    )
    .await
    .unwrap();
    h.hook(
        HookKind::SessionEnd,
        serde_json::json!({"session_id": "A", "cwd": "/p", "event_id": "end-1"}),
    )
    .await
    .unwrap();

    let restart = serde_json::json!({"session_id": "A", "cwd": "/p", "event_id": "start-2"});
    h.hook(HookKind::SessionStart, restart).await.unwrap();

    let session = h.session_by_external("A").unwrap();
    assert!(session.is_active());
    assert_eq!(
        h.store.with_conn(|conn| tasks::count_open(conn)).unwrap(),
        0
    );
}
