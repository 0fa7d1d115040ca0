//! The task state machine — sole writer of task and turn state.
//!
//! Every capture path (hooks, transcript tailing, remote input) funnels a
//! canonical [`SessionEvent`] through [`apply`] inside one store
//! transaction, under the per-session lock. A transition writes the task
//! row and its `state_transition` event atomically; an invalid trigger is
//! logged and dropped without touching anything.

use chrono::Utc;
use rusqlite::Transaction;

use hs_domain::hash::content_hash;
use hs_domain::session_event::{Actor, Intent, SessionEvent, TaskState, Trigger};
use hs_store::queries::{events, sessions, tasks, turns};
use hs_store::records::{NewEvent, SessionRecord, TaskRecord};
use hs_store::{Error as StoreError, Result as StoreResult};

use super::intent::{AgentIntent, IntentDetector};

/// What a dispatch changed. The dispatcher broadcasts and schedules
/// inference from this after the transaction commits.
#[derive(Debug, Clone, Default)]
pub struct Applied {
    pub session_id: i64,
    pub project_id: i64,
    /// `(from, to)` pairs in the order they were written.
    pub transitions: Vec<(TaskState, TaskState)>,
    pub task_id: Option<i64>,
    pub turn_id: Option<i64>,
    /// State after the event, as derived for the session.
    pub state: TaskState,
    /// A task was created by this event.
    pub new_task: bool,
    /// A task reached `complete` during this event.
    pub completed_task: Option<i64>,
    /// The event was a replay or content-hash duplicate; nothing changed.
    pub duplicate: bool,
    /// The trigger was invalid for the current state and was dropped.
    pub rejected: bool,
}

/// Derived session state: the open task's state, else `complete` when a
/// finished task exists, else `idle`.
fn derive_state(tx: &Transaction, session_id: i64) -> StoreResult<(Option<TaskRecord>, TaskState)> {
    if let Some(task) = tasks::open_task(tx, session_id)? {
        let state = task.state;
        return Ok((Some(task), state));
    }
    match tasks::latest_task(tx, session_id)? {
        Some(_) => Ok((None, TaskState::Complete)),
        None => Ok((None, TaskState::Idle)),
    }
}

fn record_transition(
    tx: &Transaction,
    session: &SessionRecord,
    task_id: i64,
    from: TaskState,
    to: TaskState,
    event: &SessionEvent,
    confidence: f32,
    applied: &mut Applied,
) -> StoreResult<()> {
    let completed_at = (to == TaskState::Complete).then(|| event.ts);
    let changed = tasks::set_state(tx, task_id, to, completed_at)?;
    if changed == 0 {
        return Ok(());
    }

    events::append(
        tx,
        &NewEvent::new("state_transition")
            .project(session.project_id)
            .session(session.id)
            .task(task_id)
            .payload(serde_json::json!({
                "from": from.as_str(),
                "to": to.as_str(),
                "trigger": event.trigger.as_str(),
                "confidence": confidence,
                "provenance": event.provenance.as_str(),
            })),
        Utc::now(),
    )?;

    applied.transitions.push((from, to));
    applied.state = to;
    if to == TaskState::Complete {
        applied.completed_task = Some(task_id);
    }
    Ok(())
}

/// Create a turn unless its content hash already exists in the task.
/// A duplicate found by the transcript path upgrades the stored
/// timestamp metadata instead (first writer wins).
fn create_turn(
    tx: &Transaction,
    task_id: i64,
    actor: Actor,
    intent: Intent,
    event: &SessionEvent,
    text: &str,
    answers_turn_id: Option<i64>,
) -> StoreResult<(i64, bool)> {
    let hash = content_hash(text);
    if let Some(existing) = turns::find_by_hash(tx, task_id, &hash)? {
        if event.ts_source == hs_domain::session_event::TsSource::Jsonl {
            turns::upgrade_ts(tx, existing.id, event.ts)?;
        }
        return Ok((existing.id, true));
    }

    let turn = turns::insert(
        tx,
        &turns::NewTurn {
            task_id,
            actor,
            intent,
            text: text.to_owned(),
            ts: event.ts,
            ts_source: event.ts_source,
            content_hash: hash,
            answers_turn_id,
        },
    )?;
    Ok((turn.id, false))
}

fn reject(event: &SessionEvent, state: TaskState, applied: &mut Applied) {
    tracing::warn!(
        session_id = event.session_id,
        trigger = event.trigger.as_str(),
        state = state.as_str(),
        provenance = event.provenance.as_str(),
        "invalid transition, dropping event"
    );
    applied.rejected = true;
    applied.state = state;
}

/// Apply one canonical event. Must run inside the caller's transaction
/// and under the session's lock.
pub fn apply(
    tx: &Transaction,
    event: &SessionEvent,
    detector: &IntentDetector,
) -> StoreResult<Applied> {
    let session = sessions::get_by_id(tx, event.session_id)?
        .ok_or_else(|| StoreError::NotFound(format!("session {}", event.session_id)))?;

    let mut applied = Applied {
        session_id: session.id,
        project_id: session.project_id,
        ..Default::default()
    };

    let (open, state) = derive_state(tx, session.id)?;
    applied.state = state;
    if let Some(task) = &open {
        applied.task_id = Some(task.id);
    }

    sessions::touch(tx, session.id, event.ts)?;

    match event.trigger {
        Trigger::UserCmd => apply_user_cmd(tx, &session, open, state, event, &mut applied)?,
        Trigger::AgentQuestion => {
            apply_agent_question(tx, &session, open, state, event, &mut applied)?
        }
        Trigger::AgentProgress => {
            apply_agent_progress(tx, &session, open, state, event, &mut applied)?
        }
        Trigger::AgentCompletion => {
            apply_agent_completion(tx, &session, open, state, event, detector, &mut applied)?
        }
        Trigger::AttentionRequest => {
            apply_attention(tx, &session, open, state, event, &mut applied)?
        }
        Trigger::Stop => apply_stop(tx, &session, open, state, event, detector, &mut applied)?,
        Trigger::SessionEnd => apply_session_end(tx, &session, open, event, &mut applied)?,
    }

    Ok(applied)
}

fn apply_user_cmd(
    tx: &Transaction,
    session: &SessionRecord,
    open: Option<TaskRecord>,
    state: TaskState,
    event: &SessionEvent,
    applied: &mut Applied,
) -> StoreResult<()> {
    let text = event.text.as_deref().unwrap_or_default();

    match (open, state) {
        (Some(task), TaskState::AwaitingInput) => {
            // An explicitly asserted command abandons the pending
            // question and opens a fresh task.
            if event.intent == Some(Intent::Command) {
                record_transition(
                    tx,
                    session,
                    task.id,
                    TaskState::AwaitingInput,
                    TaskState::Complete,
                    event,
                    1.0,
                    applied,
                )?;
                open_new_task(tx, session, TaskState::Complete, event, text, applied)?;
                return Ok(());
            }

            // Otherwise a user turn here is the answer; it continues the
            // task and never opens a new one.
            let question = turns::latest_question(tx, task.id)?;
            let (turn_id, duplicate) = create_turn(
                tx,
                task.id,
                Actor::User,
                Intent::Answer,
                event,
                text,
                question.map(|q| q.id),
            )?;
            applied.turn_id = Some(turn_id);
            applied.duplicate = duplicate;
            if !duplicate {
                record_transition(
                    tx,
                    session,
                    task.id,
                    TaskState::AwaitingInput,
                    TaskState::Processing,
                    event,
                    1.0,
                    applied,
                )?;
            }
        }
        (Some(task), TaskState::Commanded) => {
            let (turn_id, duplicate) =
                create_turn(tx, task.id, Actor::User, Intent::Command, event, text, None)?;
            applied.turn_id = Some(turn_id);
            applied.duplicate = duplicate;
            record_transition(
                tx,
                session,
                task.id,
                TaskState::Commanded,
                TaskState::Processing,
                event,
                1.0,
                applied,
            )?;
        }
        (Some(task), TaskState::Processing) => {
            // Re-delivery of the command that opened this task is a no-op.
            if turns::find_by_hash(tx, task.id, &content_hash(text))?.is_some() {
                applied.duplicate = true;
                return Ok(());
            }
            // A fresh command supersedes the running task.
            record_transition(
                tx,
                session,
                task.id,
                TaskState::Processing,
                TaskState::Complete,
                event,
                1.0,
                applied,
            )?;
            open_new_task(tx, session, TaskState::Complete, event, text, applied)?;
        }
        (_, TaskState::Idle) | (_, TaskState::Complete) => {
            open_new_task(tx, session, state, event, text, applied)?;
        }
        (None, _) | (Some(_), _) => reject(event, state, applied),
    }
    Ok(())
}

fn open_new_task(
    tx: &Transaction,
    session: &SessionRecord,
    from: TaskState,
    event: &SessionEvent,
    text: &str,
    applied: &mut Applied,
) -> StoreResult<()> {
    let task = tasks::insert(tx, session.id, Some(text), event.ts)?;
    applied.task_id = Some(task.id);
    applied.new_task = true;
    applied.state = TaskState::Commanded;

    events::append(
        tx,
        &NewEvent::new("state_transition")
            .project(session.project_id)
            .session(session.id)
            .task(task.id)
            .payload(serde_json::json!({
                "from": from.as_str(),
                "to": TaskState::Commanded.as_str(),
                "trigger": event.trigger.as_str(),
                "confidence": 1.0,
                "provenance": event.provenance.as_str(),
            })),
        Utc::now(),
    )?;
    applied.transitions.push((from, TaskState::Commanded));

    let (turn_id, _) =
        create_turn(tx, task.id, Actor::User, Intent::Command, event, text, None)?;
    applied.turn_id = Some(turn_id);

    record_transition(
        tx,
        session,
        task.id,
        TaskState::Commanded,
        TaskState::Processing,
        event,
        1.0,
        applied,
    )?;
    Ok(())
}

fn apply_agent_question(
    tx: &Transaction,
    session: &SessionRecord,
    open: Option<TaskRecord>,
    state: TaskState,
    event: &SessionEvent,
    applied: &mut Applied,
) -> StoreResult<()> {
    let Some(task) = open else {
        reject(event, state, applied);
        return Ok(());
    };

    if let Some(text) = event.text.as_deref() {
        let (turn_id, duplicate) =
            create_turn(tx, task.id, Actor::Agent, Intent::Question, event, text, None)?;
        applied.turn_id = Some(turn_id);
        applied.duplicate = duplicate;
    }

    if matches!(state, TaskState::Commanded | TaskState::Processing) {
        record_transition(
            tx,
            session,
            task.id,
            state,
            TaskState::AwaitingInput,
            event,
            0.9,
            applied,
        )?;
    }
    Ok(())
}

fn apply_agent_progress(
    tx: &Transaction,
    session: &SessionRecord,
    open: Option<TaskRecord>,
    state: TaskState,
    event: &SessionEvent,
    applied: &mut Applied,
) -> StoreResult<()> {
    let Some(task) = open else {
        reject(event, state, applied);
        return Ok(());
    };

    if let Some(text) = event.text.as_deref() {
        if !text.trim().is_empty() {
            let (turn_id, duplicate) =
                create_turn(tx, task.id, Actor::Agent, Intent::Progress, event, text, None)?;
            applied.turn_id = Some(turn_id);
            applied.duplicate = duplicate;
        }
    }

    if state == TaskState::Commanded {
        record_transition(
            tx,
            session,
            task.id,
            state,
            TaskState::Processing,
            event,
            1.0,
            applied,
        )?;
    }
    Ok(())
}

fn apply_agent_completion(
    tx: &Transaction,
    session: &SessionRecord,
    open: Option<TaskRecord>,
    state: TaskState,
    event: &SessionEvent,
    detector: &IntentDetector,
    applied: &mut Applied,
) -> StoreResult<()> {
    let Some(task) = open else {
        reject(event, state, applied);
        return Ok(());
    };

    if let Some(text) = event.text.as_deref() {
        let (_, confidence) = detector.classify(text);
        let (turn_id, duplicate) =
            create_turn(tx, task.id, Actor::Agent, Intent::Completion, event, text, None)?;
        applied.turn_id = Some(turn_id);
        applied.duplicate = duplicate;
        tasks::set_final_text(tx, task.id, text)?;
        record_transition(
            tx,
            session,
            task.id,
            state,
            TaskState::Complete,
            event,
            confidence,
            applied,
        )?;
    } else {
        record_transition(
            tx,
            session,
            task.id,
            state,
            TaskState::Complete,
            event,
            1.0,
            applied,
        )?;
    }
    Ok(())
}

fn apply_attention(
    tx: &Transaction,
    session: &SessionRecord,
    open: Option<TaskRecord>,
    state: TaskState,
    event: &SessionEvent,
    applied: &mut Applied,
) -> StoreResult<()> {
    // Attention requests outside an active turn are ignorable noise.
    let Some(task) = open else {
        return Ok(());
    };

    if matches!(state, TaskState::Commanded | TaskState::Processing) {
        if let Some(text) = event.text.as_deref() {
            if !text.trim().is_empty() {
                let (turn_id, duplicate) =
                    create_turn(tx, task.id, Actor::Agent, Intent::Question, event, text, None)?;
                applied.turn_id = Some(turn_id);
                applied.duplicate = duplicate;
            }
        }
        record_transition(
            tx,
            session,
            task.id,
            state,
            TaskState::AwaitingInput,
            event,
            1.0,
            applied,
        )?;
    }
    Ok(())
}

fn apply_stop(
    tx: &Transaction,
    session: &SessionRecord,
    open: Option<TaskRecord>,
    state: TaskState,
    event: &SessionEvent,
    detector: &IntentDetector,
    applied: &mut Applied,
) -> StoreResult<()> {
    // Stop with no active task (late or repeated delivery) is a no-op.
    let Some(task) = open else {
        return Ok(());
    };

    let text = event.text.as_deref().unwrap_or_default();

    // A trailing question routes the stop to awaiting-input instead of
    // closing the task.
    if !text.is_empty() && detector.is_question(text) {
        let (turn_id, duplicate) =
            create_turn(tx, task.id, Actor::Agent, Intent::Question, event, text, None)?;
        applied.turn_id = Some(turn_id);
        applied.duplicate = duplicate;
        if matches!(state, TaskState::Commanded | TaskState::Processing) {
            record_transition(
                tx,
                session,
                task.id,
                state,
                TaskState::AwaitingInput,
                event,
                0.9,
                applied,
            )?;
        }
        return Ok(());
    }

    if !text.is_empty() {
        let (agent_intent, confidence) = detector.classify(text);
        let intent = match agent_intent {
            AgentIntent::Completion => Intent::Completion,
            _ => Intent::EndOfTask,
        };
        let (turn_id, duplicate) =
            create_turn(tx, task.id, Actor::Agent, intent, event, text, None)?;
        applied.turn_id = Some(turn_id);
        applied.duplicate = duplicate;
        tasks::set_final_text(tx, task.id, text)?;
        record_transition(
            tx,
            session,
            task.id,
            state,
            TaskState::Complete,
            event,
            confidence,
            applied,
        )?;
    } else {
        record_transition(
            tx,
            session,
            task.id,
            state,
            TaskState::Complete,
            event,
            1.0,
            applied,
        )?;
    }
    Ok(())
}

fn apply_session_end(
    tx: &Transaction,
    session: &SessionRecord,
    open: Option<TaskRecord>,
    event: &SessionEvent,
    applied: &mut Applied,
) -> StoreResult<()> {
    if let Some(task) = open {
        record_transition(
            tx,
            session,
            task.id,
            task.state,
            TaskState::Complete,
            event,
            1.0,
            applied,
        )?;
    }
    sessions::mark_ended(tx, session.id, event.ts)?;
    applied.state = TaskState::Complete;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use hs_domain::config::IntentConfig;
    use hs_domain::session_event::{Provenance, TsSource};
    use hs_store::Store;

    use super::*;

    fn setup() -> (Store, i64, IntentDetector) {
        let store = Store::open_in_memory().unwrap();
        let session_id = store
            .with_tx(|tx| {
                let project = hs_store::queries::projects::insert(tx, "/p", "p", Utc::now())?;
                let session = sessions::insert(
                    tx,
                    "aaaaaaaa-0000-0000-0000-000000000000",
                    project.id,
                    Utc::now(),
                    &Default::default(),
                )?;
                Ok(session.id)
            })
            .unwrap();
        let detector = IntentDetector::from_config(&IntentConfig::default()).unwrap();
        (store, session_id, detector)
    }

    fn event(session_id: i64, trigger: Trigger, text: Option<&str>) -> SessionEvent {
        let mut e = SessionEvent::new(session_id, trigger, Provenance::Hook);
        if let Some(text) = text {
            e.text = Some(text.to_owned());
            e.actor = Some(match trigger {
                Trigger::UserCmd => Actor::User,
                _ => Actor::Agent,
            });
        }
        e
    }

    fn run(store: &Store, detector: &IntentDetector, e: &SessionEvent) -> Applied {
        store.with_tx(|tx| apply(tx, e, detector)).unwrap()
    }

    fn transition_events(store: &Store) -> Vec<(String, String)> {
        store
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

    #[test]
    fn idle_command_complete_lifecycle() {
        let (store, sid, detector) = setup();

        let a = run(&store, &detector, &event(sid, Trigger::UserCmd, Some("hello")));
        assert!(a.new_task);
        assert_eq!(a.state, TaskState::Processing);

        let a = run(&store, &detector, &event(sid, Trigger::Stop, Some("done")));
        assert_eq!(a.state, TaskState::Complete);
        assert!(a.completed_task.is_some());

        assert_eq!(
            transition_events(&store),
            vec![
                ("idle".to_owned(), "commanded".to_owned()),
                ("commanded".to_owned(), "processing".to_owned()),
                ("processing".to_owned(), "complete".to_owned()),
            ]
        );

        let turns = store
            .with_conn(|conn| turns::list_by_task(conn, a.completed_task.unwrap()))
            .unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].actor, Actor::User);
        assert_eq!(turns[0].intent, Intent::Command);
        assert_eq!(turns[1].actor, Actor::Agent);
        assert_eq!(turns[1].intent, Intent::Completion);
    }

    #[test]
    fn stop_with_question_routes_to_awaiting_input() {
        let (store, sid, detector) = setup();
        run(&store, &detector, &event(sid, Trigger::UserCmd, Some("what colour?")));
        let a = run(
            &store,
            &detector,
            &event(sid, Trigger::Stop, Some("Red, green, or blue?")),
        );
        assert_eq!(a.state, TaskState::AwaitingInput);
        assert!(a.completed_task.is_none());
    }

    #[test]
    fn answer_while_awaiting_continues_same_task() {
        let (store, sid, detector) = setup();
        run(&store, &detector, &event(sid, Trigger::UserCmd, Some("choose")));
        run(
            &store,
            &detector,
            &event(sid, Trigger::AgentQuestion, Some("Which one?")),
        );

        let a = run(&store, &detector, &event(sid, Trigger::UserCmd, Some("green")));
        assert!(!a.new_task);
        assert_eq!(a.state, TaskState::Processing);

        let turns = store
            .with_conn(|conn| turns::list_by_task(conn, a.task_id.unwrap()))
            .unwrap();
        let answer = turns.iter().find(|t| t.intent == Intent::Answer).unwrap();
        let question = turns.iter().find(|t| t.intent == Intent::Question).unwrap();
        assert_eq!(answer.answers_turn_id, Some(question.id));
    }

    #[test]
    fn asserted_command_supersedes_awaiting_task() {
        let (store, sid, detector) = setup();
        let first = run(&store, &detector, &event(sid, Trigger::UserCmd, Some("choose")));
        run(
            &store,
            &detector,
            &event(sid, Trigger::AgentQuestion, Some("Which one?")),
        );

        let mut command = event(sid, Trigger::UserCmd, Some("never mind, run the tests"));
        command.intent = Some(Intent::Command);
        let a = run(&store, &detector, &command);

        assert!(a.new_task);
        assert_eq!(a.state, TaskState::Processing);
        assert_ne!(a.task_id, first.task_id);
        // The abandoned task closed with its own transition.
        assert_eq!(a.completed_task, first.task_id);

        let turns = store
            .with_conn(|conn| turns::list_by_task(conn, a.task_id.unwrap()))
            .unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].intent, Intent::Command);
        assert_eq!(
            store.with_conn(|conn| tasks::count_open(conn)).unwrap(),
            1
        );
    }

    #[test]
    fn command_while_processing_closes_and_opens() {
        let (store, sid, detector) = setup();
        let first = run(&store, &detector, &event(sid, Trigger::UserCmd, Some("one")));
        let second = run(&store, &detector, &event(sid, Trigger::UserCmd, Some("two")));

        assert!(second.new_task);
        assert_ne!(first.task_id, second.task_id);
        assert_eq!(second.completed_task, first.task_id);
        assert_eq!(second.state, TaskState::Processing);
    }

    #[test]
    fn duplicate_command_is_a_noop() {
        let (store, sid, detector) = setup();
        let first = run(&store, &detector, &event(sid, Trigger::UserCmd, Some("same")));
        let replay = run(&store, &detector, &event(sid, Trigger::UserCmd, Some("same")));

        assert!(replay.duplicate);
        assert!(!replay.new_task);
        assert_eq!(replay.task_id, first.task_id);
        assert_eq!(transition_events(&store).len(), 2);
    }

    #[test]
    fn agent_triggers_rejected_when_idle() {
        let (store, sid, detector) = setup();
        for trigger in [
            Trigger::AgentQuestion,
            Trigger::AgentProgress,
            Trigger::AgentCompletion,
        ] {
            let a = run(&store, &detector, &event(sid, trigger, Some("text?")));
            assert!(a.rejected, "{trigger:?} should be rejected from idle");
        }
        assert!(transition_events(&store).is_empty());
    }

    #[test]
    fn stop_without_open_task_is_silent_noop() {
        let (store, sid, detector) = setup();
        let a = run(&store, &detector, &event(sid, Trigger::Stop, Some("done")));
        assert!(!a.rejected);
        assert!(a.transitions.is_empty());
        assert!(transition_events(&store).is_empty());
    }

    #[test]
    fn progress_keeps_processing_and_records_turn() {
        let (store, sid, detector) = setup();
        run(&store, &detector, &event(sid, Trigger::UserCmd, Some("go")));
        let a = run(
            &store,
            &detector,
            &event(sid, Trigger::AgentProgress, Some("reading files")),
        );
        assert_eq!(a.state, TaskState::Processing);
        assert!(a.turn_id.is_some());
        assert!(a.transitions.is_empty());
    }

    #[test]
    fn attention_moves_processing_to_awaiting() {
        let (store, sid, detector) = setup();
        run(&store, &detector, &event(sid, Trigger::UserCmd, Some("go")));
        let a = run(
            &store,
            &detector,
            &event(sid, Trigger::AttentionRequest, Some("needs permission to edit")),
        );
        assert_eq!(a.state, TaskState::AwaitingInput);

        // Second attention while already awaiting: no change.
        let a = run(
            &store,
            &detector,
            &event(sid, Trigger::AttentionRequest, Some("still waiting")),
        );
        assert!(a.transitions.is_empty());
    }

    #[test]
    fn session_end_closes_open_task() {
        let (store, sid, detector) = setup();
        run(&store, &detector, &event(sid, Trigger::UserCmd, Some("go")));
        let a = run(&store, &detector, &event(sid, Trigger::SessionEnd, None));
        assert!(a.completed_task.is_some());

        let session = store
            .with_conn(|conn| sessions::get_by_id(conn, sid))
            .unwrap()
            .unwrap();
        assert!(session.ended_at.is_some());
        assert_eq!(
            store.with_conn(|conn| tasks::count_open(conn)).unwrap(),
            0
        );
    }

    #[test]
    fn transcript_duplicate_upgrades_timestamp_source() {
        let (store, sid, detector) = setup();
        run(&store, &detector, &event(sid, Trigger::UserCmd, Some("go")));
        let first = run(
            &store,
            &detector,
            &event(sid, Trigger::AgentProgress, Some("half way")),
        );

        let jsonl_ts = Utc::now();
        let mut replay = event(sid, Trigger::AgentProgress, Some("half way"));
        replay.ts = jsonl_ts;
        replay.ts_source = TsSource::Jsonl;
        replay.provenance = Provenance::Transcript;
        let a = run(&store, &detector, &replay);

        assert!(a.duplicate);
        assert_eq!(a.turn_id, first.turn_id);

        let turns = store
            .with_conn(|conn| turns::list_by_task(conn, a.task_id.unwrap()))
            .unwrap();
        let progress = turns.iter().find(|t| t.intent == Intent::Progress).unwrap();
        assert_eq!(progress.ts_source, TsSource::Jsonl);
        assert_eq!(progress.ts.timestamp_micros(), jsonl_ts.timestamp_micros());
    }
}
