//! SQLite persistence for Headspace.
//!
//! Typed records, indexed queries, and a transactional unit of work.
//! The database enforces the hard invariants that must never drift:
//! one open task per session, unique turn content hash per task, and
//! nulled event foreign keys on entity deletion.

pub mod db;
pub mod error;
pub mod queries;
pub mod records;
pub mod schema;

pub use db::Store;
pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use hs_domain::hash::content_hash;
    use hs_domain::session_event::{Actor, Intent, TaskState, TsSource};

    use crate::queries::{events, projects, sessions, tasks, turns};
    use crate::records::NewEvent;
    use crate::{Error, Store};

    fn seeded() -> (Store, i64, i64) {
        let store = Store::open_in_memory().unwrap();
        let (project_id, session_id) = store
            .with_tx(|tx| {
                let project = projects::insert(tx, "/home/dev/proj", "proj", Utc::now())?;
                let session = sessions::insert(
                    tx,
                    "11111111-1111-1111-1111-111111111111",
                    project.id,
                    Utc::now(),
                    &Default::default(),
                )?;
                Ok((project.id, session.id))
            })
            .unwrap();
        (store, project_id, session_id)
    }

    #[test]
    fn second_open_task_is_a_conflict() {
        let (store, _, session_id) = seeded();
        store
            .with_tx(|tx| tasks::insert(tx, session_id, Some("first"), Utc::now()).map(|_| ()))
            .unwrap();

        let err = store
            .with_tx(|tx| tasks::insert(tx, session_id, Some("second"), Utc::now()).map(|_| ()))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn open_task_allowed_after_completion() {
        let (store, _, session_id) = seeded();
        store
            .with_tx(|tx| {
                let task = tasks::insert(tx, session_id, Some("first"), Utc::now())?;
                tasks::set_state(tx, task.id, TaskState::Complete, Some(Utc::now()))?;
                tasks::insert(tx, session_id, Some("second"), Utc::now())?;
                Ok(())
            })
            .unwrap();
        let open = store
            .with_conn(|conn| tasks::open_task(conn, session_id))
            .unwrap()
            .unwrap();
        assert_eq!(open.command_text.as_deref(), Some("second"));
    }

    #[test]
    fn duplicate_turn_hash_is_a_conflict() {
        let (store, _, session_id) = seeded();
        let task = store
            .with_tx(|tx| tasks::insert(tx, session_id, Some("go"), Utc::now()))
            .unwrap();

        let turn = turns::NewTurn {
            task_id: task.id,
            actor: Actor::Agent,
            intent: Intent::Completion,
            text: "done".into(),
            ts: Utc::now(),
            ts_source: TsSource::Server,
            content_hash: content_hash("done"),
            answers_turn_id: None,
        };
        store.with_tx(|tx| turns::insert(tx, &turn).map(|_| ())).unwrap();
        let err = store
            .with_tx(|tx| turns::insert(tx, &turn).map(|_| ()))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn project_deletion_cascades_but_keeps_events() {
        let (store, project_id, session_id) = seeded();
        store
            .with_tx(|tx| {
                let task = tasks::insert(tx, session_id, Some("go"), Utc::now())?;
                events::append(
                    tx,
                    &NewEvent::new("state_transition")
                        .project(project_id)
                        .session(session_id)
                        .task(task.id),
                    Utc::now(),
                )?;
                Ok(())
            })
            .unwrap();

        store
            .with_tx(|tx| projects::delete(tx, project_id).map(|_| ()))
            .unwrap();

        store
            .with_conn(|conn| {
                assert!(sessions::get_by_id(conn, session_id)?.is_none());
                assert_eq!(tasks::count_open(conn)?, 0);
                // Audit trail preserved with nulled references.
                let remaining = events::recent(conn, 10)?;
                assert_eq!(remaining.len(), 1);
                assert_eq!(remaining[0].project_id, None);
                assert_eq!(remaining[0].session_id, None);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn owning_project_prefers_closest_prefix() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_tx(|tx| {
                projects::insert(tx, "/home/dev", "dev", Utc::now())?;
                projects::insert(tx, "/home/dev/proj", "proj", Utc::now())?;
                Ok(())
            })
            .unwrap();

        store
            .with_conn(|conn| {
                let owner = projects::find_owning(conn, "/home/dev/proj/src")?.unwrap();
                assert_eq!(owner.name, "proj");
                let owner = projects::find_owning(conn, "/home/dev/other")?.unwrap();
                assert_eq!(owner.name, "dev");
                // Not a component boundary: /home/devother is unowned.
                assert!(projects::find_owning(conn, "/home/devother")?.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn idle_sessions_respect_cutoff() {
        let (store, _, session_id) = seeded();
        let future = Utc::now() + Duration::hours(1);
        let idle = store
            .with_conn(|conn| sessions::idle_since(conn, future))
            .unwrap();
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].id, session_id);

        let past = Utc::now() - Duration::hours(1);
        let idle = store
            .with_conn(|conn| sessions::idle_since(conn, past))
            .unwrap();
        assert!(idle.is_empty());
    }
}
