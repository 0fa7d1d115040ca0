use rusqlite::Connection;

use crate::Result;

/// Schema version. Migrations are forward-only and additive; each step
/// brings `PRAGMA user_version` up by one.
pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<()> {
    let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current < 1 {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY,
                path TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY,
                external_id TEXT NOT NULL,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                started_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL,
                ended_at TEXT,
                pane_id TEXT,
                tmux_session TEXT,
                persona_slug TEXT,
                predecessor_id INTEGER REFERENCES sessions(id) ON DELETE SET NULL,
                transcript_path TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_external ON sessions(external_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_last_seen ON sessions(last_seen_at);

            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY,
                session_id INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                state TEXT NOT NULL CHECK (
                    state IN ('commanded', 'processing', 'awaiting_input', 'complete')
                ),
                started_at TEXT NOT NULL,
                completed_at TEXT,
                command_text TEXT,
                final_text TEXT,
                instruction TEXT,
                completion_summary TEXT
            );
            -- Invariant: at most one non-complete task per session.
            CREATE UNIQUE INDEX IF NOT EXISTS one_open_task_per_session
                ON tasks(session_id) WHERE state != 'complete';
            CREATE INDEX IF NOT EXISTS idx_tasks_session_started
                ON tasks(session_id, started_at);

            CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY,
                task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                actor TEXT NOT NULL CHECK (actor IN ('user', 'agent')),
                intent TEXT NOT NULL,
                text TEXT NOT NULL,
                ts TEXT NOT NULL,
                ts_source TEXT NOT NULL CHECK (ts_source IN ('server', 'jsonl', 'user')),
                content_hash TEXT NOT NULL,
                answers_turn_id INTEGER REFERENCES turns(id) ON DELETE SET NULL,
                UNIQUE (task_id, content_hash)
            );
            CREATE INDEX IF NOT EXISTS idx_turns_task_ts ON turns(task_id, ts, id);

            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY,
                event_type TEXT NOT NULL,
                project_id INTEGER REFERENCES projects(id) ON DELETE SET NULL,
                session_id INTEGER REFERENCES sessions(id) ON DELETE SET NULL,
                task_id INTEGER REFERENCES tasks(id) ON DELETE SET NULL,
                turn_id INTEGER REFERENCES turns(id) ON DELETE SET NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_project_ts ON events(project_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_events_type_ts ON events(event_type, created_at);

            CREATE TABLE IF NOT EXISTS objective (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                text TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS objective_history (
                id INTEGER PRIMARY KEY,
                text TEXT NOT NULL,
                replaced_at TEXT NOT NULL
            );

            PRAGMA user_version = 1;
            "#,
        )?;
    }

    Ok(())
}
