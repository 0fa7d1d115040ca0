use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use hs_domain::session_event::TaskState;

use crate::error::{Error, Result};
use crate::records::{ts_from_sql, ts_to_sql, TaskRecord};

const COLS: &str = "id, session_id, state, started_at, completed_at, \
                    command_text, final_text, instruction, completion_summary";

type RawTask = (
    i64,
    i64,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn map_row(row: &Row) -> rusqlite::Result<RawTask> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn to_record(raw: RawTask) -> Result<TaskRecord> {
    Ok(TaskRecord {
        id: raw.0,
        session_id: raw.1,
        state: TaskState::parse(&raw.2)
            .ok_or_else(|| Error::Database(format!("unknown task state {:?}", raw.2)))?,
        started_at: ts_from_sql(&raw.3)?,
        completed_at: raw.4.as_deref().map(ts_from_sql).transpose()?,
        command_text: raw.5,
        final_text: raw.6,
        instruction: raw.7,
        completion_summary: raw.8,
    })
}

/// Create a task in `commanded` state. The partial unique index rejects a
/// second open task for the same session with a conflict.
pub fn insert(
    conn: &Connection,
    session_id: i64,
    command_text: Option<&str>,
    now: DateTime<Utc>,
) -> Result<TaskRecord> {
    conn.execute(
        "INSERT INTO tasks (session_id, state, started_at, command_text) \
         VALUES (?1, 'commanded', ?2, ?3)",
        params![session_id, ts_to_sql(now), command_text],
    )?;
    Ok(TaskRecord {
        id: conn.last_insert_rowid(),
        session_id,
        state: TaskState::Commanded,
        started_at: now,
        completed_at: None,
        command_text: command_text.map(String::from),
        final_text: None,
        instruction: None,
        completion_summary: None,
    })
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<TaskRecord>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM tasks WHERE id = ?1"),
        [id],
        map_row,
    )
    .optional()?
    .map(to_record)
    .transpose()
}

/// The session's single non-complete task, if one exists.
pub fn open_task(conn: &Connection, session_id: i64) -> Result<Option<TaskRecord>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM tasks WHERE session_id = ?1 AND state != 'complete'"),
        [session_id],
        map_row,
    )
    .optional()?
    .map(to_record)
    .transpose()
}

pub fn latest_task(conn: &Connection, session_id: i64) -> Result<Option<TaskRecord>> {
    conn.query_row(
        &format!(
            "SELECT {COLS} FROM tasks WHERE session_id = ?1 \
             ORDER BY started_at DESC, id DESC LIMIT 1"
        ),
        [session_id],
        map_row,
    )
    .optional()?
    .map(to_record)
    .transpose()
}

pub fn list_by_session(conn: &Connection, session_id: i64) -> Result<Vec<TaskRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM tasks WHERE session_id = ?1 ORDER BY started_at, id"
    ))?;
    let rows = stmt.query_map([session_id], map_row)?;
    rows.map(|r| to_record(r?)).collect()
}

/// Write the state column. Returns the number of rows that actually
/// changed, so the caller can uphold the transition/event pairing.
pub fn set_state(
    conn: &Connection,
    id: i64,
    state: TaskState,
    completed_at: Option<DateTime<Utc>>,
) -> Result<usize> {
    let n = conn.execute(
        "UPDATE tasks SET state = ?2, completed_at = COALESCE(?3, completed_at) \
         WHERE id = ?1 AND state != ?2",
        params![id, state.as_str(), completed_at.map(ts_to_sql)],
    )?;
    Ok(n)
}

pub fn set_final_text(conn: &Connection, id: i64, text: &str) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET final_text = ?2 WHERE id = ?1",
        params![id, text],
    )?;
    Ok(())
}

/// Async inference writes. Idempotent: only fills a still-empty column.
pub fn set_instruction(conn: &Connection, id: i64, text: &str) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET instruction = ?2 WHERE id = ?1 AND instruction IS NULL",
        params![id, text],
    )?;
    Ok(())
}

pub fn set_completion_summary(conn: &Connection, id: i64, text: &str) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET completion_summary = ?2 WHERE id = ?1 AND completion_summary IS NULL",
        params![id, text],
    )?;
    Ok(())
}

pub fn count_open(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE state != 'complete'",
        [],
        |r| r.get(0),
    )?)
}
