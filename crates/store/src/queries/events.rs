use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::Result;
use crate::records::{ts_from_sql, ts_to_sql, EventRecord, NewEvent};

const COLS: &str = "id, event_type, project_id, session_id, task_id, turn_id, payload, created_at";

type RawEvent = (
    i64,
    String,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    String,
    String,
);

fn map_row(row: &Row) -> rusqlite::Result<RawEvent> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn to_record(raw: RawEvent) -> Result<EventRecord> {
    Ok(EventRecord {
        id: raw.0,
        event_type: raw.1,
        project_id: raw.2,
        session_id: raw.3,
        task_id: raw.4,
        turn_id: raw.5,
        payload: serde_json::from_str(&raw.6).unwrap_or(serde_json::Value::Null),
        created_at: ts_from_sql(&raw.7)?,
    })
}

pub fn append(conn: &Connection, event: &NewEvent, now: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "INSERT INTO events (event_type, project_id, session_id, task_id, turn_id, payload, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_type,
            event.project_id,
            event.session_id,
            event.task_id,
            event.turn_id,
            event.payload.to_string(),
            ts_to_sql(now),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn recent(conn: &Connection, limit: usize) -> Result<Vec<EventRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM events ORDER BY id DESC LIMIT ?1"
    ))?;
    let rows = stmt.query_map([limit as i64], map_row)?;
    rows.map(|r| to_record(r?)).collect()
}

pub fn by_project(
    conn: &Connection,
    project_id: i64,
    limit: usize,
) -> Result<Vec<EventRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM events WHERE project_id = ?1 \
         ORDER BY created_at DESC, id DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![project_id, limit as i64], map_row)?;
    rows.map(|r| to_record(r?)).collect()
}

pub fn by_type(conn: &Connection, event_type: &str, limit: usize) -> Result<Vec<EventRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM events WHERE event_type = ?1 \
         ORDER BY created_at DESC, id DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![event_type, limit as i64], map_row)?;
    rows.map(|r| to_record(r?)).collect()
}

pub fn by_session(
    conn: &Connection,
    session_id: i64,
    limit: usize,
) -> Result<Vec<EventRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM events WHERE session_id = ?1 \
         ORDER BY created_at DESC, id DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![session_id, limit as i64], map_row)?;
    rows.map(|r| to_record(r?)).collect()
}

pub fn count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?)
}
