use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use hs_domain::session_event::{Actor, Intent, TsSource};

use crate::error::{Error, Result};
use crate::records::{ts_from_sql, ts_to_sql, TurnRecord};

const COLS: &str = "id, task_id, actor, intent, text, ts, ts_source, content_hash, answers_turn_id";

type RawTurn = (
    i64,
    i64,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<i64>,
);

fn map_row(row: &Row) -> rusqlite::Result<RawTurn> {
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

fn to_record(raw: RawTurn) -> Result<TurnRecord> {
    Ok(TurnRecord {
        id: raw.0,
        task_id: raw.1,
        actor: Actor::parse(&raw.2)
            .ok_or_else(|| Error::Database(format!("unknown actor {:?}", raw.2)))?,
        intent: Intent::parse(&raw.3)
            .ok_or_else(|| Error::Database(format!("unknown intent {:?}", raw.3)))?,
        text: raw.4,
        ts: ts_from_sql(&raw.5)?,
        ts_source: TsSource::parse(&raw.6)
            .ok_or_else(|| Error::Database(format!("unknown ts_source {:?}", raw.6)))?,
        content_hash: raw.7,
        answers_turn_id: raw.8,
    })
}

#[derive(Debug, Clone)]
pub struct NewTurn {
    pub task_id: i64,
    pub actor: Actor,
    pub intent: Intent,
    pub text: String,
    pub ts: DateTime<Utc>,
    pub ts_source: TsSource,
    pub content_hash: String,
    pub answers_turn_id: Option<i64>,
}

/// Insert a turn. The `(task_id, content_hash)` uniqueness constraint
/// turns a duplicate into a conflict the caller handles as dedup.
pub fn insert(conn: &Connection, turn: &NewTurn) -> Result<TurnRecord> {
    conn.execute(
        "INSERT INTO turns (task_id, actor, intent, text, ts, ts_source, content_hash, answers_turn_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            turn.task_id,
            turn.actor.as_str(),
            turn.intent.as_str(),
            turn.text,
            ts_to_sql(turn.ts),
            turn.ts_source.as_str(),
            turn.content_hash,
            turn.answers_turn_id,
        ],
    )?;
    Ok(TurnRecord {
        id: conn.last_insert_rowid(),
        task_id: turn.task_id,
        actor: turn.actor,
        intent: turn.intent,
        text: turn.text.clone(),
        ts: turn.ts,
        ts_source: turn.ts_source,
        content_hash: turn.content_hash.clone(),
        answers_turn_id: turn.answers_turn_id,
    })
}

pub fn find_by_hash(
    conn: &Connection,
    task_id: i64,
    content_hash: &str,
) -> Result<Option<TurnRecord>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM turns WHERE task_id = ?1 AND content_hash = ?2"),
        params![task_id, content_hash],
        map_row,
    )
    .optional()?
    .map(to_record)
    .transpose()
}

/// Transcript reconciliation found the canonical timestamp for a turn the
/// hook path captured first: adopt it and mark the source as `jsonl`.
pub fn upgrade_ts(conn: &Connection, id: i64, ts: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE turns SET ts = ?2, ts_source = 'jsonl' WHERE id = ?1 AND ts_source != 'jsonl'",
        params![id, ts_to_sql(ts)],
    )?;
    Ok(())
}

pub fn list_by_task(conn: &Connection, task_id: i64) -> Result<Vec<TurnRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM turns WHERE task_id = ?1 ORDER BY ts, id"
    ))?;
    let rows = stmt.query_map([task_id], map_row)?;
    rows.map(|r| to_record(r?)).collect()
}

/// The most recent QUESTION turn of a task (answers link back to it).
pub fn latest_question(conn: &Connection, task_id: i64) -> Result<Option<TurnRecord>> {
    conn.query_row(
        &format!(
            "SELECT {COLS} FROM turns WHERE task_id = ?1 AND intent = 'question' \
             ORDER BY ts DESC, id DESC LIMIT 1"
        ),
        [task_id],
        map_row,
    )
    .optional()?
    .map(to_record)
    .transpose()
}

pub fn count_by_task(conn: &Connection, task_id: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM turns WHERE task_id = ?1",
        [task_id],
        |r| r.get(0),
    )?)
}
