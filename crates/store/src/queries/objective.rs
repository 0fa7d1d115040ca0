use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::records::{ts_from_sql, ts_to_sql, ObjectiveRecord};

pub fn get(conn: &Connection) -> Result<Option<ObjectiveRecord>> {
    conn.query_row(
        "SELECT text, updated_at FROM objective WHERE id = 1",
        [],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
    )
    .optional()?
    .map(|(text, updated_at)| {
        Ok(ObjectiveRecord {
            text,
            updated_at: ts_from_sql(&updated_at)?,
        })
    })
    .transpose()
}

/// Replace the singleton objective, pushing the previous value into the
/// append-only history.
pub fn set(conn: &Connection, text: &str, now: DateTime<Utc>) -> Result<()> {
    if let Some(previous) = get(conn)? {
        conn.execute(
            "INSERT INTO objective_history (text, replaced_at) VALUES (?1, ?2)",
            params![previous.text, ts_to_sql(now)],
        )?;
    }
    conn.execute(
        "INSERT INTO objective (id, text, updated_at) VALUES (1, ?1, ?2) \
         ON CONFLICT(id) DO UPDATE SET text = ?1, updated_at = ?2",
        params![text, ts_to_sql(now)],
    )?;
    Ok(())
}

pub fn history(conn: &Connection, limit: usize) -> Result<Vec<(String, DateTime<Utc>)>> {
    let mut stmt = conn.prepare(
        "SELECT text, replaced_at FROM objective_history ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit as i64], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    rows.map(|r| {
        let (text, ts) = r?;
        Ok((text, ts_from_sql(&ts)?))
    })
    .collect()
}
