use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::records::{ts_from_sql, ts_to_sql, ProjectRecord};

fn map_row(row: &Row) -> rusqlite::Result<(i64, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn to_record(raw: (i64, String, String, String)) -> Result<ProjectRecord> {
    Ok(ProjectRecord {
        id: raw.0,
        path: raw.1,
        name: raw.2,
        created_at: ts_from_sql(&raw.3)?,
    })
}

const COLS: &str = "id, path, name, created_at";

pub fn insert(
    conn: &Connection,
    path: &str,
    name: &str,
    now: DateTime<Utc>,
) -> Result<ProjectRecord> {
    conn.execute(
        "INSERT INTO projects (path, name, created_at) VALUES (?1, ?2, ?3)",
        params![path, name, ts_to_sql(now)],
    )?;
    Ok(ProjectRecord {
        id: conn.last_insert_rowid(),
        path: path.to_owned(),
        name: name.to_owned(),
        created_at: now,
    })
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<ProjectRecord>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM projects WHERE id = ?1"),
        [id],
        map_row,
    )
    .optional()?
    .map(to_record)
    .transpose()
}

pub fn get_by_path(conn: &Connection, path: &str) -> Result<Option<ProjectRecord>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM projects WHERE path = ?1"),
        [path],
        map_row,
    )
    .optional()?
    .map(to_record)
    .transpose()
}

pub fn list(conn: &Connection) -> Result<Vec<ProjectRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLS} FROM projects ORDER BY path"))?;
    let rows = stmt.query_map([], map_row)?;
    rows.map(|r| to_record(r?)).collect()
}

/// Find the project owning `cwd`: the registered path that equals `cwd`
/// or is its closest (longest) ancestor on a path-component boundary.
pub fn find_owning(conn: &Connection, cwd: &str) -> Result<Option<ProjectRecord>> {
    let cwd = cwd.trim_end_matches('/');
    let mut best: Option<ProjectRecord> = None;
    for project in list(conn)? {
        let root = project.path.trim_end_matches('/');
        let owns = cwd == root
            || (cwd.starts_with(root) && cwd.as_bytes().get(root.len()) == Some(&b'/'));
        if owns && best.as_ref().map_or(true, |b| root.len() > b.path.len()) {
            best = Some(project);
        }
    }
    Ok(best)
}

pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
    let n = conn.execute("DELETE FROM projects WHERE id = ?1", [id])?;
    Ok(n > 0)
}
