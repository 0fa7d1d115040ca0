use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::records::{ts_from_sql, ts_to_sql, SessionRecord};

const COLS: &str = "id, external_id, project_id, started_at, last_seen_at, ended_at, \
                    pane_id, tmux_session, persona_slug, predecessor_id, transcript_path";

type RawSession = (
    i64,
    String,
    i64,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<i64>,
    Option<String>,
);

fn map_row(row: &Row) -> rusqlite::Result<RawSession> {
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
        row.get(9)?,
        row.get(10)?,
    ))
}

fn to_record(raw: RawSession) -> Result<SessionRecord> {
    Ok(SessionRecord {
        id: raw.0,
        external_id: raw.1,
        project_id: raw.2,
        started_at: ts_from_sql(&raw.3)?,
        last_seen_at: ts_from_sql(&raw.4)?,
        ended_at: raw.5.as_deref().map(ts_from_sql).transpose()?,
        pane_id: raw.6,
        tmux_session: raw.7,
        persona_slug: raw.8,
        predecessor_id: raw.9,
        transcript_path: raw.10,
    })
}

/// Optional correlation attributes carried by hooks and the launcher.
#[derive(Debug, Clone, Default)]
pub struct SessionAttrs {
    pub pane_id: Option<String>,
    pub tmux_session: Option<String>,
    pub persona_slug: Option<String>,
    pub predecessor_id: Option<i64>,
    pub transcript_path: Option<String>,
}

pub fn insert(
    conn: &Connection,
    external_id: &str,
    project_id: i64,
    now: DateTime<Utc>,
    attrs: &SessionAttrs,
) -> Result<SessionRecord> {
    conn.execute(
        "INSERT INTO sessions (external_id, project_id, started_at, last_seen_at, \
         pane_id, tmux_session, persona_slug, predecessor_id, transcript_path) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            external_id,
            project_id,
            ts_to_sql(now),
            ts_to_sql(now),
            attrs.pane_id,
            attrs.tmux_session,
            attrs.persona_slug,
            attrs.predecessor_id,
            attrs.transcript_path,
        ],
    )?;
    Ok(SessionRecord {
        id: conn.last_insert_rowid(),
        external_id: external_id.to_owned(),
        project_id,
        started_at: now,
        last_seen_at: now,
        ended_at: None,
        pane_id: attrs.pane_id.clone(),
        tmux_session: attrs.tmux_session.clone(),
        persona_slug: attrs.persona_slug.clone(),
        predecessor_id: attrs.predecessor_id,
        transcript_path: attrs.transcript_path.clone(),
    })
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<SessionRecord>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM sessions WHERE id = ?1"),
        [id],
        map_row,
    )
    .optional()?
    .map(to_record)
    .transpose()
}

/// The latest session row carrying this external id. Restarted agents
/// reuse their id, so one external id can span several rows over time;
/// the newest row is the canonical one.
pub fn get_by_external_id(conn: &Connection, external_id: &str) -> Result<Option<SessionRecord>> {
    conn.query_row(
        &format!(
            "SELECT {COLS} FROM sessions WHERE external_id = ?1 \
             ORDER BY id DESC LIMIT 1"
        ),
        [external_id],
        map_row,
    )
    .optional()?
    .map(to_record)
    .transpose()
}

/// Like [`get_by_external_id`], restricted to sessions still running.
pub fn get_active_by_external_id(
    conn: &Connection,
    external_id: &str,
) -> Result<Option<SessionRecord>> {
    conn.query_row(
        &format!(
            "SELECT {COLS} FROM sessions \
             WHERE external_id = ?1 AND ended_at IS NULL \
             ORDER BY id DESC LIMIT 1"
        ),
        [external_id],
        map_row,
    )
    .optional()?
    .map(to_record)
    .transpose()
}

/// Most recently seen active session of a project, if any.
pub fn latest_active_by_project(
    conn: &Connection,
    project_id: i64,
) -> Result<Option<SessionRecord>> {
    conn.query_row(
        &format!(
            "SELECT {COLS} FROM sessions \
             WHERE project_id = ?1 AND ended_at IS NULL \
             ORDER BY last_seen_at DESC LIMIT 1"
        ),
        [project_id],
        map_row,
    )
    .optional()?
    .map(to_record)
    .transpose()
}

/// Launcher-registered session claimable by pane handle: active, matching
/// pane, registered no earlier than `since`.
pub fn claimable_by_pane(
    conn: &Connection,
    pane_id: &str,
    since: DateTime<Utc>,
) -> Result<Option<SessionRecord>> {
    conn.query_row(
        &format!(
            "SELECT {COLS} FROM sessions \
             WHERE pane_id = ?1 AND ended_at IS NULL AND started_at >= ?2 \
             ORDER BY started_at DESC LIMIT 1"
        ),
        params![pane_id, ts_to_sql(since)],
        map_row,
    )
    .optional()?
    .map(to_record)
    .transpose()
}

pub fn list(conn: &Connection, active_only: bool) -> Result<Vec<SessionRecord>> {
    let filter = if active_only {
        "WHERE ended_at IS NULL "
    } else {
        ""
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM sessions {filter}ORDER BY last_seen_at DESC"
    ))?;
    let rows = stmt.query_map([], map_row)?;
    rows.map(|r| to_record(r?)).collect()
}

/// Active sessions unseen since `cutoff` (reaper input).
pub fn idle_since(conn: &Connection, cutoff: DateTime<Utc>) -> Result<Vec<SessionRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM sessions WHERE ended_at IS NULL AND last_seen_at < ?1"
    ))?;
    let rows = stmt.query_map([ts_to_sql(cutoff)], map_row)?;
    rows.map(|r| to_record(r?)).collect()
}

/// Adopt correlation attributes learned after creation. Each column is
/// written once per value: existing non-null values are preserved except
/// the external id, which follows the latest claim.
pub fn adopt_attrs(
    conn: &Connection,
    id: i64,
    external_id: Option<&str>,
    attrs: &SessionAttrs,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE sessions SET \
         external_id = COALESCE(?2, external_id), \
         pane_id = COALESCE(pane_id, ?3), \
         tmux_session = COALESCE(tmux_session, ?4), \
         persona_slug = COALESCE(persona_slug, ?5), \
         predecessor_id = COALESCE(predecessor_id, ?6), \
         transcript_path = COALESCE(?7, transcript_path), \
         last_seen_at = ?8 \
         WHERE id = ?1",
        params![
            id,
            external_id,
            attrs.pane_id,
            attrs.tmux_session,
            attrs.persona_slug,
            attrs.predecessor_id,
            attrs.transcript_path,
            ts_to_sql(now),
        ],
    )?;
    Ok(())
}

pub fn touch(conn: &Connection, id: i64, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE sessions SET last_seen_at = ?2 WHERE id = ?1",
        params![id, ts_to_sql(now)],
    )?;
    Ok(())
}

pub fn mark_ended(conn: &Connection, id: i64, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE sessions SET ended_at = ?2, last_seen_at = ?2 WHERE id = ?1 AND ended_at IS NULL",
        params![id, ts_to_sql(now)],
    )?;
    Ok(())
}

/// Sessions with a transcript path that are still alive (watcher input).
pub fn with_transcripts(conn: &Connection) -> Result<Vec<SessionRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM sessions \
         WHERE ended_at IS NULL AND transcript_path IS NOT NULL"
    ))?;
    let rows = stmt.query_map([], map_row)?;
    rows.map(|r| to_record(r?)).collect()
}
