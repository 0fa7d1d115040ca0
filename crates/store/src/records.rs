//! Typed row records. Cross references between entities are integer ids
//! only; navigation goes back through the store.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use hs_domain::session_event::{Actor, Intent, TaskState, TsSource};

use crate::error::Error;

/// Timestamps are stored as fixed-width RFC 3339 UTC strings, so
/// lexicographic ordering in SQL matches chronological ordering.
pub fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn ts_from_sql(raw: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Database(format!("bad timestamp {raw:?}: {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub external_id: String,
    pub project_id: i64,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub pane_id: Option<String>,
    pub tmux_session: Option<String>,
    pub persona_slug: Option<String>,
    pub predecessor_id: Option<i64>,
    pub transcript_path: Option<String>,
}

impl SessionRecord {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    pub session_id: i64,
    pub state: TaskState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub command_text: Option<String>,
    pub final_text: Option<String>,
    pub instruction: Option<String>,
    pub completion_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: i64,
    pub task_id: i64,
    pub actor: Actor,
    pub intent: Intent,
    pub text: String,
    pub ts: DateTime<Utc>,
    pub ts_source: TsSource,
    pub content_hash: String,
    pub answers_turn_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub event_type: String,
    pub project_id: Option<i64>,
    pub session_id: Option<i64>,
    pub task_id: Option<i64>,
    pub turn_id: Option<i64>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for the append-only event log.
#[derive(Debug, Clone, Default)]
pub struct NewEvent {
    pub event_type: String,
    pub project_id: Option<i64>,
    pub session_id: Option<i64>,
    pub task_id: Option<i64>,
    pub turn_id: Option<i64>,
    pub payload: serde_json::Value,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: serde_json::Value::Object(Default::default()),
            ..Default::default()
        }
    }

    pub fn session(mut self, session_id: i64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn project(mut self, project_id: i64) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn task(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn turn(mut self, turn_id: i64) -> Self {
        self.turn_id = Some(turn_id);
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveRecord {
    pub text: String,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_timestamps_sort_lexicographically() {
        let early = ts_to_sql("2026-08-01T10:00:00.000001Z".parse().unwrap());
        let late = ts_to_sql("2026-08-01T10:00:00.000002Z".parse().unwrap());
        assert!(early < late);
        assert_eq!(early.len(), late.len());
    }

    #[test]
    fn ts_round_trip() {
        let now = Utc::now();
        let back = ts_from_sql(&ts_to_sql(now)).unwrap();
        assert_eq!(now.timestamp_micros(), back.timestamp_micros());
    }
}
