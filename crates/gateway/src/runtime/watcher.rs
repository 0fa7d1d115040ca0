//! Transcript reconciliation.
//!
//! Each session's agent runtime appends line-delimited JSON to a
//! transcript file. The watcher tails those files with per-session byte
//! cursors and replays new lines through the dispatcher, where content
//! hashing reconciles them with whatever the hook path already captured.
//!
//! Polling cadence is adaptive: while hooks flow, a slow reconciliation
//! sweep is enough; once hooks go silent past the threshold, the
//! transcript becomes the primary capture path and polling tightens.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use hs_domain::broadcast::BroadcastKind;
use hs_domain::config::WatcherConfig;
use hs_domain::session_event::{Actor, Provenance, SessionEvent, Trigger, TsSource};
use hs_store::queries::{events, sessions};
use hs_store::records::NewEvent;
use hs_store::Store;

use super::broadcaster::Broadcaster;
use super::dispatcher::{agent_trigger, Dispatcher};

/// Shared clock of hook liveness, written by the hook receiver and read
/// by the watcher to pick its cadence.
pub struct HookActivity {
    last: Mutex<Instant>,
}

impl Default for HookActivity {
    fn default() -> Self {
        Self::new()
    }
}

impl HookActivity {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    pub fn mark(&self) {
        *self.last.lock() = Instant::now();
    }

    pub fn silent_for_secs(&self) -> u64 {
        self.last.lock().elapsed().as_secs()
    }
}

struct Cursor {
    offset: u64,
    last_line_at: Instant,
    inactive_emitted: bool,
}

pub struct TranscriptWatcher {
    store: Arc<Store>,
    dispatcher: Arc<Dispatcher>,
    broadcaster: Arc<Broadcaster>,
    config: WatcherConfig,
    hook_activity: Arc<HookActivity>,
    cursors: Mutex<HashMap<i64, Cursor>>,
    last_reconcile: Mutex<Option<Instant>>,
}

// One transcript line. Unknown record types are skipped without a parse
// error; genuinely malformed JSON is logged and stepped over.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum TranscriptRecord {
    User(MessageRecord),
    Assistant(MessageRecord),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRecord {
    timestamp: Option<String>,
    message: serde_json::Value,
    #[serde(default)]
    is_meta: bool,
    #[serde(default)]
    is_sidechain: bool,
}

impl TranscriptWatcher {
    pub fn new(
        store: Arc<Store>,
        dispatcher: Arc<Dispatcher>,
        broadcaster: Arc<Broadcaster>,
        config: WatcherConfig,
        hook_activity: Arc<HookActivity>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            broadcaster,
            config,
            hook_activity,
            cursors: Mutex::new(HashMap::new()),
            last_reconcile: Mutex::new(None),
        }
    }

    /// In fast mode every tick scans; in reconcile mode scans are spaced
    /// by the reconciliation interval.
    pub fn fast_mode(&self) -> bool {
        self.hook_activity.silent_for_secs() >= self.config.hook_silence_secs
    }

    fn scan_due(&self) -> bool {
        if self.fast_mode() {
            return true;
        }
        let last = self.last_reconcile.lock();
        match *last {
            Some(at) => at.elapsed().as_secs() >= self.config.reconcile_interval_secs,
            None => true,
        }
    }

    /// One worker tick. The tick interval is the fast-poll period; slow
    /// reconciliation falls out of `scan_due`.
    pub async fn tick(&self) {
        if !self.scan_due() {
            return;
        }
        *self.last_reconcile.lock() = Some(Instant::now());

        let watched = match self.store.with_conn(|conn| sessions::with_transcripts(conn)) {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(error = %e, "watcher could not list sessions");
                return;
            }
        };

        let live_ids: Vec<i64> = watched.iter().map(|s| s.id).collect();
        self.cursors.lock().retain(|id, _| live_ids.contains(id));

        for session in watched {
            let Some(path) = session.transcript_path.clone() else {
                continue;
            };
            if let Err(e) = self.scan_session(session.id, &path).await {
                tracing::warn!(session_id = session.id, path, error = %e, "transcript scan failed");
            }
        }
    }

    async fn scan_session(&self, session_id: i64, path: &str) -> std::io::Result<()> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            // Transcript not written yet; nothing to do.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let offset = {
            let mut cursors = self.cursors.lock();
            match cursors.get(&session_id) {
                Some(cursor) => {
                    // Truncation or rotation: start over from the top.
                    if metadata.len() < cursor.offset {
                        0
                    } else {
                        cursor.offset
                    }
                }
                None => {
                    // First sighting: skip history the hook path already
                    // captured and tail from here on.
                    cursors.insert(
                        session_id,
                        Cursor {
                            offset: metadata.len(),
                            last_line_at: Instant::now(),
                            inactive_emitted: false,
                        },
                    );
                    return Ok(());
                }
            }
        };

        if metadata.len() == offset {
            self.check_inactivity(session_id).await;
            return Ok(());
        }

        let mut file = tokio::fs::File::open(path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity((metadata.len() - offset) as usize);
        file.read_to_end(&mut buf).await?;

        let mut consumed = 0usize;
        while let Some(newline) = buf[consumed..].iter().position(|b| *b == b'\n') {
            let line_end = consumed + newline;
            let line = &buf[consumed..line_end];
            self.ingest_line(session_id, line).await;
            consumed = line_end + 1;

            // Commit the cursor one whole line at a time.
            let mut cursors = self.cursors.lock();
            if let Some(cursor) = cursors.get_mut(&session_id) {
                cursor.offset = offset + consumed as u64;
                cursor.last_line_at = Instant::now();
                cursor.inactive_emitted = false;
            }
        }
        // A trailing partial line stays un-consumed until its newline
        // arrives.
        Ok(())
    }

    async fn ingest_line(&self, session_id: i64, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        if text.trim().is_empty() {
            return;
        }

        let record: TranscriptRecord = match serde_json::from_str(&text) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "malformed transcript line, skipping");
                return;
            }
        };

        let (actor, message) = match record {
            TranscriptRecord::User(m) => (Actor::User, m),
            TranscriptRecord::Assistant(m) => (Actor::Agent, m),
            TranscriptRecord::Unknown => return,
        };
        if message.is_meta || message.is_sidechain {
            return;
        }
        let Some(content) = extract_text(&message.message) else {
            return;
        };
        if content.trim().is_empty() {
            return;
        }

        let ts = message
            .timestamp
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let trigger = match actor {
            Actor::User => Trigger::UserCmd,
            Actor::Agent => agent_trigger(self.dispatcher.detector(), &content),
        };

        let event = SessionEvent::new(session_id, trigger, Provenance::Transcript)
            .with_text(actor, content)
            .at(ts, TsSource::Jsonl);

        if let Err(e) = self.dispatcher.dispatch(event).await {
            tracing::warn!(session_id, error = %e, "transcript event dropped");
        }
    }

    async fn check_inactivity(&self, session_id: i64) {
        let should_emit = {
            let mut cursors = self.cursors.lock();
            match cursors.get_mut(&session_id) {
                Some(cursor)
                    if !cursor.inactive_emitted
                        && cursor.last_line_at.elapsed().as_secs()
                            >= self.config.idle_window_secs =>
                {
                    cursor.inactive_emitted = true;
                    true
                }
                _ => false,
            }
        };
        if !should_emit {
            return;
        }

        let appended = self.store.with_tx(|tx| {
            events::append(
                tx,
                &NewEvent::new("session_inactive").session(session_id),
                Utc::now(),
            )
        });
        if appended.is_ok() {
            self.broadcaster.publish(
                BroadcastKind::SessionInactive,
                None,
                Some(session_id),
                serde_json::json!({ "session_id": session_id }),
            );
        }
    }
}

/// Message text: either a bare string or the text blocks of a content
/// array. Tool invocations and results carry no conversational text.
fn extract_text(message: &serde_json::Value) -> Option<String> {
    match message.get("content") {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Array(blocks)) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        _ => None,
    }
}
