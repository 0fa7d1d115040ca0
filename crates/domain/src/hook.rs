//! Typed hook payload schemas.
//!
//! The external agent runtime emits eight lifecycle hook kinds as JSON
//! documents. Each kind has its own schema, validated at the HTTP
//! boundary; downstream components only ever see the normalised
//! [`SessionEvent`](crate::session_event::SessionEvent) shape.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::content_hash;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hook kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    SessionStart,
    SessionEnd,
    Stop,
    Notification,
    PreToolUse,
    PostToolUse,
    UserPromptSubmit,
    PermissionRequest,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::SessionStart => "session_start",
            HookKind::SessionEnd => "session_end",
            HookKind::Stop => "stop",
            HookKind::Notification => "notification",
            HookKind::PreToolUse => "pre_tool_use",
            HookKind::PostToolUse => "post_tool_use",
            HookKind::UserPromptSubmit => "user_prompt_submit",
            HookKind::PermissionRequest => "permission_request",
        }
    }

    /// Parse the `{kind}` path segment of `POST /hook/{kind}`.
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment {
            "session_start" => Some(HookKind::SessionStart),
            "session_end" => Some(HookKind::SessionEnd),
            "stop" => Some(HookKind::Stop),
            "notification" => Some(HookKind::Notification),
            "pre_tool_use" => Some(HookKind::PreToolUse),
            "post_tool_use" => Some(HookKind::PostToolUse),
            "user_prompt_submit" => Some(HookKind::UserPromptSubmit),
            "permission_request" => Some(HookKind::PermissionRequest),
            _ => None,
        }
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Common correlation fields
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fields every hook carries for session correlation. Only `session_id`
/// is mandatory; the rest update the session once per value when present.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Correlation {
    /// Externally supplied session UUID.
    pub session_id: String,
    /// Working directory of the agent process.
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub tmux_session: Option<String>,
    #[serde(default)]
    pub tmux_pane_id: Option<String>,
    #[serde(default)]
    pub persona_slug: Option<String>,
    #[serde(default)]
    pub previous_session_id: Option<String>,
    /// Path to the session's append-only JSONL transcript.
    #[serde(default)]
    pub transcript_path: Option<String>,
    /// Client-supplied idempotency key.
    #[serde(default)]
    pub event_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-kind payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartHook {
    #[serde(flatten)]
    pub correlation: Correlation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEndHook {
    #[serde(flatten)]
    pub correlation: Correlation,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopHook {
    #[serde(flatten)]
    pub correlation: Correlation,
    /// Tail of the agent's final reply for this turn.
    #[serde(default)]
    pub agent_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationHook {
    #[serde(flatten)]
    pub correlation: Correlation,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreToolUseHook {
    #[serde(flatten)]
    pub correlation: Correlation,
    #[serde(default)]
    pub tool_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostToolUseHook {
    #[serde(flatten)]
    pub correlation: Correlation,
    #[serde(default)]
    pub tool_name: Option<String>,
    /// Agent text emitted between tool calls, when the runtime captured any.
    #[serde(default)]
    pub transcript_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPromptSubmitHook {
    #[serde(flatten)]
    pub correlation: Correlation,
    pub prompt_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequestHook {
    #[serde(flatten)]
    pub correlation: Correlation,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tagged union
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub enum HookPayload {
    SessionStart(SessionStartHook),
    SessionEnd(SessionEndHook),
    Stop(StopHook),
    Notification(NotificationHook),
    PreToolUse(PreToolUseHook),
    PostToolUse(PostToolUseHook),
    UserPromptSubmit(UserPromptSubmitHook),
    PermissionRequest(PermissionRequestHook),
}

impl HookPayload {
    /// Validate a raw JSON body against the schema for `kind`.
    pub fn parse(kind: HookKind, body: serde_json::Value) -> Result<Self> {
        fn shape<T: serde::de::DeserializeOwned>(
            kind: HookKind,
            body: serde_json::Value,
        ) -> Result<T> {
            serde_json::from_value(body)
                .map_err(|e| Error::Validation(format!("{kind} payload: {e}")))
        }

        let payload = match kind {
            HookKind::SessionStart => HookPayload::SessionStart(shape(kind, body)?),
            HookKind::SessionEnd => HookPayload::SessionEnd(shape(kind, body)?),
            HookKind::Stop => HookPayload::Stop(shape(kind, body)?),
            HookKind::Notification => HookPayload::Notification(shape(kind, body)?),
            HookKind::PreToolUse => HookPayload::PreToolUse(shape(kind, body)?),
            HookKind::PostToolUse => HookPayload::PostToolUse(shape(kind, body)?),
            HookKind::UserPromptSubmit => HookPayload::UserPromptSubmit(shape(kind, body)?),
            HookKind::PermissionRequest => HookPayload::PermissionRequest(shape(kind, body)?),
        };

        if payload.correlation().session_id.trim().is_empty() {
            return Err(Error::Validation(format!("{kind}: session_id is required")));
        }

        Ok(payload)
    }

    pub fn kind(&self) -> HookKind {
        match self {
            HookPayload::SessionStart(_) => HookKind::SessionStart,
            HookPayload::SessionEnd(_) => HookKind::SessionEnd,
            HookPayload::Stop(_) => HookKind::Stop,
            HookPayload::Notification(_) => HookKind::Notification,
            HookPayload::PreToolUse(_) => HookKind::PreToolUse,
            HookPayload::PostToolUse(_) => HookKind::PostToolUse,
            HookPayload::UserPromptSubmit(_) => HookKind::UserPromptSubmit,
            HookPayload::PermissionRequest(_) => HookKind::PermissionRequest,
        }
    }

    pub fn correlation(&self) -> &Correlation {
        match self {
            HookPayload::SessionStart(h) => &h.correlation,
            HookPayload::SessionEnd(h) => &h.correlation,
            HookPayload::Stop(h) => &h.correlation,
            HookPayload::Notification(h) => &h.correlation,
            HookPayload::PreToolUse(h) => &h.correlation,
            HookPayload::PostToolUse(h) => &h.correlation,
            HookPayload::UserPromptSubmit(h) => &h.correlation,
            HookPayload::PermissionRequest(h) => &h.correlation,
        }
    }

    /// The text content this hook contributes, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            HookPayload::UserPromptSubmit(h) => Some(h.prompt_text.as_str()),
            HookPayload::Stop(h) => h.agent_text.as_deref(),
            HookPayload::PostToolUse(h) => h.transcript_text.as_deref(),
            HookPayload::Notification(h) => h.message.as_deref(),
            HookPayload::PermissionRequest(h) => h.message.as_deref(),
            _ => None,
        }
    }

    /// Idempotency key for re-delivery: `(session, kind, event_id)` when
    /// the client supplied one, otherwise the hash of the carried content.
    /// `None` when the hook carries neither — a bare lifecycle marker is
    /// naturally idempotent in the state machine, and keying it on empty
    /// content would swallow a legitimate restart.
    pub fn dedupe_key(&self) -> Option<String> {
        let correlation = self.correlation();
        let discriminator = match (&correlation.event_id, self.text()) {
            (Some(id), _) => id.clone(),
            (None, Some(text)) => content_hash(text),
            (None, None) => return None,
        };
        Some(format!(
            "{}:{}:{}",
            correlation.session_id,
            self.kind(),
            discriminator
        ))
    }
}
