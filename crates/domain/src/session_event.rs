//! The canonical event shape every capture path converges on.
//!
//! Hooks, transcript tailing, and remote user input all normalise into a
//! [`SessionEvent`] before the state machine sees them. Turns and tasks
//! are modelled as flat enums plus integer identifiers; navigation
//! happens through the store, never through an object graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Actors, intents, task states
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    User,
    Agent,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::User => "user",
            Actor::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Actor::User),
            "agent" => Some(Actor::Agent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Command,
    Answer,
    Question,
    Completion,
    Progress,
    EndOfTask,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Command => "command",
            Intent::Answer => "answer",
            Intent::Question => "question",
            Intent::Completion => "completion",
            Intent::Progress => "progress",
            Intent::EndOfTask => "end_of_task",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "command" => Some(Intent::Command),
            "answer" => Some(Intent::Answer),
            "question" => Some(Intent::Question),
            "completion" => Some(Intent::Completion),
            "progress" => Some(Intent::Progress),
            "end_of_task" => Some(Intent::EndOfTask),
            _ => None,
        }
    }
}

/// Task lifecycle state. A session with no open task reads as `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Idle,
    Commanded,
    Processing,
    AwaitingInput,
    Complete,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Idle => "idle",
            TaskState::Commanded => "commanded",
            TaskState::Processing => "processing",
            TaskState::AwaitingInput => "awaiting_input",
            TaskState::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(TaskState::Idle),
            "commanded" => Some(TaskState::Commanded),
            "processing" => Some(TaskState::Processing),
            "awaiting_input" => Some(TaskState::AwaitingInput),
            "complete" => Some(TaskState::Complete),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, TaskState::Complete | TaskState::Idle)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provenance
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a turn's canonical timestamp came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TsSource {
    /// Assigned by this service at ingest time.
    Server,
    /// Read from the transcript file.
    Jsonl,
    /// Supplied by a remote user via the respond endpoint.
    User,
}

impl TsSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TsSource::Server => "server",
            TsSource::Jsonl => "jsonl",
            TsSource::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "server" => Some(TsSource::Server),
            "jsonl" => Some(TsSource::Jsonl),
            "user" => Some(TsSource::User),
            _ => None,
        }
    }
}

/// Which capture path produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Hook,
    Transcript,
    Respond,
    /// Internally generated (reaper, lifecycle maintenance).
    System,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Hook => "hook",
            Provenance::Transcript => "transcript",
            Provenance::Respond => "respond",
            Provenance::System => "system",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Triggers and the canonical event
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// State-machine trigger. Intent detection happens before dispatch, so the
/// machine itself only ever branches on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    UserCmd,
    AgentQuestion,
    AgentProgress,
    AgentCompletion,
    /// `notification` and `permission_request` hooks.
    AttentionRequest,
    Stop,
    SessionEnd,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::UserCmd => "user_cmd",
            Trigger::AgentQuestion => "agent_question",
            Trigger::AgentProgress => "agent_progress",
            Trigger::AgentCompletion => "agent_completion",
            Trigger::AttentionRequest => "attention_request",
            Trigger::Stop => "stop",
            Trigger::SessionEnd => "session_end",
        }
    }
}

/// The normalised event the state machine consumes. `session_id` is the
/// canonical store row id, already resolved by the correlator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: i64,
    pub trigger: Trigger,
    pub actor: Option<Actor>,
    pub text: Option<String>,
    /// Caller-asserted turn intent. Unset lets the state machine derive
    /// it from the current state; `Command` forces a user turn to open a
    /// fresh task even while the session awaits an answer.
    #[serde(default)]
    pub intent: Option<Intent>,
    pub ts: DateTime<Utc>,
    pub ts_source: TsSource,
    pub provenance: Provenance,
}

impl SessionEvent {
    pub fn new(session_id: i64, trigger: Trigger, provenance: Provenance) -> Self {
        Self {
            session_id,
            trigger,
            actor: None,
            text: None,
            intent: None,
            ts: Utc::now(),
            ts_source: TsSource::Server,
            provenance,
        }
    }

    pub fn with_text(mut self, actor: Actor, text: impl Into<String>) -> Self {
        self.actor = Some(actor);
        self.text = Some(text.into());
        self
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }

    pub fn at(mut self, ts: DateTime<Utc>, source: TsSource) -> Self {
        self.ts = ts;
        self.ts_source = source;
        self
    }
}
