use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub intent: IntentConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Sanity-check the configuration. Errors prevent startup; warnings
    /// are logged and ignored.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.broadcast.buffer_size == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "broadcast.buffer_size must be > 0".into(),
            });
        }
        if self.broadcast.max_subscribers == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "broadcast.max_subscribers must be > 0".into(),
            });
        }
        if self.bridge.max_send_retries == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "bridge.max_send_retries must be > 0".into(),
            });
        }
        if self.watcher.fast_poll_secs >= self.watcher.reconcile_interval_secs {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "watcher.fast_poll_secs >= watcher.reconcile_interval_secs — \
                          fast polling will never be faster than reconciliation"
                    .into(),
            });
        }
        if self.server.host != "127.0.0.1" && self.server.host != "localhost" {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "server.host = {} — binding beyond loopback without an API token \
                     exposes hook and respond endpoints",
                    self.server.host
                ),
            });
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_5055")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Env var holding the API bearer token. Unset/empty = local dev mode.
    #[serde(default = "d_token_env")]
    pub api_token_env: String,
    #[serde(default = "d_256")]
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5055,
            host: "127.0.0.1".into(),
            api_token_env: d_token_env(),
            max_concurrent_requests: 256,
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Database
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "d_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: d_db_path() }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript watcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Reconciliation poll cadence while hook events are flowing.
    #[serde(default = "d_60")]
    pub reconcile_interval_secs: u64,
    /// Poll cadence once hooks have gone silent (primary capture path).
    #[serde(default = "d_2")]
    pub fast_poll_secs: u64,
    /// Hook silence threshold that switches to fast polling.
    #[serde(default = "d_300")]
    pub hook_silence_secs: u64,
    /// No transcript line for this long emits `session_inactive`.
    #[serde(default = "d_600")]
    pub idle_window_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: 60,
            fast_poll_secs: 2,
            hook_silence_secs: 300,
            idle_window_secs: 600,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Terminal input bridge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Base delay before Enter is submitted. The total delay grows with
    /// text length: `base + max(0, len - 200) / 10` milliseconds.
    #[serde(default = "d_300")]
    pub base_enter_delay_ms: u64,
    #[serde(default = "d_3u")]
    pub max_send_retries: u32,
    /// Rows captured from the bottom of the pane for verification.
    #[serde(default = "d_40")]
    pub capture_rows: u32,
    /// How long a launcher-registered session stays claimable by pane
    /// handle (correlation strategy 4).
    #[serde(default = "d_30")]
    pub claim_window_secs: u64,
    /// Subprocess timeout for each tmux invocation.
    #[serde(default = "d_5000")]
    pub tmux_timeout_ms: u64,
    /// Availability probe cadence.
    #[serde(default = "d_10")]
    pub probe_interval_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_enter_delay_ms: 300,
            max_send_retries: 3,
            capture_rows: 40,
            claim_window_secs: 30,
            tmux_timeout_ms: 5_000,
            probe_interval_secs: 10,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Broadcast fabric
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Bounded per-subscriber buffer. Overflow drops the oldest event and
    /// inserts a `dropped` marker.
    #[serde(default = "d_100")]
    pub buffer_size: usize,
    #[serde(default = "d_30")]
    pub heartbeat_secs: u64,
    #[serde(default = "d_64")]
    pub max_subscribers: usize,
    /// Global replay ring serving Last-Event-ID reconnects.
    #[serde(default = "d_1024")]
    pub replay_capacity: usize,
    /// A subscriber failing writes for this long is unregistered.
    #[serde(default = "d_60")]
    pub write_grace_secs: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            heartbeat_secs: 30,
            max_subscribers: 64,
            replay_capacity: 1024,
            write_grace_secs: 60,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Intent detection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentConfig {
    /// Question openings matched (case-insensitive) against the trimmed
    /// tail of agent text. A trailing `?` always counts as a question.
    #[serde(default = "d_question_openings")]
    pub question_openings: Vec<String>,
    /// Completion phrases matched against the trimmed tail of agent text.
    #[serde(default = "d_completion_phrases")]
    pub completion_phrases: Vec<String>,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            question_openings: d_question_openings(),
            completion_phrases: d_completion_phrases(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inference collaborator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Aggregator endpoint. `None` disables inference entirely; the core
    /// runs without derived summaries.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "d_inference_token_env")]
    pub api_key_env: String,
    #[serde(default = "d_8000")]
    pub timeout_ms: u64,
    #[serde(default = "d_3u")]
    pub max_retries: u32,
    /// Per-purpose minimum interval between calls.
    #[serde(default = "d_500")]
    pub min_interval_ms: u64,
    #[serde(default = "d_256")]
    pub cache_capacity: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: d_inference_token_env(),
            timeout_ms: 8_000,
            max_retries: 3,
            min_interval_ms: 500,
            cache_capacity: 256,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background workers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Idle-session sweep cadence.
    #[serde(default = "d_60")]
    pub reaper_interval_secs: u64,
    /// Sessions unseen for this long are marked ended by the reaper.
    #[serde(default = "d_3600")]
    pub session_idle_secs: u64,
    /// Stale-subscriber prune cadence.
    #[serde(default = "d_30")]
    pub janitor_interval_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            reaper_interval_secs: 60,
            session_idle_secs: 3_600,
            janitor_interval_secs: 30,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_5055() -> u16 {
    5055
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_token_env() -> String {
    "HEADSPACE_API_TOKEN".into()
}
fn d_inference_token_env() -> String {
    "HEADSPACE_INFERENCE_KEY".into()
}
fn d_db_path() -> PathBuf {
    PathBuf::from("data/headspace.db")
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
fn d_question_openings() -> Vec<String> {
    [
        "which",
        "should i",
        "do you want",
        "would you like",
        "can you confirm",
        "please choose",
        "let me know",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn d_completion_phrases() -> Vec<String> {
    [
        "done",
        "completed",
        "finished",
        "ready for review",
        "implemented",
        "all set",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn d_2() -> u64 {
    2
}
fn d_3u() -> u32 {
    3
}
fn d_10() -> u64 {
    10
}
fn d_30() -> u64 {
    30
}
fn d_40() -> u32 {
    40
}
fn d_60() -> u64 {
    60
}
fn d_100() -> usize {
    100
}
fn d_64() -> usize {
    64
}
fn d_256() -> usize {
    256
}
fn d_300() -> u64 {
    300
}
fn d_500() -> u64 {
    500
}
fn d_600() -> u64 {
    600
}
fn d_1024() -> usize {
    1024
}
fn d_3600() -> u64 {
    3_600
}
fn d_5000() -> u64 {
    5_000
}
fn d_8000() -> u64 {
    8_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 5055);
        assert_eq!(config.broadcast.buffer_size, 100);
        assert_eq!(config.watcher.hook_silence_secs, 300);
        assert_eq!(config.bridge.max_send_retries, 3);
        assert!(config.inference.base_url.is_none());
        assert!(config.validate().iter().all(|i| i.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [broadcast]
            buffer_size = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.broadcast.buffer_size, 10);
        assert_eq!(config.broadcast.heartbeat_secs, 30);
    }

    #[test]
    fn zero_buffer_is_a_hard_error() {
        let config: Config = toml::from_str("[broadcast]\nbuffer_size = 0\n").unwrap();
        assert!(config
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }
}
