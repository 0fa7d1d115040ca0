//! The seam between send verification and the real terminal.

use async_trait::async_trait;

use hs_domain::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Escape,
}

impl Key {
    pub fn as_tmux_arg(&self) -> &'static str {
        match self {
            Key::Enter => "Enter",
            Key::Escape => "Escape",
        }
    }
}

/// Access to a terminal multiplexer pane. One implementation shells out
/// to tmux; tests substitute a scripted fake.
#[async_trait]
pub trait PaneDriver: Send + Sync {
    /// Capture the last `rows` rendered rows. `with_ansi` keeps escape
    /// sequences so callers can detect attribute markers.
    async fn capture(&self, pane: &str, rows: u32, with_ansi: bool) -> Result<String>;

    /// Type text literally — never interpreted as a shell string.
    async fn send_literal(&self, pane: &str, text: &str) -> Result<()>;

    async fn send_key(&self, pane: &str, key: Key) -> Result<()>;

    /// Whether the pane still exists and renders.
    async fn is_alive(&self, pane: &str) -> bool;
}
