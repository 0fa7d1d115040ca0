//! Tmux subprocess driver.

use std::time::Duration;

use async_trait::async_trait;

use hs_domain::{Error, Result};

use crate::pane::{Key, PaneDriver};

pub struct TmuxDriver {
    timeout: Duration,
}

impl TmuxDriver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        let command = tokio::process::Command::new("tmux").args(args).output();
        match tokio::time::timeout(self.timeout, command).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(Error::PaneUnavailable(format!("failed to run tmux: {e}"))),
            Err(_) => Err(Error::PaneUnavailable(format!(
                "tmux {} timed out after {:?}",
                args.first().unwrap_or(&""),
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl PaneDriver for TmuxDriver {
    async fn capture(&self, pane: &str, rows: u32, with_ansi: bool) -> Result<String> {
        let start = format!("-{rows}");
        let mut args = vec!["capture-pane", "-t", pane, "-p", "-S", start.as_str()];
        if with_ansi {
            args.push("-e");
        }
        let output = self.run(&args).await?;
        if !output.status.success() {
            return Err(Error::PaneUnavailable(format!("pane not found: {pane}")));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn send_literal(&self, pane: &str, text: &str) -> Result<()> {
        // -l sends the text verbatim; -- stops option parsing so text
        // starting with a dash is not eaten by tmux.
        let output = self
            .run(&["send-keys", "-t", pane, "-l", "--", text])
            .await?;
        if !output.status.success() {
            return Err(Error::PaneUnavailable(format!(
                "send-keys failed for pane {pane}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn send_key(&self, pane: &str, key: Key) -> Result<()> {
        let output = self
            .run(&["send-keys", "-t", pane, key.as_tmux_arg()])
            .await?;
        if !output.status.success() {
            return Err(Error::PaneUnavailable(format!(
                "send-keys {} failed for pane {pane}",
                key.as_tmux_arg()
            )));
        }
        Ok(())
    }

    async fn is_alive(&self, pane: &str) -> bool {
        match self
            .run(&["display-message", "-p", "-t", pane, "#{pane_id}"])
            .await
        {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }
}
