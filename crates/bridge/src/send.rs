//! Send-text delivery and acceptance verification.
//!
//! The agent's rich-text input line needs time to ingest pasted text and
//! may pop an autocomplete ghost-text overlay; both interfere with
//! submission. Delivery therefore types literally, waits proportionally
//! to the text length, dismisses ghost overlays, submits Enter, and then
//! verifies the input line actually cleared before reporting success.

use std::time::Duration;

use hs_domain::config::BridgeConfig;
use hs_domain::{Error, Result};

use crate::pane::{Key, PaneDriver};

/// Text at or above this length is verified by snippet lookup; shorter
/// text falls back to before/after pane comparison.
const SNIPPET_THRESHOLD: usize = 40;
const SNIPPET_MIN: usize = 15;
const SNIPPET_MAX: usize = 60;

/// Rows from the bottom of the pane treated as the input area.
const INPUT_ROWS: u32 = 10;
/// Rows inspected for ghost-text attribute markers.
const GHOST_ROWS: usize = 5;

/// Settle time between Enter and the verification capture.
const VERIFY_SETTLE: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub attempts: u32,
    pub ghost_dismissals: u32,
}

/// Delay before Enter: `base + max(0, len - 200) / 10` milliseconds.
pub fn enter_delay(text_len: usize, base_ms: u64) -> Duration {
    let proportional = (text_len.saturating_sub(200) / 10) as u64;
    Duration::from_millis(base_ms + proportional)
}

/// Verification snippet: the tail of the sent text, clamped to
/// [`SNIPPET_MIN`]..=[`SNIPPET_MAX`] characters.
pub fn verification_snippet(text: &str) -> String {
    let chars: Vec<char> = text.trim().chars().collect();
    let take = chars.len().clamp(SNIPPET_MIN, SNIPPET_MAX).min(chars.len());
    chars[chars.len() - take..].iter().collect()
}

/// Strip all whitespace so substring lookup survives pane line wrapping.
fn squash(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Detect an autocomplete ghost overlay: a dim SGR attribute (parameter 2)
/// on any of the last rendered rows.
pub fn has_ghost_text(ansi_capture: &str) -> bool {
    let tail_rows = ansi_capture
        .lines()
        .rev()
        .take(GHOST_ROWS)
        .collect::<Vec<_>>();

    for row in tail_rows {
        let mut rest = row;
        while let Some(start) = rest.find("\x1b[") {
            let body = &rest[start + 2..];
            let Some(end) = body.find(|c: char| c.is_ascii_alphabetic()) else {
                break;
            };
            if body[end..].starts_with('m')
                && body[..end].split(';').any(|param| param == "2")
            {
                return true;
            }
            rest = &body[end + 1..];
        }
    }
    false
}

async fn dismiss_ghost(
    driver: &dyn PaneDriver,
    pane: &str,
    rows: u32,
    dismissals: &mut u32,
) -> Result<()> {
    let capture = driver.capture(pane, rows, true).await?;
    if has_ghost_text(&capture) {
        driver.send_key(pane, Key::Escape).await?;
        *dismissals += 1;
    }
    Ok(())
}

/// Deliver `text` into `pane` and verify the input line accepted it.
///
/// Fails with `pane_unavailable` when the pane is dead and `send_failed`
/// when every verification attempt still shows the text in the buffer.
pub async fn send_text(
    driver: &dyn PaneDriver,
    pane: &str,
    text: &str,
    config: &BridgeConfig,
) -> Result<SendOutcome> {
    if !driver.is_alive(pane).await {
        return Err(Error::PaneUnavailable(format!("pane {pane} is not alive")));
    }

    let mut ghost_dismissals = 0;

    dismiss_ghost(driver, pane, config.capture_rows, &mut ghost_dismissals).await?;

    driver.send_literal(pane, text).await?;
    tokio::time::sleep(enter_delay(
        text.chars().count(),
        config.base_enter_delay_ms,
    ))
    .await;

    // Typed content can itself trigger a fresh autocomplete overlay.
    dismiss_ghost(driver, pane, config.capture_rows, &mut ghost_dismissals).await?;

    let use_snippet = text.chars().count() >= SNIPPET_THRESHOLD;
    let snippet = squash(&verification_snippet(text));
    let before = driver.capture(pane, INPUT_ROWS, false).await?;

    let mut last_capture = String::new();
    for attempt in 1..=config.max_send_retries {
        driver.send_key(pane, Key::Enter).await?;
        tokio::time::sleep(VERIFY_SETTLE).await;

        let after = driver.capture(pane, INPUT_ROWS, false).await?;
        let accepted = if use_snippet {
            // Input cleared: the tail of what we typed is gone.
            !squash(&after).contains(&snippet)
        } else {
            after != before
        };
        if accepted {
            tracing::debug!(pane, attempt, ghost_dismissals, "send verified");
            return Ok(SendOutcome {
                attempts: attempt,
                ghost_dismissals,
            });
        }

        tracing::warn!(pane, attempt, "text still in input buffer after Enter");
        last_capture = after;
        if attempt < config.max_send_retries {
            dismiss_ghost(driver, pane, config.capture_rows, &mut ghost_dismissals).await?;
        }
    }

    tracing::error!(
        pane,
        attempts = config.max_send_retries,
        pane_dump = %last_capture,
        "send not verified, giving up"
    );
    Err(Error::SendFailed(format!(
        "text not accepted by pane {pane} after {} attempts",
        config.max_send_retries
    )))
}
