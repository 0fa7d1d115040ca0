//! Intent detection for agent text.
//!
//! Language-neutral, case-insensitive, regex-family matching against the
//! trimmed tail of a message. The pattern sets are configurable; the
//! defaults below are the ones that route a `stop` to awaiting-input:
//!
//! - a trailing `?`
//! - a tail beginning with one of the configured question openings
//!   (`which`, `should i`, `do you want`, `would you like`,
//!   `can you confirm`, `please choose`, `let me know`)
//!
//! Completion phrases (`done`, `completed`, `finished`,
//! `ready for review`, `implemented`, `all set`) mark a completion turn.
//! Anything ambiguous is progress.

use hs_domain::config::IntentConfig;
use hs_domain::{Error, Result};
use regex::{Regex, RegexSet};

/// Classified agent intent plus a rough confidence, carried into the
/// state-transition event payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AgentIntent {
    Question,
    Completion,
    Progress,
}

pub struct IntentDetector {
    question_openings: RegexSet,
    completion: RegexSet,
    trailing_question: Regex,
}

impl IntentDetector {
    pub fn from_config(config: &IntentConfig) -> Result<Self> {
        let openings: Vec<String> = config
            .question_openings
            .iter()
            .map(|p| format!(r"(?i)^\s*{}\b", regex::escape(p)))
            .collect();
        let completions: Vec<String> = config
            .completion_phrases
            .iter()
            .map(|p| format!(r"(?i)\b{}\b", regex::escape(p)))
            .collect();

        Ok(Self {
            question_openings: RegexSet::new(&openings)
                .map_err(|e| Error::Config(format!("intent.question_openings: {e}")))?,
            completion: RegexSet::new(&completions)
                .map_err(|e| Error::Config(format!("intent.completion_phrases: {e}")))?,
            trailing_question: Regex::new(r"\?\s*$")
                .map_err(|e| Error::Config(format!("intent: {e}")))?,
        })
    }

    /// The last non-empty line of a message — questions and completion
    /// markers live at the tail, not in the body.
    fn tail(text: &str) -> &str {
        text.trim()
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
            .trim()
    }

    pub fn is_question(&self, text: &str) -> bool {
        let tail = Self::tail(text);
        !tail.is_empty()
            && (self.trailing_question.is_match(tail)
                || self.question_openings.is_match(tail))
    }

    pub fn classify(&self, text: &str) -> (AgentIntent, f32) {
        let tail = Self::tail(text);
        if tail.is_empty() {
            return (AgentIntent::Progress, 0.0);
        }
        if self.trailing_question.is_match(tail) {
            return (AgentIntent::Question, 0.95);
        }
        if self.question_openings.is_match(tail) {
            return (AgentIntent::Question, 0.7);
        }
        if self.completion.is_match(tail) {
            return (AgentIntent::Completion, 0.8);
        }
        (AgentIntent::Progress, 0.5)
    }
}
