//! Shared error taxonomy used across all Headspace crates.
//!
//! Every failure that crosses a component boundary is one of these kinds.
//! The gateway maps them onto the uniform API body
//! `{code, message, retryable, retry_after?}`.

/// Shared error type used across all Headspace crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed or shape-invalid payload. Not retryable.
    #[error("validation: {0}")]
    Validation(String),

    /// No registered project matches the working directory. The caller
    /// must register the project explicitly; nothing is auto-created.
    #[error("no registered project for path: {0}")]
    UnregisteredProject(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Operation requires a task state the session is not in
    /// (e.g. respond while not awaiting input).
    #[error("wrong state: {0}")]
    WrongState(String),

    /// The session's terminal pane is missing or dead. Retryable once the
    /// availability tracker reports it alive again.
    #[error("pane unavailable: {0}")]
    PaneUnavailable(String),

    /// Text was typed but never verified as accepted by the input line.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The inference collaborator is down. Core state updates proceed
    /// without derived summaries.
    #[error("inference unavailable: {0}")]
    InferenceUnavailable(String),

    /// Idempotency replay or a uniqueness constraint hit. Surfaced to API
    /// callers as "already applied", never as a hard failure.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database: {0}")]
    Database(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable error code for the API body.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::UnregisteredProject(_) => "unregistered_project",
            Error::NotFound(_) => "not_found",
            Error::WrongState(_) => "wrong_state",
            Error::PaneUnavailable(_) => "pane_unavailable",
            Error::SendFailed(_) => "send_failed",
            Error::InferenceUnavailable(_) => "inference_unavailable",
            Error::Conflict(_) => "conflict",
            Error::Database(_) => "server_error",
            Error::Io(_) => "server_error",
            Error::Json(_) => "validation",
            Error::Config(_) => "server_error",
            Error::Other(_) => "server_error",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Error::PaneUnavailable(_)
                | Error::SendFailed(_)
                | Error::InferenceUnavailable(_)
                | Error::Database(_)
                | Error::Io(_)
                | Error::Other(_)
        )
    }

    /// HTTP status the gateway responds with.
    pub fn status(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::Json(_) => 400,
            Error::UnregisteredProject(_) | Error::NotFound(_) => 404,
            Error::WrongState(_) => 409,
            Error::PaneUnavailable(_) | Error::InferenceUnavailable(_) => 503,
            Error::SendFailed(_) => 502,
            // Replays are acknowledged, not failed; the handler answers 200
            // with an "already applied" marker before this mapping is hit.
            Error::Conflict(_) => 200,
            Error::Database(_) | Error::Io(_) | Error::Config(_) | Error::Other(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_statuses_line_up() {
        let e = Error::UnregisteredProject("/tmp/x".into());
        assert_eq!(e.code(), "unregistered_project");
        assert_eq!(e.status(), 404);
        assert!(!e.retryable());

        let e = Error::SendFailed("snippet still visible".into());
        assert_eq!(e.status(), 502);
        assert!(e.retryable());

        let e = Error::WrongState("task is processing".into());
        assert_eq!(e.status(), 409);
        assert!(!e.retryable());
    }
}
