//! Store error kinds.
//!
//! Constraint violations are a distinct `Conflict` kind so callers can
//! treat idempotency replays as "already applied" instead of failures.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A uniqueness or check constraint fired (duplicate turn hash,
    /// second open task, replayed insert).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::Conflict(e.to_string())
            }
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound(e.to_string()),
            _ => Error::Database(e.to_string()),
        }
    }
}

impl From<Error> for hs_domain::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Conflict(m) => hs_domain::Error::Conflict(m),
            Error::NotFound(m) => hs_domain::Error::NotFound(m),
            Error::Database(m) => hs_domain::Error::Database(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
