//! Error taxonomy for the messaging core.
//!
//! Every store operation returns a typed error to its immediate caller.
//! `Timeout` and `Unavailable` are transient infrastructure failures and safe
//! to retry with backoff; the rest are caller errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A required field is missing or malformed. Not retriable without
    /// correcting the request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unique-identifier collision on create. The caller should pick a new id.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The operation targets a record that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation would violate an invariant (e.g. removing the last
    /// participant of a conversation).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The store did not answer within the configured bound.
    #[error("store timed out")]
    Timeout,

    /// Transient store failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Error::Timeout,
            other => Error::Unavailable(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Unavailable(format!("corrupt stored document: {err}"))
    }
}
