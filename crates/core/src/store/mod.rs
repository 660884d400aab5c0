//! Store components backed by the shared SQLite database.

pub mod conversations;
pub mod db;
pub mod messages;
pub mod requests;

pub use conversations::ConversationStore;
pub use messages::MessageStore;
pub use requests::RequestWorkflow;

use crate::error::{Error, Result};

/// Reject empty required fields.
pub(crate) fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidArgument(format!("{field} must be filled")));
    }
    Ok(())
}

/// Map a primary-key collision on INSERT to `DuplicateKey`; the explicit
/// existence check races with concurrent creates, the constraint does not.
pub(crate) fn map_insert_err(err: sqlx::Error, key: &str) -> Error {
    if let sqlx::Error::Database(ref db) = err {
        if db.is_unique_violation() {
            return Error::DuplicateKey(key.to_string());
        }
    }
    err.into()
}
