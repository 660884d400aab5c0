//! Messaging core configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the messaging core.
#[derive(Clone, Debug)]
pub struct MessagingConfig {
    /// Path of the SQLite database file (created on demand).
    pub db_path: PathBuf,
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// Bound on waiting for a store connection. Exhaustion surfaces as
    /// `Error::Timeout` rather than hanging the caller.
    pub acquire_timeout: Duration,
    /// Per-session event queue depth for the live relay. A session whose
    /// queue is full misses the event; it is never queued behind it.
    pub relay_queue_depth: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("parley.sqlite"),
            max_connections: 8,
            acquire_timeout: Duration::from_secs(5),
            relay_queue_depth: 64,
        }
    }
}

impl MessagingConfig {
    /// Create a config rooted at a custom base directory.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path: base_dir.into().join("parley.sqlite"),
            ..Self::default()
        }
    }

    /// Ensure the parent directory of the database exists.
    pub async fn ensure_dirs(&self) -> crate::Result<()> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| crate::Error::Unavailable(e.to_string()))?;
            }
        }
        Ok(())
    }
}
