//! Identity Directory seam.
//!
//! The directory that maps a user id to a display name lives outside the
//! messaging core; the core only consumes it for the best-effort title
//! rewrite when a participant leaves a conversation.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

/// Resolves an opaque user id to a human-readable display name.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn resolve_display_name(&self, user_id: &str) -> Result<String>;
}

/// Map-backed directory for fixed rosters and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    names: HashMap<String, String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>, name: impl Into<String>) -> Self {
        self.names.insert(user_id.into(), name.into());
        self
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn resolve_display_name(&self, user_id: &str) -> Result<String> {
        self.names
            .get(user_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown user: {user_id}"))
    }
}
