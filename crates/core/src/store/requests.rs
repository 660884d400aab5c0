//! Rename-request workflow.
//!
//! A participant proposes a new conversation title; the conversation's
//! creator resolves the request. Admin visibility is a two-step join through
//! the conversation store, not a stored relation.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{Error, Result};
use crate::models::{RenameRequest, RequestStatus};
use crate::store::conversations::ConversationStore;
use crate::store::db::{fmt_ts, parse_ts};
use crate::store::{map_insert_err, require};

const COLUMNS: &str =
    "request_id, conversation_id, requester_id, current_name, new_name, status, created_at";

type RequestRow = (String, String, String, String, String, String, String);

pub struct RequestWorkflow {
    pool: SqlitePool,
    conversations: Arc<ConversationStore>,
}

impl RequestWorkflow {
    pub fn new(pool: SqlitePool, conversations: Arc<ConversationStore>) -> Self {
        Self {
            pool,
            conversations,
        }
    }

    /// Create a pending rename request.
    pub async fn create(
        &self,
        request_id: &str,
        conversation_id: &str,
        requester_id: &str,
        current_name: &str,
        new_name: &str,
    ) -> Result<RenameRequest> {
        require("requestID", request_id)?;
        require("conversationID", conversation_id)?;
        require("requestersID", requester_id)?;
        require("currentName", current_name)?;
        require("newName", new_name)?;

        let request = RenameRequest {
            request_id: request_id.to_string(),
            conversation_id: conversation_id.to_string(),
            requester_id: requester_id.to_string(),
            current_name: current_name.to_string(),
            new_name: new_name.to_string(),
            status: RequestStatus::Pending,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO rename_requests \
             (request_id, conversation_id, requester_id, current_name, new_name, status, \
              created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.request_id)
        .bind(&request.conversation_id)
        .bind(&request.requester_id)
        .bind(&request.current_name)
        .bind(&request.new_name)
        .bind(request.status.as_str())
        .bind(fmt_ts(request.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, request_id))?;

        info!("[Requests] Created {request_id} for {conversation_id}");
        Ok(request)
    }

    pub async fn get(&self, request_id: &str) -> Result<RenameRequest> {
        let row: Option<RequestRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM rename_requests WHERE request_id = ?"
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(from_row)
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("request {request_id}")))
    }

    /// All requests made by the user.
    pub async fn list_for_requester(&self, user_id: &str) -> Result<Vec<RenameRequest>> {
        let rows: Vec<RequestRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM rename_requests WHERE requester_id = ?"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(from_row).collect()
    }

    /// All requests targeting conversations the user created. Conversations
    /// the user merely participates in do not count.
    pub async fn list_for_admin(&self, user_id: &str) -> Result<Vec<RenameRequest>> {
        let owned = self.conversations.list_created_by(user_id).await?;
        if owned.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; owned.len()].join(", ");
        let sql = format!(
            "SELECT {COLUMNS} FROM rename_requests WHERE conversation_id IN ({placeholders})"
        );
        let mut query = sqlx::query_as(&sql);
        for conversation in &owned {
            query = query.bind(&conversation.conversation_id);
        }

        let rows: Vec<RequestRow> = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Resolve a pending request. Requests are monotonic: once approved or
    /// rejected they are immutable, and nothing moves back to pending.
    pub async fn update_status(
        &self,
        request_id: &str,
        new_status: RequestStatus,
    ) -> Result<RenameRequest> {
        if new_status == RequestStatus::Pending {
            return Err(Error::InvalidArgument(
                "a request cannot be reset to pending".into(),
            ));
        }

        let updated = sqlx::query(
            "UPDATE rename_requests SET status = ? WHERE request_id = ? AND status = 'pending'",
        )
        .bind(new_status.as_str())
        .bind(request_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            // Either the request is missing or already resolved.
            let existing = self.get(request_id).await?;
            return Err(Error::InvalidState(format!(
                "request {request_id} already {}",
                existing.status.as_str()
            )));
        }

        info!("[Requests] {request_id} -> {}", new_status.as_str());
        self.get(request_id).await
    }
}

fn from_row(row: RequestRow) -> Result<RenameRequest> {
    let (request_id, conversation_id, requester_id, current_name, new_name, status, created_at) =
        row;
    Ok(RenameRequest {
        request_id,
        conversation_id,
        requester_id,
        current_name,
        new_name,
        status: RequestStatus::parse(&status)
            .ok_or_else(|| Error::Unavailable(format!("corrupt request status {status:?}")))?,
        created_at: parse_ts(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessagingConfig;
    use crate::identity::StaticDirectory;
    use crate::models::ConversationType;
    use crate::relay::LiveRelay;
    use crate::store::db;
    use tempfile::TempDir;

    async fn workflow() -> (TempDir, Arc<ConversationStore>, RequestWorkflow) {
        let dir = TempDir::new().unwrap();
        let config = MessagingConfig::with_base_dir(dir.path());
        let pool = db::connect(&config).await.unwrap();
        let identity = Arc::new(StaticDirectory::new());
        let relay = Arc::new(LiveRelay::new(8));
        let conversations = Arc::new(ConversationStore::new(
            pool.clone(),
            identity,
            relay,
        ));
        let requests = RequestWorkflow::new(pool, conversations.clone());
        (dir, conversations, requests)
    }

    #[tokio::test]
    async fn duplicate_request_id_rejected() {
        let (_dir, _conversations, requests) = workflow().await;
        requests
            .create("r1", "c1", "b", "Old", "New")
            .await
            .unwrap();
        let err = requests
            .create("r1", "c1", "b", "Old", "Newer")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn admin_sees_only_requests_for_owned_conversations() {
        let (_dir, conversations, requests) = workflow().await;
        // A created c1; A merely participates in c2.
        conversations
            .create("c1", vec!["a".into(), "b".into()], "Alice, Bob", "a", ConversationType::Direct)
            .await
            .unwrap();
        conversations
            .create("c2", vec!["a".into(), "b".into()], "Bob, Alice", "b", ConversationType::Direct)
            .await
            .unwrap();

        requests.create("r1", "c1", "b", "Alice, Bob", "Duo").await.unwrap();
        requests.create("r2", "c2", "a", "Bob, Alice", "Pair").await.unwrap();

        let visible = requests.list_for_admin("a").await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].request_id, "r1");

        let mine = requests.list_for_requester("a").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].request_id, "r2");
    }

    #[tokio::test]
    async fn status_transitions_are_monotonic() {
        let (_dir, _conversations, requests) = workflow().await;
        requests
            .create("r1", "c1", "b", "Old", "New")
            .await
            .unwrap();

        let approved = requests
            .update_status("r1", RequestStatus::Approved)
            .await
            .unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);

        // Resolved requests are immutable.
        let err = requests
            .update_status("r1", RequestStatus::Rejected)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        // Nothing moves back to pending.
        let err = requests
            .update_status("r1", RequestStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = requests
            .update_status("ghost", RequestStatus::Approved)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
