//! Message store: message records and per-recipient delivery status.
//!
//! Status entries live in their own table keyed `(message_id, recipient_id)`,
//! so the `sent → seen` transition is a single conditional UPDATE — atomic,
//! idempotent, and unable to move backward.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use futures::future;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    DeliveryState, DeliveryStatus, MarkSeen, Message, MessageContent, MessagePage,
    MessageSortField, SortOrder,
};
use crate::relay::{LiveEvent, LiveRelay, StatusChange};
use crate::store::conversations::ConversationStore;
use crate::store::db::{fmt_ts, parse_ts};
use crate::store::{map_insert_err, require};

const COLUMNS: &str =
    "message_id, conversation_id, sender_id, recipient_ids, content, timestamp";

type MessageRow = (String, String, String, String, String, String);

/// Owns message records. Validates the owning conversation against the
/// conversation store at creation time and mirrors new messages onto the
/// live relay.
pub struct MessageStore {
    pool: SqlitePool,
    conversations: Arc<ConversationStore>,
    relay: Arc<LiveRelay>,
}

impl MessageStore {
    pub fn new(
        pool: SqlitePool,
        conversations: Arc<ConversationStore>,
        relay: Arc<LiveRelay>,
    ) -> Self {
        Self {
            pool,
            conversations,
            relay,
        }
    }

    /// Create a message with one status entry per recipient and hand it to
    /// the relay for fan-out. `origin` names the sender's relay session; it
    /// is skipped during fan-out while the sender's other sessions still
    /// receive the event.
    pub async fn create(
        &self,
        message_id: &str,
        conversation_id: &str,
        sender_id: &str,
        recipient_ids: Vec<String>,
        content: MessageContent,
        initial_status: Vec<DeliveryStatus>,
        origin: Option<Uuid>,
    ) -> Result<Message> {
        require("messageID", message_id)?;
        require("conversationID", conversation_id)?;
        require("senderID", sender_id)?;
        require("content", &content.original_content)?;
        if recipient_ids.is_empty() {
            return Err(Error::InvalidArgument("recipientIDs must be filled".into()));
        }
        validate_status_entries(&recipient_ids, &initial_status)?;

        if !self.conversations.exists(conversation_id).await? {
            return Err(Error::NotFound(format!("conversation {conversation_id}")));
        }

        let message = Message {
            message_id: message_id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            recipient_ids,
            content,
            timestamp: Utc::now(),
            status: initial_status,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO messages \
             (message_id, conversation_id, sender_id, recipient_ids, content, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.message_id)
        .bind(&message.conversation_id)
        .bind(&message.sender_id)
        .bind(serde_json::to_string(&message.recipient_ids)?)
        .bind(serde_json::to_string(&message.content)?)
        .bind(fmt_ts(message.timestamp))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_insert_err(e, message_id))?;

        for entry in &message.status {
            sqlx::query(
                "INSERT INTO message_status (message_id, recipient_id, state) VALUES (?, ?, ?)",
            )
            .bind(&message.message_id)
            .bind(&entry.recipient_id)
            .bind(entry.state.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!("[Messages] Created {message_id} in {conversation_id}");
        self.relay
            .publish(&LiveEvent::Message(message.clone()), origin);

        Ok(message)
    }

    /// One page of the conversation's messages plus the total count.
    /// Defaults: newest first by timestamp.
    pub async fn list(
        &self,
        conversation_id: &str,
        limit: i64,
        offset: i64,
        sort_field: Option<MessageSortField>,
        sort_order: Option<SortOrder>,
    ) -> Result<MessagePage> {
        if limit <= 0 {
            return Err(Error::InvalidArgument("limit must be positive".into()));
        }
        if offset < 0 {
            return Err(Error::InvalidArgument("offset must not be negative".into()));
        }

        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM messages WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await?;

        let field = sort_field.unwrap_or_default();
        let order = sort_order.unwrap_or_default();
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM messages WHERE conversation_id = ? \
             ORDER BY {} {} LIMIT ? OFFSET ?",
            field.column(),
            order.keyword(),
        ))
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            messages.push(self.hydrate(row).await?);
        }

        Ok(MessagePage {
            messages,
            total: total as u64,
        })
    }

    /// Messages in the conversation the recipient has not yet seen.
    pub async fn unread_for_recipient(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT m.{} FROM messages m \
             JOIN message_status s ON s.message_id = m.message_id \
             WHERE m.conversation_id = ? AND s.recipient_id = ? AND s.state = 'sent' \
             ORDER BY m.timestamp ASC",
            COLUMNS.replace(", ", ", m."),
        ))
        .bind(conversation_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            messages.push(self.hydrate(row).await?);
        }
        Ok(messages)
    }

    /// Transition every `sent` entry for `user_id` in the conversation to
    /// `seen`. Per-message updates run concurrently (independent keys); the
    /// call waits for all of them and reports failures instead of dropping
    /// them. Idempotent: a second invocation is a no-op. `origin` names the
    /// acknowledging relay session, excluded from the status fan-out.
    pub async fn mark_seen(
        &self,
        conversation_id: &str,
        user_id: &str,
        origin: Option<Uuid>,
    ) -> Result<MarkSeen> {
        let ids: Vec<(String,)> =
            sqlx::query_as("SELECT message_id FROM messages WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_all(&self.pool)
                .await?;

        let updates = ids.into_iter().map(|(message_id,)| {
            let pool = self.pool.clone();
            let user = user_id.to_string();
            async move {
                let result = sqlx::query(
                    "UPDATE message_status SET state = 'seen' \
                     WHERE message_id = ? AND recipient_id = ? AND state = 'sent'",
                )
                .bind(&message_id)
                .bind(&user)
                .execute(&pool)
                .await;
                (message_id, result)
            }
        });

        let mut updated_ids = Vec::new();
        let mut failed = Vec::new();
        for (message_id, result) in future::join_all(updates).await {
            match result {
                Ok(done) if done.rows_affected() > 0 => updated_ids.push(message_id),
                Ok(_) => {} // already seen, or not addressed to this user
                Err(e) => {
                    warn!("[Messages] mark_seen failed for {message_id}: {e}");
                    failed.push(message_id);
                }
            }
        }

        let mut updated = Vec::with_capacity(updated_ids.len());
        for message_id in &updated_ids {
            if let Some(message) = self.find(message_id).await? {
                updated.push(message);
            }
        }

        if !updated_ids.is_empty() {
            info!(
                "[Messages] {user_id} saw {} message(s) in {conversation_id}",
                updated_ids.len()
            );
            self.relay.publish(
                &LiveEvent::Status(StatusChange {
                    conversation_id: conversation_id.to_string(),
                    recipient_id: user_id.to_string(),
                    message_ids: updated_ids,
                }),
                origin,
            );
        }

        Ok(MarkSeen { updated, failed })
    }

    /// The most recent message by timestamp, or `None` for an empty
    /// conversation.
    pub async fn last_message(&self, conversation_id: &str) -> Result<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM messages WHERE conversation_id = ? \
             ORDER BY timestamp DESC LIMIT 1"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    /// Status entries of the most recent message; empty when the conversation
    /// has no messages.
    pub async fn last_message_status(&self, conversation_id: &str) -> Result<Vec<DeliveryStatus>> {
        Ok(self
            .last_message(conversation_id)
            .await?
            .map(|m| m.status)
            .unwrap_or_default())
    }

    /// Remove every message (and status entry) of a conversation. Returns the
    /// number of messages deleted; zero is not an error.
    pub async fn delete_all(&self, conversation_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM message_status WHERE message_id IN \
             (SELECT message_id FROM messages WHERE conversation_id = ?)",
        )
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        info!("[Messages] Deleted {deleted} message(s) for {conversation_id}");
        Ok(deleted)
    }

    async fn find(&self, message_id: &str) -> Result<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM messages WHERE message_id = ?"
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn hydrate(&self, row: MessageRow) -> Result<Message> {
        let (message_id, conversation_id, sender_id, recipient_ids, content, timestamp) = row;

        let status_rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT recipient_id, state FROM message_status WHERE message_id = ? ORDER BY rowid",
        )
        .bind(&message_id)
        .fetch_all(&self.pool)
        .await?;

        let mut status = Vec::with_capacity(status_rows.len());
        for (recipient_id, state) in status_rows {
            status.push(DeliveryStatus {
                recipient_id,
                state: DeliveryState::parse(&state).ok_or_else(|| {
                    Error::Unavailable(format!("corrupt delivery state {state:?}"))
                })?,
            });
        }

        Ok(Message {
            message_id,
            conversation_id,
            sender_id,
            recipient_ids: serde_json::from_str(&recipient_ids)?,
            content: serde_json::from_str(&content)?,
            timestamp: parse_ts(&timestamp)?,
            status,
        })
    }
}

/// Exactly one status entry per distinct recipient.
fn validate_status_entries(recipients: &[String], status: &[DeliveryStatus]) -> Result<()> {
    let wanted: BTreeSet<&str> = recipients.iter().map(String::as_str).collect();
    let mut seen = BTreeSet::new();
    for entry in status {
        if !wanted.contains(entry.recipient_id.as_str()) {
            return Err(Error::InvalidArgument(format!(
                "status entry for non-recipient {}",
                entry.recipient_id
            )));
        }
        if !seen.insert(entry.recipient_id.as_str()) {
            return Err(Error::InvalidArgument(format!(
                "duplicate status entry for {}",
                entry.recipient_id
            )));
        }
    }
    if seen.len() != wanted.len() {
        return Err(Error::InvalidArgument(
            "one status entry required per recipient".into(),
        ));
    }
    Ok(())
}
