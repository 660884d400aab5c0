//! Record types owned by the messaging core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation between two or more participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    /// Membership set. Order is irrelevant for membership checks but is the
    /// tie-break order for creator reassignment.
    pub participants: Vec<String>,
    pub title: String,
    pub created_by: String,
    pub conversation_type: ConversationType,
    pub created_at: DateTime<Utc>,
    /// Advanced monotonically, never rolled back.
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    Direct,
    Group,
}

impl ConversationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationType::Direct => "direct",
            ConversationType::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(ConversationType::Direct),
            "group" => Some(ConversationType::Group),
            _ => None,
        }
    }
}

/// Partial update for a conversation record. Only fields that are present
/// are written; the update is guarded by the observed participant list so
/// concurrent read-modify-write races lose cleanly.
#[derive(Debug, Default, Clone)]
pub struct ConversationPatch {
    pub title: Option<String>,
    pub participants: Option<Vec<String>>,
    pub created_by: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
}

/// A single chat message with per-recipient delivery status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    /// Fan-out targets fixed at creation time.
    pub recipient_ids: Vec<String>,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
    /// Exactly one entry per distinct recipient.
    pub status: Vec<DeliveryStatus>,
}

/// Message body plus annotations written by external collaborators
/// (translation, moderation). The store persists them verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContent {
    pub original_content: String,
    #[serde(default)]
    pub translated_content: Option<String>,
    #[serde(default)]
    pub profanity: Profanity,
}

impl MessageContent {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            original_content: content.into(),
            translated_content: None,
            profanity: Profanity::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profanity {
    #[serde(default)]
    pub detected: bool,
    #[serde(default)]
    pub censored_content: Option<String>,
}

/// Per-recipient delivery lifecycle entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub recipient_id: String,
    pub state: DeliveryState,
}

impl DeliveryStatus {
    pub fn sent(recipient_id: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            state: DeliveryState::Sent,
        }
    }
}

/// Delivery status state machine: `sent` → `seen`, never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Sent,
    Seen,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Sent => "sent",
            DeliveryState::Seen => "seen",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(DeliveryState::Sent),
            "seen" => Some(DeliveryState::Seen),
            _ => None,
        }
    }
}

/// One page of messages plus the total count matching the filter, for
/// pagination UIs.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub total: u64,
}

/// Sort column for message listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageSortField {
    #[default]
    Timestamp,
    SenderId,
}

impl MessageSortField {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            MessageSortField::Timestamp => "timestamp",
            MessageSortField::SenderId => "sender_id",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    pub(crate) fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

/// Aggregate result of `mark_seen`. Failures are reported, not dropped.
#[derive(Debug, Clone)]
pub struct MarkSeen {
    /// Messages whose entry for the recipient transitioned to `seen`.
    pub updated: Vec<Message>,
    /// Ids of messages whose status update failed.
    pub failed: Vec<String>,
}

/// A pending proposal to change a conversation's title, resolved by the
/// conversation's creator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameRequest {
    pub request_id: String,
    pub conversation_id: String,
    pub requester_id: String,
    pub current_name: String,
    pub new_name: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

/// Rename-request status. Monotonic: once resolved it is immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "approved" => Some(RequestStatus::Approved),
            "rejected" => Some(RequestStatus::Rejected),
            _ => None,
        }
    }
}
