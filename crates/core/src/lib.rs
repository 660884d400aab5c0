//! Parley messaging core.
//!
//! Conversations, messages with per-recipient delivery status, a rename
//! request workflow, and a live fan-out relay. The durable store is the
//! source of truth; the relay is a best-effort acceleration layer that only
//! mirrors committed state. Transport (HTTP routing, request parsing) and
//! authentication live outside this crate and call the typed contracts
//! exposed here.

pub mod config;
pub mod error;
pub mod identity;
pub mod models;
pub mod relay;
pub mod store;

use std::sync::Arc;

use tracing::info;

pub use config::MessagingConfig;
pub use error::{Error, Result};
pub use identity::{IdentityDirectory, StaticDirectory};
pub use models::{
    Conversation, ConversationPatch, ConversationType, DeliveryState, DeliveryStatus, MarkSeen,
    Message, MessageContent, MessagePage, MessageSortField, Profanity, RenameRequest,
    RequestStatus, SortOrder,
};
pub use relay::{LiveEvent, LiveRelay, MembershipChange, RelaySession, StatusChange};
pub use store::{ConversationStore, MessageStore, RequestWorkflow};

/// The wired-up messaging core: the three store components sharing one
/// database, plus the live relay they publish into.
pub struct Messaging {
    pub conversations: Arc<ConversationStore>,
    pub messages: Arc<MessageStore>,
    pub requests: Arc<RequestWorkflow>,
    pub relay: Arc<LiveRelay>,
}

impl Messaging {
    /// Open the database, initialize the schema, and wire the components.
    pub async fn connect(
        config: MessagingConfig,
        identity: Arc<dyn IdentityDirectory>,
    ) -> Result<Self> {
        let pool = store::db::connect(&config).await?;
        let relay = Arc::new(LiveRelay::new(config.relay_queue_depth));

        let conversations = Arc::new(ConversationStore::new(
            pool.clone(),
            identity,
            relay.clone(),
        ));
        let messages = Arc::new(MessageStore::new(
            pool.clone(),
            conversations.clone(),
            relay.clone(),
        ));
        let requests = Arc::new(RequestWorkflow::new(pool, conversations.clone()));

        info!("[Core] Messaging core ready");
        Ok(Self {
            conversations,
            messages,
            requests,
            relay,
        })
    }

    /// Delete a conversation and cascade to its messages. At-least-once: if
    /// the cascade fails after the conversation delete, orphaned messages
    /// remain until a later sweep; the conversation itself is gone either
    /// way. Returns the number of messages removed.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<u64> {
        self.conversations.delete(conversation_id).await?;
        self.messages.delete_all(conversation_id).await
    }
}
