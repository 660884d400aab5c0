//! Live fan-out relay.
//!
//! A registry of connected client sessions plus a broadcast engine. The relay
//! never originates state: mutations are committed to the stores first, then
//! mirrored here for near-real-time delivery. Delivery is best-effort; a
//! session that misses an event reconciles by querying the stores.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::Message;

/// Event pushed to connected sessions, serialized as tagged JSON text.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum LiveEvent {
    /// A message was created.
    Message(Message),
    /// Delivery status entries transitioned to `seen`.
    Status(StatusChange),
    /// Conversation membership changed.
    Membership(MembershipChange),
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub conversation_id: String,
    pub recipient_id: String,
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MembershipChange {
    pub conversation_id: String,
    pub removed: String,
    pub participants: Vec<String>,
    pub created_by: String,
    pub title: String,
}

/// A registered client session. The transport layer drains `events` into its
/// connection; dropping the session ends delivery.
pub struct RelaySession {
    pub id: Uuid,
    pub user_id: String,
    pub events: mpsc::Receiver<String>,
}

/// Broadcast hub over live client sessions. A user may hold zero or many
/// concurrent sessions.
pub struct LiveRelay {
    sessions: RwLock<HashMap<Uuid, mpsc::Sender<String>>>,
    queue_depth: usize,
}

impl LiveRelay {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Add a session for `user_id` to the active set.
    pub fn register(&self, user_id: &str) -> RelaySession {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = Uuid::new_v4();
        self.sessions.write().insert(id, tx);
        debug!("[Relay] Session {id} registered for {user_id}");
        RelaySession {
            id,
            user_id: user_id.to_string(),
            events: rx,
        }
    }

    /// Remove a session from the active set. Idempotent.
    pub fn unregister(&self, id: Uuid) {
        if self.sessions.write().remove(&id).is_some() {
            debug!("[Relay] Session {id} unregistered");
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Deliver `event` to every registered session except `origin`, the
    /// session whose action produced it. The originating user's other
    /// sessions still receive the event, so a second device stays current.
    /// Best-effort: a full queue is skipped (the event is not queued behind
    /// a slow session) and a closed session is pruned; neither failure
    /// reaches the publisher. Returns the delivered count.
    pub fn publish(&self, event: &LiveEvent, origin: Option<Uuid>) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("[Relay] Unencodable event dropped: {e}");
                return 0;
            }
        };

        // Snapshot the registry so sessions may register/unregister while we
        // deliver.
        let targets: Vec<(Uuid, mpsc::Sender<String>)> = self
            .sessions
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in targets {
            if origin == Some(id) {
                continue;
            }
            match tx.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("[Relay] Session {id} lagging, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(id);
                }
            }
        }

        if !closed.is_empty() {
            let mut sessions = self.sessions.write();
            for id in closed {
                sessions.remove(&id);
                debug!("[Relay] Session {id} closed, pruned");
            }
        }

        delivered
    }
}
