//! Conversation store: membership, titles, activity timestamps.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identity::IdentityDirectory;
use crate::models::{Conversation, ConversationPatch, ConversationType};
use crate::relay::{LiveEvent, LiveRelay, MembershipChange};
use crate::store::db::{fmt_ts, parse_ts};
use crate::store::{map_insert_err, require};

/// Conversation mutations race on `participants`, `created_by`, and `title`;
/// updates are guarded by the participant list and title observed at read
/// time and retried this many times before giving up.
const CAS_ATTEMPTS: usize = 3;

const COLUMNS: &str =
    "conversation_id, participants, title, created_by, conversation_type, created_at, \
     last_activity";

type ConversationRow = (String, String, String, String, String, String, String);

/// Owns conversation records. The Identity Directory is consumed only for the
/// best-effort title rewrite when a participant leaves.
pub struct ConversationStore {
    pool: SqlitePool,
    identity: Arc<dyn IdentityDirectory>,
    relay: Arc<LiveRelay>,
}

impl ConversationStore {
    pub fn new(
        pool: SqlitePool,
        identity: Arc<dyn IdentityDirectory>,
        relay: Arc<LiveRelay>,
    ) -> Self {
        Self {
            pool,
            identity,
            relay,
        }
    }

    /// Create a conversation. `created_by` must be one of the participants so
    /// the creator-membership invariant holds from birth.
    pub async fn create(
        &self,
        conversation_id: &str,
        participants: Vec<String>,
        title: &str,
        created_by: &str,
        conversation_type: ConversationType,
    ) -> Result<Conversation> {
        require("conversationID", conversation_id)?;
        require("title", title)?;
        require("createdBy", created_by)?;
        if participants.is_empty() {
            return Err(Error::InvalidArgument("participants must be filled".into()));
        }
        for participant in &participants {
            require("participant", participant)?;
        }
        if !participants.iter().any(|p| p == created_by) {
            return Err(Error::InvalidArgument(
                "createdBy must be a participant".into(),
            ));
        }

        let now = Utc::now();
        let conversation = Conversation {
            conversation_id: conversation_id.to_string(),
            participants,
            title: title.to_string(),
            created_by: created_by.to_string(),
            conversation_type,
            created_at: now,
            last_activity: now,
        };

        sqlx::query(
            "INSERT INTO conversations \
             (conversation_id, participants, title, created_by, conversation_type, created_at, \
              last_activity) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&conversation.conversation_id)
        .bind(serde_json::to_string(&conversation.participants)?)
        .bind(&conversation.title)
        .bind(&conversation.created_by)
        .bind(conversation.conversation_type.as_str())
        .bind(fmt_ts(conversation.created_at))
        .bind(fmt_ts(conversation.last_activity))
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, conversation_id))?;

        info!("[Conversations] Created {conversation_id}");
        Ok(conversation)
    }

    pub async fn get(&self, conversation_id: &str) -> Result<Conversation> {
        self.find(conversation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conversation {conversation_id}")))
    }

    pub async fn find(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM conversations WHERE conversation_id = ?"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(from_row).transpose()
    }

    pub async fn exists(&self, conversation_id: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM conversations WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// All conversations the user participates in, store-natural order.
    pub async fn list_for_participant(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let rows: Vec<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM conversations WHERE EXISTS \
             (SELECT 1 FROM json_each(conversations.participants) WHERE json_each.value = ?)"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(from_row).collect()
    }

    /// All conversations created by the user; scopes admin visibility in the
    /// rename-request workflow.
    pub async fn list_created_by(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let rows: Vec<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM conversations WHERE created_by = ?"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(from_row).collect()
    }

    /// The single conversation whose membership matches `participants`
    /// exactly, comparing as a set. Prevents duplicate threads for the same
    /// membership.
    pub async fn find_by_exact_participant_set(
        &self,
        participants: &[String],
    ) -> Result<Option<Conversation>> {
        if participants.is_empty() {
            return Err(Error::InvalidArgument("participants must be filled".into()));
        }
        let wanted = normalize(participants);

        // Narrow to conversations containing one member, then compare sets.
        let candidates = self.list_for_participant(&wanted[0]).await?;
        Ok(candidates
            .into_iter()
            .find(|c| normalize(&c.participants) == wanted))
    }

    /// Advance `last_activity` to now. Never rolls it back.
    pub async fn bump_activity(&self, conversation_id: &str) -> Result<Conversation> {
        let now = fmt_ts(Utc::now());
        let updated = sqlx::query(
            "UPDATE conversations SET last_activity = ? \
             WHERE conversation_id = ? AND last_activity < ?",
        )
        .bind(&now)
        .bind(conversation_id)
        .bind(&now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            // Missing record or a clock already ahead; `get` distinguishes.
            return self.get(conversation_id).await;
        }
        self.get(conversation_id).await
    }

    /// Replace the title.
    pub async fn rename(&self, conversation_id: &str, new_title: &str) -> Result<Conversation> {
        let patch = ConversationPatch {
            title: Some(new_title.to_string()),
            ..ConversationPatch::default()
        };
        if !self.apply_patch(conversation_id, None, &patch).await? {
            return Err(Error::NotFound(format!("conversation {conversation_id}")));
        }
        self.get(conversation_id).await
    }

    /// Remove a participant from the conversation.
    ///
    /// Absent participants are a no-op, not an error. When the creator leaves,
    /// the first remaining participant in membership order becomes the new
    /// creator; removing the sole remaining participant fails `InvalidState`
    /// and leaves the record unchanged. The departing participant's display
    /// name is stripped from a comma-joined title on a best-effort basis.
    /// `origin` names the relay session whose action this is; that session
    /// is skipped when the membership event fans out.
    pub async fn remove_participant(
        &self,
        conversation_id: &str,
        participant_id: &str,
        origin: Option<Uuid>,
    ) -> Result<Conversation> {
        for _ in 0..CAS_ATTEMPTS {
            let current = self.get(conversation_id).await?;

            let mut participants = current.participants.clone();
            let removed = match participants.iter().position(|p| p == participant_id) {
                Some(pos) => {
                    participants.remove(pos);
                    true
                }
                None => false,
            };

            let mut created_by = current.created_by.clone();
            if created_by == participant_id {
                match participants.first() {
                    Some(successor) => created_by = successor.clone(),
                    None => {
                        return Err(Error::InvalidState(
                            "cannot remove last participant without successor".into(),
                        ))
                    }
                }
            }

            let title = if removed {
                self.strip_name_from_title(&current.title, participant_id)
                    .await
            } else {
                current.title.clone()
            };

            let observed_participants = serde_json::to_string(&current.participants)?;
            let patch = ConversationPatch {
                title: Some(title),
                participants: Some(participants),
                created_by: Some(created_by),
                last_activity: None,
            };
            let observed = Some((observed_participants.as_str(), current.title.as_str()));
            if self.apply_patch(conversation_id, observed, &patch).await? {
                let updated = self.get(conversation_id).await?;
                if removed {
                    info!(
                        "[Conversations] Removed {participant_id} from {conversation_id} \
                         (creator: {})",
                        updated.created_by
                    );
                    self.relay.publish(
                        &LiveEvent::Membership(MembershipChange {
                            conversation_id: updated.conversation_id.clone(),
                            removed: participant_id.to_string(),
                            participants: updated.participants.clone(),
                            created_by: updated.created_by.clone(),
                            title: updated.title.clone(),
                        }),
                        origin,
                    );
                }
                return Ok(updated);
            }
            warn!("[Conversations] Contended update on {conversation_id}, retrying");
        }

        Err(Error::Unavailable(format!(
            "conversation {conversation_id} update contended"
        )))
    }

    /// Delete the conversation record. Message cleanup cascades at the
    /// `Messaging` level so the message store keeps ownership of its records.
    pub async fn delete(&self, conversation_id: &str) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM conversations WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(Error::NotFound(format!("conversation {conversation_id}")));
        }
        info!("[Conversations] Deleted {conversation_id}");
        Ok(())
    }

    /// Apply only the fields present in `patch`, optionally guarded by the
    /// `(participants JSON, title)` pair observed when the caller read the
    /// record. A guarded update writes nothing if either changed underneath.
    async fn apply_patch(
        &self,
        conversation_id: &str,
        observed: Option<(&str, &str)>,
        patch: &ConversationPatch,
    ) -> Result<bool> {
        let mut sets = Vec::new();
        if patch.title.is_some() {
            sets.push("title = ?");
        }
        if patch.participants.is_some() {
            sets.push("participants = ?");
        }
        if patch.created_by.is_some() {
            sets.push("created_by = ?");
        }
        if patch.last_activity.is_some() {
            sets.push("last_activity = ?");
        }
        if sets.is_empty() {
            return Ok(true);
        }

        let mut sql = format!(
            "UPDATE conversations SET {} WHERE conversation_id = ?",
            sets.join(", ")
        );
        if observed.is_some() {
            sql.push_str(" AND participants = ? AND title = ?");
        }

        let participants_json = match &patch.participants {
            Some(participants) => Some(serde_json::to_string(participants)?),
            None => None,
        };

        let mut query = sqlx::query(&sql);
        if let Some(title) = &patch.title {
            query = query.bind(title);
        }
        if let Some(json) = &participants_json {
            query = query.bind(json);
        }
        if let Some(created_by) = &patch.created_by {
            query = query.bind(created_by);
        }
        if let Some(last_activity) = patch.last_activity {
            query = query.bind(fmt_ts(last_activity));
        }
        query = query.bind(conversation_id);
        if let Some((participants, title)) = observed {
            query = query.bind(participants).bind(title);
        }

        Ok(query.execute(&self.pool).await?.rows_affected() > 0)
    }

    /// Strip `"<Name>, "` or `", <Name>"` from a comma-joined title. Cosmetic
    /// only: an unresolvable name or a title not following the convention
    /// leaves the title untouched.
    async fn strip_name_from_title(&self, title: &str, participant_id: &str) -> String {
        let name = match self.identity.resolve_display_name(participant_id).await {
            Ok(name) => name,
            Err(e) => {
                warn!(
                    "[Conversations] No display name for {participant_id}, \
                     keeping title as-is: {e}"
                );
                return title.to_string();
            }
        };

        let leading = format!("{name}, ");
        let trailing = format!(", {name}");
        if title.contains(&leading) {
            title.replacen(&leading, "", 1)
        } else if title.contains(&trailing) {
            title.replacen(&trailing, "", 1)
        } else {
            title.to_string()
        }
    }
}

fn normalize(participants: &[String]) -> Vec<String> {
    let mut set: Vec<String> = participants.to_vec();
    set.sort();
    set.dedup();
    set
}

fn from_row(row: ConversationRow) -> Result<Conversation> {
    let (conversation_id, participants, title, created_by, conversation_type, created_at, last_activity) =
        row;
    Ok(Conversation {
        conversation_id,
        participants: serde_json::from_str(&participants)?,
        title,
        created_by,
        conversation_type: ConversationType::parse(&conversation_type).ok_or_else(|| {
            Error::Unavailable(format!("corrupt conversation type {conversation_type:?}"))
        })?,
        created_at: parse_ts(&created_at)?,
        last_activity: parse_ts(&last_activity)?,
    })
}
