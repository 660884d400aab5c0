//! SQLite bootstrap shared by the store components.
//!
//! The durable store contract is small: keyed lookup, conditional single-row
//! update, filtered queries with skip/limit/sort, and bulk delete. SQLite
//! covers all of it; each component owns its own tables.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::config::MessagingConfig;
use crate::error::Result;

/// Open (creating if missing) the database and initialize the schema.
pub async fn connect(config: &MessagingConfig) -> Result<SqlitePool> {
    config.ensure_dirs().await?;

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.db_path.display()))
        .map_err(sqlx::Error::from)?
        .create_if_missing(true)
        // Concurrent per-message status updates share the database.
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;

    info!("[Store] Opened {:?}", config.db_path);
    Ok(pool)
}

async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            conversation_id   TEXT PRIMARY KEY,
            participants      TEXT NOT NULL,
            title             TEXT NOT NULL,
            created_by        TEXT NOT NULL,
            conversation_type TEXT NOT NULL,
            created_at        TEXT NOT NULL,
            last_activity     TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            message_id      TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            sender_id       TEXT NOT NULL,
            recipient_ids   TEXT NOT NULL,
            content         TEXT NOT NULL,
            timestamp       TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS message_status (
            message_id   TEXT NOT NULL,
            recipient_id TEXT NOT NULL,
            state        TEXT NOT NULL,
            PRIMARY KEY (message_id, recipient_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rename_requests (
            request_id      TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            requester_id    TEXT NOT NULL,
            current_name    TEXT NOT NULL,
            new_name        TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'pending',
            created_at      TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Fixed-width RFC 3339 so the TEXT column sorts chronologically.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::Unavailable(format!("corrupt timestamp {raw:?}: {e}")))
}
