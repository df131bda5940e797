//! [`DocClient`] backed by SQLite via `sqlx`.
//!
//! The source talks to a document database with native collections and
//! indexes. `sqlx`-over-SQLite is the closest embedded-relational analogue
//! available in this crate's dependency stack: `messages`/`preferences` are
//! stored as `TEXT` columns holding serialized JSON and read back through
//! `serde_json`, while `session_id`/`user_id` stay first-class indexed
//! columns so uniqueness and the compound index are enforced by SQLite
//! itself rather than re-implemented in application code.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::capability::DocClient;
use crate::schema::{ConversationDocument, Message, PreferenceDocument, SessionId, UserId};

pub struct SqliteDocClient {
    pool: SqlitePool,
}

impl SqliteDocClient {
    pub async fn connect(path: &str) -> anyhow::Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl DocClient for SqliteDocClient {
    async fn ensure_indexes(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                session_id   TEXT PRIMARY KEY,
                user_id      TEXT NOT NULL,
                messages     TEXT NOT NULL,
                summary      TEXT NOT NULL,
                message_count INTEGER NOT NULL,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_user_updated \
             ON conversations (user_id, updated_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_preferences (
                user_id      TEXT PRIMARY KEY,
                preferences  TEXT NOT NULL,
                version      INTEGER NOT NULL,
                updated_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_conversation(&self, doc: &ConversationDocument) -> bool {
        let messages_json = match serde_json::to_string(&doc.messages) {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize conversation messages");
                return false;
            }
        };

        let result = sqlx::query(
            r#"
            INSERT INTO conversations
                (session_id, user_id, messages, summary, message_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                messages = excluded.messages,
                summary = excluded.summary,
                message_count = excluded.message_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.session_id.0)
        .bind(&doc.user_id.0)
        .bind(&messages_json)
        .bind(&doc.summary)
        .bind(doc.message_count as i64)
        .bind(doc.created_at.to_rfc3339())
        .bind(doc.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(error = %err, session_id = %doc.session_id, "save_conversation failed");
                false
            }
        }
    }

    async fn get_conversation(&self, session_id: &str) -> Option<ConversationDocument> {
        let row = sqlx::query(
            "SELECT session_id, user_id, messages, summary, message_count, created_at, updated_at \
             FROM conversations WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .inspect_err(|err| tracing::warn!(error = %err, session_id, "get_conversation failed"))
        .ok()??;

        let messages: Vec<Message> = serde_json::from_str(row.get::<String, _>("messages").as_str()).ok()?;
        Some(ConversationDocument {
            session_id: SessionId(row.get("session_id")),
            user_id: UserId(row.get("user_id")),
            messages,
            summary: row.get("summary"),
            message_count: row.get::<i64, _>("message_count") as usize,
            created_at: parse_rfc3339(row.get("created_at")),
            updated_at: parse_rfc3339(row.get("updated_at")),
        })
    }

    async fn get_preferences(&self, user_id: &str) -> Option<PreferenceDocument> {
        let row = sqlx::query(
            "SELECT user_id, preferences, version, updated_at FROM user_preferences WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .inspect_err(|err| tracing::warn!(error = %err, user_id, "get_preferences failed"))
        .ok()??;

        let preferences: serde_json::Value =
            serde_json::from_str(row.get::<String, _>("preferences").as_str()).ok()?;
        Some(PreferenceDocument {
            user_id: UserId(row.get("user_id")),
            preferences,
            version: row.get("version"),
            updated_at: parse_rfc3339(row.get("updated_at")),
        })
    }

    async fn set_preferences(
        &self,
        user_id: &str,
        preferences: &serde_json::Value,
        expected_version: Option<i64>,
    ) -> bool {
        let Ok(preferences_json) = serde_json::to_string(preferences) else {
            return false;
        };
        let now = Utc::now().to_rfc3339();

        match expected_version {
            None => {
                // Blind upsert: insert starts at version 1, update bumps by 1.
                let result = sqlx::query(
                    r#"
                    INSERT INTO user_preferences (user_id, preferences, version, updated_at)
                    VALUES (?, ?, 1, ?)
                    ON CONFLICT(user_id) DO UPDATE SET
                        preferences = excluded.preferences,
                        version = user_preferences.version + 1,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(user_id)
                .bind(&preferences_json)
                .bind(&now)
                .execute(&self.pool)
                .await;
                result.is_ok()
            }
            Some(expected) => {
                let result = sqlx::query(
                    r#"
                    UPDATE user_preferences
                    SET preferences = ?, version = version + 1, updated_at = ?
                    WHERE user_id = ? AND version = ?
                    "#,
                )
                .bind(&preferences_json)
                .bind(&now)
                .bind(user_id)
                .bind(expected)
                .execute(&self.pool)
                .await;
                matches!(result, Ok(res) if res.rows_affected() > 0)
            }
        }
    }

    async fn collection_sizes(&self) -> (u64, u64) {
        let conversations = sqlx::query("SELECT COUNT(*) AS n FROM conversations")
            .fetch_one(&self.pool)
            .await
            .map(|row| row.get::<i64, _>("n") as u64)
            .unwrap_or(0);
        let preferences = sqlx::query("SELECT COUNT(*) AS n FROM user_preferences")
            .fetch_one(&self.pool)
            .await
            .map(|row| row.get::<i64, _>("n") as u64)
            .unwrap_or(0);
        (conversations, preferences)
    }
}

fn parse_rfc3339(raw: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
