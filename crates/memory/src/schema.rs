//! Wire and storage types shared across the memory tiers.
//!
//! The source system passes untyped mappings between layers; here every
//! shape that crosses a tier boundary gets an explicit record type instead.

use std::fmt;
use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque session identifier, used as a KV/doc partition key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Deref for SessionId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque user identifier, used as a KV/doc partition key and the mandatory
/// vector-retrieval filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Deref for UserId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_tag(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Agent => "agent",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }
}

/// A single conversation turn. `content` is opaque-to-the-core JSON in the
/// source; here it is a plain string since no downstream consumer in this
/// service inspects its internal shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub role: MessageRole,
    pub content: String,
    /// Unix timestamp, seconds.
    pub created_at: i64,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now().timestamp(),
        }
    }
}

/// Durable per-session conversation record. `session_id` is unique across the
/// collection; `updated_at` is always `>= created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDocument {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub messages: Vec<Message>,
    /// Truncated to 800 chars; see `summarize_messages`.
    pub summary: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A point in the vector index. `payload.content` is truncated to 500 chars;
/// the untruncated summary lives only in the `ConversationDocument`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub source: String,
}

/// Per-user preference map with optimistic-concurrency version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceDocument {
    pub user_id: UserId,
    pub preferences: serde_json::Value,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// A stream-entry job. Immutable once enqueued; retry is implicit via
/// non-ack, not via a tracked attempt count (see DESIGN.md open questions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum JobRecord {
    #[serde(rename = "embedding")]
    Embedding {
        user_id: UserId,
        session_id: SessionId,
        content: String,
        created_at: i64,
    },
    #[serde(rename = "preference")]
    Preference {
        user_id: UserId,
        session_id: SessionId,
    },
}

impl JobRecord {
    /// Encode as a flat field map, matching how a Redis Streams entry is
    /// actually shaped on the wire (`XADD key * field value ...`).
    pub fn to_fields(&self) -> Vec<(String, String)> {
        match self {
            JobRecord::Embedding {
                user_id,
                session_id,
                content,
                created_at,
            } => vec![
                ("user_id".to_string(), user_id.0.clone()),
                ("session_id".to_string(), session_id.0.clone()),
                ("content".to_string(), content.clone()),
                ("created_at".to_string(), created_at.to_string()),
            ],
            JobRecord::Preference {
                user_id,
                session_id,
            } => vec![
                ("user_id".to_string(), user_id.0.clone()),
                ("session_id".to_string(), session_id.0.clone()),
            ],
        }
    }

    pub fn embedding_from_fields(
        fields: &std::collections::HashMap<String, String>,
    ) -> Option<Self> {
        Some(JobRecord::Embedding {
            user_id: UserId(fields.get("user_id")?.clone()),
            session_id: SessionId(fields.get("session_id")?.clone()),
            content: fields.get("content")?.clone(),
            created_at: fields.get("created_at").and_then(|s| s.parse().ok()).unwrap_or(0),
        })
    }

    pub fn preference_from_fields(
        fields: &std::collections::HashMap<String, String>,
    ) -> Option<Self> {
        Some(JobRecord::Preference {
            user_id: UserId(fields.get("user_id")?.clone()),
            session_id: SessionId(fields.get("session_id")?.clone()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Intra,
    Inter,
    Preference,
    Profile,
    Turn,
}

impl MemoryType {
    pub fn as_tag(&self) -> &'static str {
        match self {
            MemoryType::Intra => "intra",
            MemoryType::Inter => "inter",
            MemoryType::Preference => "preference",
            MemoryType::Profile => "profile",
            MemoryType::Turn => "turn",
        }
    }
}

/// Unified item returned to callers across all tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub user_id: UserId,
    pub session_id: Option<SessionId>,
    #[serde(rename = "type")]
    pub item_type: MemoryType,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub version: Option<i64>,
}

/// Build the `save()` summary: first <=10 messages, `"[{type}] {content[:150]}"`
/// joined with `" | "`, truncated to 800 chars.
pub fn summarize_messages(messages: &[Message]) -> String {
    let parts: Vec<String> = messages
        .iter()
        .take(10)
        .map(|m| format!("[{}] {}", m.role.as_tag(), truncate_chars(&m.content, 150)))
        .collect();
    truncate_chars(&parts.join(" | "), 800)
}

/// Build the Q/A-paired summary used for the embedding job's content: pair
/// adjacent messages `(msg[2i], msg[2i+1])` as `Q: ...[:200]\nA: ...[:200]`,
/// joined with blank lines, truncated to 800 chars.
pub fn qa_paired_summary(messages: &[Message]) -> String {
    let mut blocks = Vec::new();
    let mut iter = messages.chunks(2);
    while let Some(pair) = iter.next() {
        let q = truncate_chars(&pair[0].content, 200);
        let block = if let Some(a) = pair.get(1) {
            format!("Q: {q}\nA: {}", truncate_chars(&a.content, 200))
        } else {
            format!("Q: {q}")
        };
        blocks.push(block);
    }
    truncate_chars(&blocks.join("\n\n"), 800)
}

/// Truncate a string to at most `max` **characters** (not bytes), respecting
/// UTF-8 boundaries.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}
