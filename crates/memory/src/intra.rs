//! C2: append-only per-session message log with sliding TTL.

use std::sync::Arc;

use crate::connections::KvManager;
use crate::schema::Message;

pub struct IntraSessionStore {
    kv: Arc<KvManager>,
    ttl_secs: u64,
}

impl IntraSessionStore {
    pub fn new(kv: Arc<KvManager>, ttl_secs: u64) -> Self {
        Self { kv, ttl_secs }
    }

    fn key(session_id: &str) -> String {
        format!("session:{session_id}")
    }

    /// Appends JSON-encoded `message` to the tail and unconditionally resets
    /// the key's TTL — the sliding-window mechanism.
    pub async fn append(&self, session_id: &str, message: &Message) -> bool {
        let Some(client) = self.kv.client().await else {
            return false;
        };
        let Ok(encoded) = serde_json::to_string(message) else {
            return false;
        };
        let key = Self::key(session_id);
        if !client.rpush(&key, &encoded).await {
            return false;
        }
        client.expire(&key, self.ttl_secs).await
    }

    /// Returns the last `limit` entries (or all) in insertion order.
    pub async fn list(&self, session_id: &str, limit: Option<usize>) -> Vec<Message> {
        let Some(client) = self.kv.client().await else {
            return Vec::new();
        };
        client
            .lrange(&Self::key(session_id), limit)
            .await
            .into_iter()
            .filter_map(|raw| serde_json::from_str(&raw).ok())
            .collect()
    }

    pub async fn clear(&self, session_id: &str) -> bool {
        let Some(client) = self.kv.client().await else {
            return false;
        };
        client.del(&Self::key(session_id)).await
    }

    /// Resets the TTL without reading or writing content.
    pub async fn refresh(&self, session_id: &str) -> bool {
        let Some(client) = self.kv.client().await else {
            return false;
        };
        client.expire(&Self::key(session_id), self.ttl_secs).await
    }

    /// Remaining TTL in seconds, for diagnostics and tests.
    pub async fn ttl_remaining(&self, session_id: &str) -> Option<i64> {
        let client = self.kv.client().await?;
        client.ttl(&Self::key(session_id)).await
    }
}
