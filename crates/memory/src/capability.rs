//! Capability interfaces that replace the source's duck-typed backend
//! handles: `KVClient`, `DocClient`, `VectorClient`, `Embedder`, `Extractor`.
//!
//! Each is a small operation set. Connection managers (`crate::connections`)
//! are the concrete constructors that return these capabilities; everything
//! above this layer programs only against the trait.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::schema::{ConversationDocument, PreferenceDocument, VectorPoint};

/// One entry read back from a consumer-group stream read or auto-claim.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// The KV store backs the intra-session log, the preference read-through
/// cache, and the two job streams.
#[async_trait]
pub trait KVClient: Send + Sync {
    async fn rpush(&self, key: &str, value: &str) -> bool;
    async fn lrange(&self, key: &str, limit: Option<usize>) -> Vec<String>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> bool;
    async fn ttl(&self, key: &str) -> Option<i64>;
    async fn del(&self, key: &str) -> bool;

    async fn get(&self, key: &str) -> Option<String>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> bool;

    async fn xadd(&self, stream: &str, fields: &[(&str, &str)]) -> Option<String>;
    /// Idempotent: callers ignore the "already exists" signal.
    async fn xgroup_create(&self, stream: &str, group: &str) -> bool;
    async fn xreadgroup(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block_ms: u64,
        count: usize,
    ) -> Vec<StreamEntry>;
    async fn xack(&self, stream: &str, group: &str, id: &str) -> bool;
    /// Reassign ownership of entries idle longer than `min_idle_ms` to
    /// `consumer`, without acking them.
    async fn xautoclaim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
    ) -> Vec<StreamEntry>;

    /// Total entries in a stream, used only for diagnostic reporting.
    /// Defaults to 0 so test doubles don't need to track stream length.
    async fn xlen(&self, _stream: &str) -> u64 {
        0
    }
}

/// The document store backs durable conversations and preferences.
#[async_trait]
pub trait DocClient: Send + Sync {
    async fn ensure_indexes(&self) -> anyhow::Result<()>;

    async fn save_conversation(&self, doc: &ConversationDocument) -> bool;
    async fn get_conversation(&self, session_id: &str) -> Option<ConversationDocument>;

    async fn get_preferences(&self, user_id: &str) -> Option<PreferenceDocument>;
    /// `expected_version = None` is a blind upsert (insert starts at
    /// version 1). `Some(v)` only writes if the stored version equals `v`;
    /// on match, `preferences` and `version` update atomically.
    async fn set_preferences(
        &self,
        user_id: &str,
        preferences: &serde_json::Value,
        expected_version: Option<i64>,
    ) -> bool;

    /// Row counts for diagnostic reporting. Defaults to `(0, 0)` so test
    /// doubles don't need to track counts.
    async fn collection_sizes(&self) -> (u64, u64) {
        (0, 0)
    }
}

/// The vector index backs similarity retrieval.
#[async_trait]
pub trait VectorClient: Send + Sync {
    /// Idempotent: if the collection is missing it is created; any other
    /// outcome (including "already exists") is treated as success.
    async fn ensure_collection(&self, dim: usize) -> anyhow::Result<()>;
    async fn upsert(&self, point: &VectorPoint) -> bool;
    /// Mandatory per-user filter; returns up to `limit` hits with
    /// `score >= score_threshold`, in backend order (descending score).
    async fn search(
        &self,
        user_id: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Vec<(VectorPoint, f32)>;

    /// Total points in the collection, used only for diagnostic reporting.
    /// Defaults to 0 so test doubles don't need to track point counts.
    async fn count(&self) -> u64 {
        0
    }
}

/// LLM embedding provider. Out of scope per the spec's non-goals beyond this
/// narrow interface.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

/// Optional LLM-backed preference extraction. Must never block the regex
/// path in `crate::extraction`.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str) -> Option<serde_json::Value>;
}
