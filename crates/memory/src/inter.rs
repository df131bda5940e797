//! C3: durable conversation documents + vector index; async embedding
//! dispatch; similarity retrieval.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::capability::Embedder;
use crate::connections::{DocManager, KvManager, VectorManager};
use crate::schema::{
    qa_paired_summary, summarize_messages, truncate_chars, ConversationDocument, JobRecord,
    Message, MemoryItem, MemoryType, SessionId, UserId, VectorPoint,
};

pub struct InterSessionStore {
    doc: Arc<DocManager>,
    vector: Arc<VectorManager>,
    kv: Arc<KvManager>,
    embedder: Arc<dyn Embedder>,
    embedding_queue: String,
    enable_async_embedding: bool,
}

impl InterSessionStore {
    pub fn new(
        doc: Arc<DocManager>,
        vector: Arc<VectorManager>,
        kv: Arc<KvManager>,
        embedder: Arc<dyn Embedder>,
        embedding_queue: String,
        enable_async_embedding: bool,
    ) -> Self {
        Self {
            doc,
            vector,
            kv,
            embedder,
            embedding_queue,
            enable_async_embedding,
        }
    }

    /// Upserts the conversation document keyed by `session_id`. `created_at`
    /// is set only on insert by the backend's upsert semantics; `updated_at`
    /// is always now.
    pub async fn save(&self, user_id: &UserId, session_id: &SessionId, messages: &[Message]) -> bool {
        let Some(client) = self.doc.client().await else {
            return false;
        };

        let now = Utc::now();
        let existing = client.get_conversation(session_id).await;
        let created_at = existing.map(|e| e.created_at).unwrap_or(now);

        let doc = ConversationDocument {
            session_id: session_id.clone(),
            user_id: user_id.clone(),
            messages: messages.to_vec(),
            summary: summarize_messages(messages),
            message_count: messages.len(),
            created_at,
            updated_at: now,
        };

        client.save_conversation(&doc).await
    }

    /// If async embedding is disabled, embeds immediately and upserts a
    /// point. Otherwise publishes a job; on publish failure falls back to
    /// the immediate path.
    pub async fn enqueue_embedding(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        content: &str,
    ) -> bool {
        if !self.enable_async_embedding {
            return self.embed_and_upsert(user_id, session_id, content).await;
        }

        let job = JobRecord::Embedding {
            user_id: user_id.clone(),
            session_id: session_id.clone(),
            content: content.to_string(),
            created_at: Utc::now().timestamp(),
        };
        let fields = job.to_fields();
        let field_refs: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let published = match self.kv.client().await {
            Some(client) => client
                .xadd(&self.embedding_queue, &field_refs)
                .await
                .is_some(),
            None => false,
        };

        if published {
            true
        } else {
            self.embed_and_upsert(user_id, session_id, content).await
        }
    }

    async fn embed_and_upsert(&self, user_id: &UserId, session_id: &SessionId, content: &str) -> bool {
        let Some(vector) = self.embedder.embed(content).await else {
            return false;
        };
        let Some(client) = self.vector.client().await else {
            return false;
        };
        let point = VectorPoint {
            id: Uuid::new_v4(),
            vector,
            user_id: user_id.clone(),
            session_id: session_id.clone(),
            content: truncate_chars(content, 500),
            created_at: Utc::now(),
            source: "immediate".to_string(),
        };
        client.upsert(&point).await
    }

    /// Embeds `query`, searches the vector index with a mandatory
    /// `user_id` filter, and enriches hits from the document store. Ties
    /// preserve backend order; edge cases (empty query, embedder failure)
    /// return an empty result, never an error.
    pub async fn retrieve_similar(
        &self,
        user_id: &UserId,
        query: &str,
        k: usize,
        min_sim: f32,
    ) -> Vec<(MemoryItem, f32)> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        let Some(vector) = self.embedder.embed(query).await else {
            return Vec::new();
        };
        let Some(vector_client) = self.vector.client().await else {
            return Vec::new();
        };

        let hits = vector_client
            .search(user_id, &vector, k.saturating_mul(2).max(k), min_sim)
            .await;

        let doc_client = self.doc.client().await;

        let mut out = Vec::with_capacity(k);
        for (point, score) in hits.into_iter().take(k) {
            let document = match &doc_client {
                Some(client) => client.get_conversation(&point.session_id).await,
                None => None,
            };

            let (content, updated_at) = match &document {
                Some(doc) => (doc.summary.clone(), doc.updated_at),
                None => (point.content.clone(), point.created_at),
            };

            out.push((
                MemoryItem {
                    id: point.id.to_string(),
                    user_id: point.user_id.clone(),
                    session_id: Some(point.session_id.clone()),
                    item_type: MemoryType::Inter,
                    content,
                    created_at: point.created_at,
                    updated_at: Some(updated_at),
                    metadata: serde_json::json!({ "source": point.source }),
                    version: None,
                },
                score,
            ));
        }
        out
    }

    /// Helper used by `MemoryManager::finalize_session` to build the
    /// Q/A-paired embedding content.
    pub fn build_embedding_content(messages: &[Message]) -> String {
        qa_paired_summary(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{DocClient, KVClient, StreamEntry, VectorClient};
    use crate::schema::{MessageRole, PreferenceDocument};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeDoc {
        conversations: StdMutex<HashMap<String, ConversationDocument>>,
    }

    #[async_trait]
    impl DocClient for FakeDoc {
        async fn ensure_indexes(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn save_conversation(&self, doc: &ConversationDocument) -> bool {
            self.conversations
                .lock()
                .unwrap()
                .insert(doc.session_id.0.clone(), doc.clone());
            true
        }
        async fn get_conversation(&self, session_id: &str) -> Option<ConversationDocument> {
            self.conversations.lock().unwrap().get(session_id).cloned()
        }
        async fn get_preferences(&self, _user_id: &str) -> Option<PreferenceDocument> {
            None
        }
        async fn set_preferences(
            &self,
            _user_id: &str,
            _preferences: &serde_json::Value,
            _expected_version: Option<i64>,
        ) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct FakeVector {
        points: StdMutex<Vec<VectorPoint>>,
    }

    #[async_trait]
    impl VectorClient for FakeVector {
        async fn ensure_collection(&self, _dim: usize) -> anyhow::Result<()> {
            Ok(())
        }
        async fn upsert(&self, point: &VectorPoint) -> bool {
            self.points.lock().unwrap().push(point.clone());
            true
        }
        async fn search(
            &self,
            user_id: &str,
            _vector: &[f32],
            limit: usize,
            _score_threshold: f32,
        ) -> Vec<(VectorPoint, f32)> {
            self.points
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.user_id.0 == user_id)
                .take(limit)
                .map(|p| (p.clone(), 0.9))
                .collect()
        }
    }

    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, _text: &str) -> Option<Vec<f32>> {
            Some(vec![0.1, 0.2, 0.3])
        }
    }

    struct NoopKv;

    #[async_trait]
    impl KVClient for NoopKv {
        async fn rpush(&self, _key: &str, _value: &str) -> bool {
            false
        }
        async fn lrange(&self, _key: &str, _limit: Option<usize>) -> Vec<String> {
            Vec::new()
        }
        async fn expire(&self, _key: &str, _ttl_secs: u64) -> bool {
            false
        }
        async fn ttl(&self, _key: &str) -> Option<i64> {
            None
        }
        async fn del(&self, _key: &str) -> bool {
            false
        }
        async fn get(&self, _key: &str) -> Option<String> {
            None
        }
        async fn set_ex(&self, _key: &str, _value: &str, _ttl_secs: u64) -> bool {
            false
        }
        async fn xadd(&self, _stream: &str, _fields: &[(&str, &str)]) -> Option<String> {
            None
        }
        async fn xgroup_create(&self, _stream: &str, _group: &str) -> bool {
            false
        }
        async fn xreadgroup(
            &self,
            _stream: &str,
            _group: &str,
            _consumer: &str,
            _block_ms: u64,
            _count: usize,
        ) -> Vec<StreamEntry> {
            Vec::new()
        }
        async fn xack(&self, _stream: &str, _group: &str, _id: &str) -> bool {
            false
        }
        async fn xautoclaim(
            &self,
            _stream: &str,
            _group: &str,
            _consumer: &str,
            _min_idle_ms: u64,
        ) -> Vec<StreamEntry> {
            Vec::new()
        }
    }

    fn store() -> InterSessionStore {
        InterSessionStore::new(
            Arc::new(DocManager::new_with_client(Arc::new(FakeDoc::default()))),
            Arc::new(VectorManager::new_with_client(Arc::new(FakeVector::default()))),
            Arc::new(KvManager::new_with_client(Arc::new(NoopKv))),
            Arc::new(FakeEmbedder),
            "embedding_queue".to_string(),
            false,
        )
    }

    #[tokio::test]
    async fn save_builds_truncated_pipe_joined_summary() {
        let s = store();
        let messages = vec![
            Message::new(MessageRole::User, "Plan Tokyo trip"),
            Message::new(MessageRole::Agent, "Sure, when do you want to go?"),
        ];
        assert!(s.save(&UserId::from("u1"), &SessionId::from("s1"), &messages).await);
    }

    #[tokio::test]
    async fn retrieve_similar_filters_by_user_and_enriches_from_document() {
        let s = store();
        let user = UserId::from("u1");
        let session = SessionId::from("s1");
        let messages = vec![Message::new(MessageRole::User, "Plan Tokyo trip")];
        s.save(&user, &session, &messages).await;
        s.enqueue_embedding(&user, &session, "Tokyo trip summary").await;

        let hits = s.retrieve_similar(&user, "Tokyo", 3, 0.0).await;
        assert_eq!(hits.len(), 1);
        assert!(hits[0].0.content.contains("Plan Tokyo trip"));

        let other_user_hits = s.retrieve_similar(&UserId::from("u2"), "Tokyo", 3, 0.0).await;
        assert!(other_user_hits.is_empty());
    }

    #[tokio::test]
    async fn empty_query_returns_empty() {
        let s = store();
        let hits = s.retrieve_similar(&UserId::from("u1"), "", 3, 0.0).await;
        assert!(hits.is_empty());
    }
}
