//! C5: unified façade over the three memory tiers — session finalisation
//! choreography and context formatting for prompt injection.
//!
//! None of these operations return `Result`: failure is already encoded as
//! `false`/empty by the tier stores per the error-handling policy, and the
//! façade never escalates past that boundary.

use crate::inter::InterSessionStore;
use crate::intra::IntraSessionStore;
use crate::preferences::PreferenceStore;
use crate::schema::{truncate_chars, Message, MemoryItem, SessionId, UserId};

pub struct MemoryManager {
    intra: IntraSessionStore,
    inter: InterSessionStore,
    preferences: PreferenceStore,
    enable_async_embedding: bool,
    default_k: usize,
    default_min_sim: f32,
}

impl MemoryManager {
    pub fn new(
        intra: IntraSessionStore,
        inter: InterSessionStore,
        preferences: PreferenceStore,
        enable_async_embedding: bool,
        default_k: usize,
        default_min_sim: f32,
    ) -> Self {
        Self {
            intra,
            inter,
            preferences,
            enable_async_embedding,
            default_k,
            default_min_sim,
        }
    }

    pub async fn append(&self, session_id: &SessionId, message: &Message) -> bool {
        self.intra.append(session_id, message).await
    }

    pub async fn list(&self, session_id: &SessionId, limit: Option<usize>) -> Vec<Message> {
        self.intra.list(session_id, limit).await
    }

    pub async fn refresh(&self, session_id: &SessionId) -> bool {
        self.intra.refresh(session_id).await
    }

    /// 1. Drain C2. Empty ⇒ idempotent success.
    /// 2. Write the full conversation to C3; a failure here leaves the
    ///    intra-session log untouched so a retry can still recover it.
    /// 3. If async embedding is on, dispatch the Q/A-paired summary.
    /// 4. Clear C2.
    pub async fn finalize_session(&self, user_id: &UserId, session_id: &SessionId) -> bool {
        let messages = self.intra.list(session_id, None).await;
        if messages.is_empty() {
            return true;
        }

        if !self.inter.save(user_id, session_id, &messages).await {
            return false;
        }

        if self.enable_async_embedding {
            let content = InterSessionStore::build_embedding_content(&messages);
            self.inter.enqueue_embedding(user_id, session_id, &content).await;
        }

        self.intra.clear(session_id).await
    }

    pub async fn retrieve_relevant_memories(
        &self,
        user_id: &UserId,
        query: &str,
        k: Option<usize>,
        min_sim: Option<f32>,
    ) -> Vec<(MemoryItem, f32)> {
        let k = k.filter(|v| *v > 0).unwrap_or(self.default_k);
        let min_sim = min_sim.unwrap_or(self.default_min_sim);
        self.inter.retrieve_similar(user_id, query, k, min_sim).await
    }

    /// Emits `"- (inter, similarity=S.SS) content[:200]"` lines under a
    /// fixed header, stopping once the accumulated body exceeds `max_chars`.
    pub fn format_memories_for_context(items: &[(MemoryItem, f32)], max_chars: usize) -> String {
        if items.is_empty() {
            return String::new();
        }

        let mut body = String::new();
        for (item, score) in items {
            let line = format!(
                "- ({}, similarity={score:.2}) {}",
                item.item_type.as_tag(),
                truncate_chars(&item.content, 200)
            );
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(&line);
            if body.len() > max_chars {
                break;
            }
        }

        format!("Relevant context from past conversations:\n{body}")
    }

    /// Decorates the stored preference map with `_version`, mirroring the
    /// source's `{**prefs, "_version": version}` shape.
    pub async fn get_preferences(&self, user_id: &UserId) -> Option<serde_json::Value> {
        let versioned = self.preferences.get(user_id).await?;
        let mut out = versioned.preferences;
        if let Some(map) = out.as_object_mut() {
            map.insert("_version".to_string(), serde_json::json!(versioned.version));
        }
        Some(out)
    }

    pub async fn update_preference(&self, user_id: &UserId, key: &str, value: serde_json::Value) -> bool {
        self.preferences.update_one(user_id, key, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{DocClient, Embedder, KVClient, StreamEntry, VectorClient};
    use crate::connections::{DocManager, KvManager, VectorManager};
    use crate::schema::{ConversationDocument, MessageRole, PreferenceDocument, VectorPoint};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Default)]
    struct FakeKv {
        lists: StdMutex<HashMap<String, Vec<String>>>,
        ttls: StdMutex<HashMap<String, u64>>,
        streams: StdMutex<HashMap<String, Vec<HashMap<String, String>>>>,
    }

    #[async_trait]
    impl KVClient for FakeKv {
        async fn rpush(&self, key: &str, value: &str) -> bool {
            self.lists.lock().unwrap().entry(key.to_string()).or_default().push(value.to_string());
            true
        }
        async fn lrange(&self, key: &str, limit: Option<usize>) -> Vec<String> {
            let lists = self.lists.lock().unwrap();
            let Some(all) = lists.get(key) else { return Vec::new() };
            match limit {
                Some(n) if n < all.len() => all[all.len() - n..].to_vec(),
                _ => all.clone(),
            }
        }
        async fn expire(&self, key: &str, ttl_secs: u64) -> bool {
            self.ttls.lock().unwrap().insert(key.to_string(), ttl_secs);
            true
        }
        async fn ttl(&self, key: &str) -> Option<i64> {
            self.ttls.lock().unwrap().get(key).map(|v| *v as i64)
        }
        async fn del(&self, key: &str) -> bool {
            self.lists.lock().unwrap().remove(key);
            true
        }
        async fn get(&self, _key: &str) -> Option<String> {
            None
        }
        async fn set_ex(&self, _key: &str, _value: &str, _ttl_secs: u64) -> bool {
            true
        }
        async fn xadd(&self, stream: &str, fields: &[(&str, &str)]) -> Option<String> {
            let mut map = HashMap::new();
            for (k, v) in fields {
                map.insert(k.to_string(), v.to_string());
            }
            self.streams.lock().unwrap().entry(stream.to_string()).or_default().push(map);
            Some("1-0".to_string())
        }
        async fn xgroup_create(&self, _stream: &str, _group: &str) -> bool {
            true
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
            true
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
            self.conversations.lock().unwrap().insert(doc.session_id.0.clone(), doc.clone());
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
            Some(vec![0.1, 0.2])
        }
    }

    fn manager(kv: Arc<FakeKv>, doc: Arc<FakeDoc>, async_embedding: bool) -> MemoryManager {
        let kv_manager = Arc::new(KvManager::new_with_client(kv));
        let doc_manager = Arc::new(DocManager::new_with_client(doc));
        let vector_manager = Arc::new(VectorManager::new_with_client(Arc::new(FakeVector::default())));
        let intra = IntraSessionStore::new(kv_manager.clone(), 7200);
        let inter = InterSessionStore::new(
            doc_manager.clone(),
            vector_manager,
            kv_manager.clone(),
            Arc::new(FakeEmbedder),
            "embedding_queue".to_string(),
            async_embedding,
        );
        let preferences = PreferenceStore::new(doc_manager, kv_manager, false, 3600, "preference_queue".to_string(), true);
        MemoryManager::new(intra, inter, preferences, async_embedding, 6, 0.40)
    }

    #[tokio::test]
    async fn scenario_s1_append_then_list() {
        let m = manager(Arc::new(FakeKv::default()), Arc::new(FakeDoc::default()), false);
        let session = SessionId::from("s1");
        m.append(&session, &Message::new(MessageRole::User, "Plan Tokyo trip")).await;
        let listed = m.list(&session, None).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].content, "Plan Tokyo trip");
    }

    #[tokio::test]
    async fn scenario_s2_finalize_saves_document_and_clears_session() {
        let kv = Arc::new(FakeKv::default());
        let doc = Arc::new(FakeDoc::default());
        let m = manager(kv.clone(), doc.clone(), true);
        let user = UserId::from("u1");
        let session = SessionId::from("s1");

        for (role, text) in [
            (MessageRole::User, "Plan Tokyo trip"),
            (MessageRole::Agent, "Sure, when do you want to go?"),
            (MessageRole::User, "Next spring"),
            (MessageRole::Agent, "Great, budget in mind?"),
        ] {
            m.append(&session, &Message::new(role, text)).await;
        }

        assert!(m.finalize_session(&user, &session).await);

        let stored = doc.conversations.lock().unwrap().get("s1").cloned().unwrap();
        assert_eq!(stored.messages.len(), 4);
        assert!(stored.summary.starts_with("[user] Plan Tokyo trip"));

        let queued = kv.streams.lock().unwrap().get("embedding_queue").cloned().unwrap_or_default();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].get("user_id").unwrap(), "u1");
        assert_eq!(queued[0].get("session_id").unwrap(), "s1");

        assert!(m.list(&session, None).await.is_empty());
    }

    #[tokio::test]
    async fn finalize_session_on_empty_intra_log_is_idempotent() {
        let m = manager(Arc::new(FakeKv::default()), Arc::new(FakeDoc::default()), false);
        assert!(m.finalize_session(&UserId::from("u1"), &SessionId::from("missing")).await);
    }

    #[tokio::test]
    async fn format_memories_for_context_stops_past_max_chars() {
        let items = vec![
            (
                MemoryItem {
                    id: "1".to_string(),
                    user_id: UserId::from("u1"),
                    session_id: None,
                    item_type: crate::schema::MemoryType::Inter,
                    content: "a".repeat(100),
                    created_at: chrono::Utc::now(),
                    updated_at: None,
                    metadata: serde_json::json!({}),
                    version: None,
                },
                0.91,
            ),
            (
                MemoryItem {
                    id: "2".to_string(),
                    user_id: UserId::from("u1"),
                    session_id: None,
                    item_type: crate::schema::MemoryType::Inter,
                    content: "b".repeat(100),
                    created_at: chrono::Utc::now(),
                    updated_at: None,
                    metadata: serde_json::json!({}),
                    version: None,
                },
                0.81,
            ),
        ];
        let formatted = MemoryManager::format_memories_for_context(&items, 80);
        assert!(formatted.starts_with("Relevant context from past conversations:\n"));
        assert_eq!(formatted.matches("similarity=").count(), 1);
    }
}
