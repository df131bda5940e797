//! Wires an `AppConfig` into the connection managers and stores, mirroring
//! how `crates/memory/src/connections.rs` lazily constructs backends.

use std::sync::Arc;

use memory_config::AppConfig;
use memory_core::backends::OllamaEmbedder;
use memory_core::{
    DocManager, Embedder, InterSessionStore, IntraSessionStore, KvManager, MemoryManager,
    PreferenceStore, VectorManager,
};

pub struct Context {
    pub config: AppConfig,
    pub kv: Arc<KvManager>,
    pub doc: Arc<DocManager>,
    pub vector: Arc<VectorManager>,
    pub embedder: Arc<dyn Embedder>,
}

impl Context {
    pub fn new(config: AppConfig) -> Self {
        let kv = Arc::new(KvManager::new(config.clone()));
        let doc = Arc::new(DocManager::new(config.clone()));
        let vector = Arc::new(VectorManager::new(config.clone()));
        let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(
            config.embedder.base_url.clone(),
            config.embedder.model.clone(),
        ));
        Self {
            config,
            kv,
            doc,
            vector,
            embedder,
        }
    }

    pub fn memory_manager(&self) -> MemoryManager {
        let intra = IntraSessionStore::new(self.kv.clone(), self.config.session.intra_session_ttl_secs);
        let inter = InterSessionStore::new(
            self.doc.clone(),
            self.vector.clone(),
            self.kv.clone(),
            self.embedder.clone(),
            self.config.queues.embedding_queue.clone(),
            self.config.features.enable_async_embedding,
        );
        let preferences = self.preference_store();
        MemoryManager::new(
            intra,
            inter,
            preferences,
            self.config.features.enable_async_embedding,
            self.config.retrieval.k,
            self.config.retrieval.min_similarity,
        )
    }

    pub fn preference_store(&self) -> PreferenceStore {
        PreferenceStore::new(
            self.doc.clone(),
            self.kv.clone(),
            self.config.features.enable_redis_cache,
            self.config.session.pref_cache_ttl_secs,
            self.config.queues.pref_queue.clone(),
            self.config.features.enable_pref_extraction,
        )
    }
}
