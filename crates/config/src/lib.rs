use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
        }
    }
}

impl RedisConfig {
    /// Render a `redis://[:password@]host:port` connection URL.
    pub fn url(&self) -> String {
        match &self.password {
            Some(pw) if !pw.is_empty() => format!("redis://:{pw}@{}:{}", self.host, self.port),
            _ => format!("redis://{}:{}", self.host, self.port),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlConfig {
    pub path: String,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            path: ".memory/conversations.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub qdrant_url: String,
    pub dim: usize,
    pub collection: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            qdrant_url: "http://127.0.0.1:6334".to_string(),
            dim: 1536,
            collection: "conversations".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub use_legacy_memory: bool,
    pub enable_redis_cache: bool,
    pub enable_async_embedding: bool,
    pub enable_pref_extraction: bool,
    pub enable_pref_llm_extraction: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            use_legacy_memory: false,
            enable_redis_cache: true,
            enable_async_embedding: true,
            enable_pref_extraction: true,
            enable_pref_llm_extraction: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalDefaults {
    pub k: usize,
    pub min_similarity: f32,
}

impl Default for RetrievalDefaults {
    fn default() -> Self {
        Self {
            k: 6,
            min_similarity: 0.40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub embedding_queue: String,
    pub pref_queue: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            embedding_queue: "embedding_queue".to_string(),
            pref_queue: "preference_queue".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sliding TTL, in seconds, applied to `session:{id}` keys on every append.
    pub intra_session_ttl_secs: u64,
    /// TTL, in seconds, applied to the `pref:{user_id}` read-through cache entry.
    pub pref_cache_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            intra_session_ttl_secs: 7200,
            pref_cache_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub sql: SqlConfig,
    pub vector: VectorConfig,
    pub features: FeatureFlags,
    pub retrieval: RetrievalDefaults,
    pub queues: QueueConfig,
    pub session: SessionConfig,
    pub embedder: EmbedderConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("REDIS_HOST") {
            if !value.is_empty() {
                config.redis.host = value;
            }
        }
        if let Ok(value) = env::var("REDIS_PORT") {
            if let Ok(port) = value.parse() {
                config.redis.port = port;
            }
        }
        if let Ok(value) = env::var("REDIS_PASSWORD") {
            if !value.is_empty() {
                config.redis.password = Some(value);
            }
        }
        if let Ok(value) = env::var("QDRANT_URL") {
            if !value.is_empty() {
                config.vector.qdrant_url = value;
            }
        }
        if let Ok(value) = env::var("VECTOR_DIM") {
            if let Ok(dim) = value.parse() {
                config.vector.dim = dim;
            }
        }
        if let Ok(value) = env::var("INTRA_SESSION_TTL") {
            if let Ok(ttl) = value.parse() {
                config.session.intra_session_ttl_secs = ttl;
            }
        }
        if let Ok(value) = env::var("DEFAULT_RETRIEVAL_K") {
            if let Ok(k) = value.parse() {
                config.retrieval.k = k;
            }
        }
        if let Ok(value) = env::var("MIN_SIMILARITY") {
            if let Ok(sim) = value.parse() {
                config.retrieval.min_similarity = sim;
            }
        }
        if let Ok(value) = env::var("EMBEDDING_QUEUE") {
            if !value.is_empty() {
                config.queues.embedding_queue = value;
            }
        }
        if let Ok(value) = env::var("PREF_QUEUE") {
            if !value.is_empty() {
                config.queues.pref_queue = value;
            }
        }
        apply_flag_env(&mut config.features.use_legacy_memory, "USE_LEGACY_MEMORY");
        apply_flag_env(&mut config.features.enable_redis_cache, "ENABLE_REDIS_CACHE");
        apply_flag_env(&mut config.features.enable_async_embedding, "ENABLE_ASYNC_EMBEDDING");
        apply_flag_env(&mut config.features.enable_pref_extraction, "ENABLE_PREF_EXTRACTION");
        apply_flag_env(&mut config.features.enable_pref_llm_extraction, "ENABLE_PREF_LLM_EXTRACTION");

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

fn apply_flag_env(target: &mut bool, key: &str) {
    if let Ok(value) = env::var(key) {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => *target = true,
            "0" | "false" | "no" | "off" => *target = false,
            _ => {}
        }
    }
}
