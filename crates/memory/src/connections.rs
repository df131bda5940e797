//! Lazy-init, health-checked, cached connection managers (C1).
//!
//! Each manager owns at most one client to its backend. `client()` lazily
//! constructs the client on first call, pings the backend, and caches the
//! handle. On construction failure the accessor returns `None`; every
//! downstream store must tolerate this and degrade to a safe empty result —
//! no crash, no retry storm. A failed attempt is itself cached for a short
//! cooldown so a genuinely down backend does not turn every operation into a
//! fresh connection attempt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use memory_config::AppConfig;

use crate::backends::{QdrantVectorClient, RedisKvClient, SqliteDocClient};
use crate::capability::{DocClient, KVClient, VectorClient};
use crate::error::MemoryError;

const RETRY_COOLDOWN: Duration = Duration::from_secs(30);

struct Slot<T: ?Sized> {
    client: Option<Arc<T>>,
    last_failure: Option<Instant>,
}

impl<T: ?Sized> Default for Slot<T> {
    fn default() -> Self {
        Self {
            client: None,
            last_failure: None,
        }
    }
}

impl<T: ?Sized> Slot<T> {
    fn should_retry(&self) -> bool {
        match (&self.client, self.last_failure) {
            (Some(_), _) => false,
            (None, None) => true,
            (None, Some(at)) => at.elapsed() >= RETRY_COOLDOWN,
        }
    }
}

pub struct KvManager {
    config: AppConfig,
    slot: Mutex<Slot<dyn KVClient>>,
}

impl KvManager {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Construct a manager pre-seeded with `client`, bypassing lazy connect.
    /// Used by tests to inject a fake backend.
    pub fn new_with_client(client: Arc<dyn KVClient>) -> Self {
        Self {
            config: AppConfig::default(),
            slot: Mutex::new(Slot {
                client: Some(client),
                last_failure: None,
            }),
        }
    }

    pub async fn client(&self) -> Option<Arc<dyn KVClient>> {
        let mut slot = self.slot.lock().await;
        if let Some(client) = &slot.client {
            return Some(client.clone());
        }
        if !slot.should_retry() {
            return None;
        }
        match RedisKvClient::connect(&self.config.redis.url()).await {
            Ok(client) => {
                let client: Arc<dyn KVClient> = Arc::new(client);
                slot.client = Some(client.clone());
                Some(client)
            }
            Err(err) => {
                let err = MemoryError::from(err);
                tracing::warn!(%err, "kv backend unavailable");
                slot.last_failure = Some(Instant::now());
                None
            }
        }
    }
}

pub struct DocManager {
    config: AppConfig,
    slot: Mutex<Slot<dyn DocClient>>,
}

impl DocManager {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn new_with_client(client: Arc<dyn DocClient>) -> Self {
        Self {
            config: AppConfig::default(),
            slot: Mutex::new(Slot {
                client: Some(client),
                last_failure: None,
            }),
        }
    }

    pub async fn client(&self) -> Option<Arc<dyn DocClient>> {
        let mut slot = self.slot.lock().await;
        if let Some(client) = &slot.client {
            return Some(client.clone());
        }
        if !slot.should_retry() {
            return None;
        }
        match SqliteDocClient::connect(&self.config.sql.path).await {
            Ok(client) => {
                if let Err(err) = client.ensure_indexes().await {
                    tracing::warn!(error = %err, "failed to ensure document-store indexes");
                }
                let client: Arc<dyn DocClient> = Arc::new(client);
                slot.client = Some(client.clone());
                Some(client)
            }
            Err(err) => {
                let err = MemoryError::from(err);
                tracing::warn!(%err, "document backend unavailable");
                slot.last_failure = Some(Instant::now());
                None
            }
        }
    }
}

pub struct VectorManager {
    config: AppConfig,
    slot: Mutex<Slot<dyn VectorClient>>,
}

impl VectorManager {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn new_with_client(client: Arc<dyn VectorClient>) -> Self {
        Self {
            config: AppConfig::default(),
            slot: Mutex::new(Slot {
                client: Some(client),
                last_failure: None,
            }),
        }
    }

    pub async fn client(&self) -> Option<Arc<dyn VectorClient>> {
        let mut slot = self.slot.lock().await;
        if let Some(client) = &slot.client {
            return Some(client.clone());
        }
        if !slot.should_retry() {
            return None;
        }
        match QdrantVectorClient::connect(
            &self.config.vector.qdrant_url,
            &self.config.vector.collection,
        ) {
            Ok(client) => {
                if let Err(err) = client.ensure_collection(self.config.vector.dim).await {
                    tracing::warn!(error = %err, "failed to ensure vector collection");
                }
                let client: Arc<dyn VectorClient> = Arc::new(client);
                slot.client = Some(client.clone());
                Some(client)
            }
            Err(err) => {
                let err = MemoryError::from(err);
                tracing::warn!(%err, "vector backend unavailable");
                slot.last_failure = Some(Instant::now());
                None
            }
        }
    }
}
