//! C4: per-user preference map with optimistic versioning and a
//! read-through cache.

use std::sync::Arc;

use crate::connections::{DocManager, KvManager};
use crate::error::MemoryError;
use crate::schema::UserId;

pub struct PreferenceStore {
    doc: Arc<DocManager>,
    kv: Arc<KvManager>,
    cache_enabled: bool,
    cache_ttl_secs: u64,
    pref_queue: String,
    enable_extraction: bool,
}

/// Preferences decorated with the version they were read at, mirroring the
/// source's `{...preferences, _version}` shape.
#[derive(Debug, Clone)]
pub struct VersionedPreferences {
    pub preferences: serde_json::Value,
    pub version: i64,
}

impl PreferenceStore {
    pub fn new(
        doc: Arc<DocManager>,
        kv: Arc<KvManager>,
        cache_enabled: bool,
        cache_ttl_secs: u64,
        pref_queue: String,
        enable_extraction: bool,
    ) -> Self {
        Self {
            doc,
            kv,
            cache_enabled,
            cache_ttl_secs,
            pref_queue,
            enable_extraction,
        }
    }

    fn cache_key(user_id: &str) -> String {
        format!("pref:{user_id}")
    }

    pub async fn get(&self, user_id: &UserId) -> Option<VersionedPreferences> {
        if self.cache_enabled {
            if let Some(client) = self.kv.client().await {
                if let Some(raw) = client.get(&Self::cache_key(user_id)).await {
                    if let Ok(cached) = serde_json::from_str::<CachedPreferences>(&raw) {
                        return Some(VersionedPreferences {
                            preferences: cached.preferences,
                            version: cached.version,
                        });
                    }
                }
            }
        }

        let client = self.doc.client().await?;
        let doc = client.get_preferences(user_id).await?;
        let versioned = VersionedPreferences {
            preferences: doc.preferences,
            version: doc.version,
        };
        self.warm_cache(user_id, &versioned).await;
        Some(versioned)
    }

    async fn warm_cache(&self, user_id: &str, versioned: &VersionedPreferences) {
        if !self.cache_enabled {
            return;
        }
        let Some(client) = self.kv.client().await else {
            return;
        };
        let cached = CachedPreferences {
            preferences: versioned.preferences.clone(),
            version: versioned.version,
        };
        if let Ok(encoded) = serde_json::to_string(&cached) {
            client
                .set_ex(&Self::cache_key(user_id), &encoded, self.cache_ttl_secs)
                .await;
        }
    }

    /// `expected_version = None` is a blind upsert. `Some(v)` only writes if
    /// the stored version still equals `v`. On success the cache entry is
    /// invalidated so the next `get` re-reads the fresh version.
    pub async fn set(
        &self,
        user_id: &UserId,
        preferences: &serde_json::Value,
        expected_version: Option<i64>,
    ) -> bool {
        let Some(client) = self.doc.client().await else {
            return false;
        };
        let ok = client
            .set_preferences(user_id, preferences, expected_version)
            .await;
        if ok {
            if let Some(kv) = self.kv.client().await {
                kv.del(&Self::cache_key(user_id)).await;
            }
        } else if let Some(expected) = expected_version {
            let err = MemoryError::VersionConflict { expected };
            tracing::debug!(%user_id, %err, "preference write lost the race");
        }
        ok
    }

    /// Read-modify-write convenience. Best-effort last-write-wins: does
    /// **not** pass `expected_version`.
    pub async fn update_one(&self, user_id: &UserId, key: &str, value: serde_json::Value) -> bool {
        let current = self
            .get(user_id)
            .await
            .map(|v| v.preferences)
            .unwrap_or_else(|| serde_json::json!({}));

        let mut merged = current;
        if let Some(map) = merged.as_object_mut() {
            map.insert(key.to_string(), value);
        } else {
            merged = serde_json::json!({ key: value });
        }

        self.set(user_id, &merged, None).await
    }

    pub async fn enqueue_extraction(&self, user_id: &UserId, session_id: &str) -> bool {
        if !self.enable_extraction {
            return false;
        }
        let Some(client) = self.kv.client().await else {
            return false;
        };
        client
            .xadd(
                &self.pref_queue,
                &[("user_id", &**user_id), ("session_id", session_id)],
            )
            .await
            .is_some()
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CachedPreferences {
    preferences: serde_json::Value,
    version: i64,
}
