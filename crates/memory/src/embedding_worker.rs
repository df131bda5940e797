//! C6: stream consumer that materialises vectors for queued conversations.
//!
//! States: `idle -> reading -> processing -> acking -> idle`. There is no
//! parked state: a backend error sleeps 1s and restarts the loop, leaving
//! the entry un-acked so it is redelivered.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::capability::{Embedder, KVClient};
use crate::connections::{KvManager, VectorManager};
use crate::error::MemoryError;
use crate::schema::{truncate_chars, JobRecord, SessionId, UserId, VectorPoint};

pub struct EmbeddingWorker {
    kv: Arc<KvManager>,
    vector: Arc<VectorManager>,
    embedder: Arc<dyn Embedder>,
    stream: String,
    group: String,
    consumer: String,
    block_ms: u64,
    batch: usize,
}

impl EmbeddingWorker {
    pub fn new(
        kv: Arc<KvManager>,
        vector: Arc<VectorManager>,
        embedder: Arc<dyn Embedder>,
        stream: String,
        group: String,
        consumer: String,
        block_ms: u64,
        batch: usize,
    ) -> Self {
        Self {
            kv,
            vector,
            embedder,
            stream,
            group,
            consumer,
            block_ms,
            batch,
        }
    }

    /// Runs one `idle -> reading -> processing -> acking` iteration: ensures
    /// the consumer group, reads up to `batch` new entries, and embeds each
    /// one. Called in a loop by the supervisor; does not loop itself so a
    /// caller can interleave shutdown checks between iterations.
    pub async fn run_once(&self) {
        let Some(client) = self.kv.client().await else {
            let err = MemoryError::BackendUnavailable("kv".to_string());
            tracing::warn!(consumer = %self.consumer, stream = %self.stream, %err, "backing off");
            tokio::time::sleep(Duration::from_secs(1)).await;
            return;
        };

        // Idempotent: the BUSYGROUP signal is swallowed by the backend impl.
        client.xgroup_create(&self.stream, &self.group).await;

        let entries = client
            .xreadgroup(&self.stream, &self.group, &self.consumer, self.block_ms, self.batch)
            .await;

        for entry in entries {
            let Some(JobRecord::Embedding {
                user_id,
                session_id,
                content,
                ..
            }) = JobRecord::embedding_from_fields(&entry.fields)
            else {
                let err = MemoryError::DecodeError(entry.id.clone());
                tracing::warn!(entry_id = %entry.id, %err, "acking and skipping");
                client.xack(&self.stream, &self.group, &entry.id).await;
                continue;
            };

            self.process(client.as_ref(), &entry.id, &user_id, &session_id, &content)
                .await;
        }
    }

    async fn process(
        &self,
        kv: &dyn KVClient,
        entry_id: &str,
        user_id: &UserId,
        session_id: &SessionId,
        content: &str,
    ) {
        let Some(vector) = self.embedder.embed(content).await else {
            let err = MemoryError::EmbedError(session_id.to_string());
            tracing::warn!(entry_id, %session_id, %err, "entry stays pending for redelivery");
            return;
        };

        let Some(vector_client) = self.vector.client().await else {
            let err = MemoryError::BackendUnavailable("vector".to_string());
            tracing::warn!(entry_id, %session_id, %err, "entry stays pending");
            return;
        };

        let point = VectorPoint {
            id: Uuid::new_v4(),
            vector,
            user_id: user_id.clone(),
            session_id: session_id.clone(),
            content: truncate_chars(content, 500),
            created_at: chrono::Utc::now(),
            source: "worker".to_string(),
        };

        if vector_client.upsert(&point).await {
            kv.xack(&self.stream, &self.group, entry_id).await;
            tracing::debug!(entry_id, %session_id, point_id = %point.id, "embedding job processed");
        } else {
            tracing::warn!(entry_id, %session_id, "vector upsert failed, entry stays pending");
        }
    }
}
