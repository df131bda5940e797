//! [`VectorClient`] backed by `qdrant-client`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, Distance, Filter, PointStruct,
    ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use uuid::Uuid;

use crate::capability::VectorClient;
use crate::schema::{SessionId, UserId, VectorPoint};

pub struct QdrantVectorClient {
    client: Qdrant,
    collection: String,
}

impl QdrantVectorClient {
    pub fn connect(url: &str, collection: &str) -> anyhow::Result<Self> {
        let client = Qdrant::from_url(url).build()?;
        Ok(Self {
            client,
            collection: collection.to_string(),
        })
    }
}

#[async_trait]
impl VectorClient for QdrantVectorClient {
    async fn ensure_collection(&self, dim: usize) -> anyhow::Result<()> {
        // A not-found condition on collection_info means the collection
        // doesn't exist yet; create it. Any other outcome — including a
        // successful lookup — is treated as "exists".
        if self.client.collection_info(&self.collection).await.is_ok() {
            return Ok(());
        }
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(dim as u64, Distance::Cosine)),
            )
            .await?;
        Ok(())
    }

    async fn upsert(&self, point: &VectorPoint) -> bool {
        let mut payload = std::collections::HashMap::new();
        payload.insert("user_id".to_string(), QdrantValue::from(point.user_id.0.clone()));
        payload.insert(
            "session_id".to_string(),
            QdrantValue::from(point.session_id.0.clone()),
        );
        payload.insert("content".to_string(), QdrantValue::from(point.content.clone()));
        payload.insert(
            "created_at".to_string(),
            QdrantValue::from(point.created_at.timestamp()),
        );
        payload.insert("source".to_string(), QdrantValue::from(point.source.clone()));

        let qpoint = PointStruct::new(point.id.to_string(), point.vector.clone(), payload);

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![qpoint]))
            .await
            .inspect_err(|err| tracing::warn!(error = %err, point_id = %point.id, "vector upsert failed"))
            .is_ok()
    }

    async fn search(
        &self,
        user_id: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Vec<(VectorPoint, f32)> {
        let filter = Filter::must([Condition::matches("user_id", user_id.to_string())]);
        let request = SearchPointsBuilder::new(&self.collection, vector.to_vec(), limit as u64)
            .filter(filter)
            .score_threshold(score_threshold)
            .with_payload(true)
            .with_vectors(true);

        let response = match self.client.search_points(request).await {
            Ok(resp) => resp,
            Err(err) => {
                tracing::warn!(error = %err, user_id, "vector search failed");
                return Vec::new();
            }
        };

        response
            .result
            .into_iter()
            .filter_map(|scored| scored_point_to_vector_point(scored))
            .collect()
    }

    async fn count(&self) -> u64 {
        match self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await
        {
            Ok(resp) => resp.result.map(|r| r.count).unwrap_or(0),
            Err(err) => {
                tracing::warn!(error = %err, "vector count failed");
                0
            }
        }
    }
}

fn scored_point_to_vector_point(scored: ScoredPoint) -> Option<(VectorPoint, f32)> {
    let score = scored.score;
    let id = scored
        .id
        .as_ref()
        .and_then(|id| id.point_id_options.as_ref())
        .and_then(|opts| match opts {
            qdrant_client::qdrant::point_id::PointIdOptions::Uuid(s) => Uuid::parse_str(s).ok(),
            qdrant_client::qdrant::point_id::PointIdOptions::Num(_) => None,
        })
        .unwrap_or_else(Uuid::nil);

    let payload = scored.payload;
    let user_id = payload.get("user_id")?.as_str()?.to_string();
    let session_id = payload.get("session_id")?.as_str()?.to_string();
    let content = payload
        .get("content")
        .and_then(|v| v.as_str())
        .map(String::as_str)
        .unwrap_or_default()
        .to_string();
    let source = payload
        .get("source")
        .and_then(|v| v.as_str())
        .map(String::as_str)
        .unwrap_or_default()
        .to_string();
    let created_at = payload
        .get("created_at")
        .and_then(|v| v.as_integer())
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now);

    let vector = scored
        .vectors
        .and_then(|v| v.vectors_options)
        .and_then(|opts| match opts {
            qdrant_client::qdrant::vectors_output::VectorsOptions::Vector(v) => Some(v.data),
            _ => None,
        })
        .unwrap_or_default();

    Some((
        VectorPoint {
            id,
            vector,
            user_id: UserId(user_id),
            session_id: SessionId(session_id),
            content,
            created_at,
            source,
        },
        score,
    ))
}
