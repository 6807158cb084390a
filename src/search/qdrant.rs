//! Qdrant-backed catalog index.
//!
//! Catalog ids are arbitrary strings while Qdrant point ids must be integers or
//! UUIDs, so each id is mapped to a name-based UUID and the original id travels
//! in the payload.

use async_trait::async_trait;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, DeleteCollectionBuilder, Distance,
    GetPointsBuilder, PointId, PointStruct, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::embedding::Embedding;
use super::index::{validate_batch, CatalogIndex, CatalogMetadata, IndexHit};
use crate::error::{Error, Result};

fn index_err(e: impl std::fmt::Display) -> Error {
    Error::Index(format!("qdrant: {}", e))
}

/// Deterministic point id for a catalog id.
pub fn point_id(catalog_id: &str) -> PointId {
    PointId::from(Uuid::new_v5(&Uuid::NAMESPACE_OID, catalog_id.as_bytes()).to_string())
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredPayload {
    id: String,
    document: String,
    #[serde(flatten)]
    metadata: CatalogMetadata,
}

/// Catalog index stored in a Qdrant collection with cosine distance.
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
}

impl QdrantIndex {
    pub fn connect(url: &str, collection: impl Into<String>) -> Result<Self> {
        let client = Qdrant::from_url(url).build().map_err(index_err)?;
        Ok(Self {
            client,
            collection: collection.into(),
        })
    }

    async fn exists(&self) -> Result<bool> {
        self.client
            .collection_exists(self.collection.clone())
            .await
            .map_err(index_err)
    }

    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        if self.exists().await? {
            return Ok(());
        }
        info!(
            "Creating qdrant collection {} ({}D, cosine)",
            self.collection, dimension
        );
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine)),
            )
            .await
            .map_err(index_err)?;
        Ok(())
    }
}

#[async_trait]
impl CatalogIndex for QdrantIndex {
    async fn add(
        &self,
        ids: Vec<String>,
        embeddings: Vec<Embedding>,
        metadatas: Vec<CatalogMetadata>,
        documents: Vec<String>,
    ) -> Result<()> {
        validate_batch(&ids, &embeddings, &metadatas, &documents)?;
        let Some(dimension) = embeddings.first().map(|e| e.len()) else {
            return Ok(());
        };
        self.ensure_collection(dimension).await?;

        let point_ids: Vec<PointId> = ids.iter().map(|id| point_id(id)).collect();
        let existing = self
            .client
            .get_points(GetPointsBuilder::new(&self.collection, point_ids.clone()).with_payload(true))
            .await
            .map_err(index_err)?;
        if let Some(found) = existing.result.into_iter().next() {
            let value = serde_json::Value::from(Payload::from(found.payload));
            let id = value
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            return Err(Error::DuplicateId(id));
        }

        let mut points = Vec::with_capacity(ids.len());
        for ((((id, pid), embedding), metadata), document) in ids
            .into_iter()
            .zip(point_ids)
            .zip(embeddings)
            .zip(metadatas)
            .zip(documents)
        {
            let stored = StoredPayload {
                id,
                document,
                metadata,
            };
            let payload = Payload::try_from(serde_json::to_value(&stored)?).map_err(index_err)?;
            points.push(PointStruct::new(pid, embedding, payload));
        }
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(index_err)?;
        Ok(())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<IndexHit>> {
        if top_k == 0 || !self.exists().await? {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, embedding.to_vec(), top_k as u64)
                    .with_payload(true),
            )
            .await
            .map_err(index_err)?;

        response
            .result
            .into_iter()
            .map(|point| {
                let value = serde_json::Value::from(Payload::from(point.payload));
                let stored: StoredPayload = serde_json::from_value(value)?;
                Ok(IndexHit {
                    id: stored.id,
                    document: stored.document,
                    metadata: stored.metadata,
                    distance: Some(1.0 - point.score),
                })
            })
            .collect()
    }

    async fn count(&self) -> Result<usize> {
        if !self.exists().await? {
            return Ok(0);
        }
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await
            .map_err(index_err)?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    /// Drops the whole collection; the next `add` recreates it with the new
    /// vector size.
    async fn clear(&self) -> Result<()> {
        if !self.exists().await? {
            return Ok(());
        }
        info!("Dropping qdrant collection {}", self.collection);
        self.client
            .delete_collection(DeleteCollectionBuilder::new(&self.collection))
            .await
            .map_err(index_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_is_deterministic() {
        assert_eq!(point_id("42"), point_id("42"));
        assert_ne!(point_id("42"), point_id("43"));
    }

    #[test]
    fn test_payload_flattens_metadata() {
        let stored = StoredPayload {
            id: "7".to_string(),
            document: "Java 8\nCore Java\nSkills: java".to_string(),
            metadata: CatalogMetadata {
                name: "Java 8".to_string(),
                test_type: "K".to_string(),
                skills: vec!["java".to_string()],
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&stored).unwrap();
        assert_eq!(value["type"], "K");
        assert_eq!(value["id"], "7");

        let back: StoredPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back.metadata, stored.metadata);
    }
}
