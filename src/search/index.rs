//! Catalog index: nearest-neighbour store over catalog embeddings.
//!
//! The [`CatalogIndex`] trait is what the recommendation engine queries. The
//! bundled [`FileIndex`] keeps every vector in memory, answers queries by brute
//! force cosine distance, and persists itself as a JSON snapshot.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::embedding::Embedding;
use crate::error::{Error, Result};

/// Metadata stored next to each catalog embedding.
///
/// Every field is a concrete value; absent catalog fields are stored as empty
/// strings or lists, never null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogMetadata {
    pub name: String,
    pub url: String,
    /// `K` (technical), `P` (behavioral) or empty.
    #[serde(rename = "type")]
    pub test_type: String,
    pub duration: String,
    pub skills: Vec<String>,
}

/// One nearest-neighbour result.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub document: String,
    pub metadata: CatalogMetadata,
    /// Cosine distance to the query; `None` when the backend did not report one.
    pub distance: Option<f32>,
}

/// A persisted nearest-neighbour store keyed by catalog id.
#[async_trait]
pub trait CatalogIndex: Send + Sync {
    /// Insert a batch. All sequences must have the same length and every id must
    /// be new; otherwise nothing is written.
    async fn add(
        &self,
        ids: Vec<String>,
        embeddings: Vec<Embedding>,
        metadatas: Vec<CatalogMetadata>,
        documents: Vec<String>,
    ) -> Result<()>;

    /// Up to `top_k` hits, nearest first.
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<IndexHit>>;

    /// Number of stored items.
    async fn count(&self) -> Result<usize>;

    /// Remove every item, so the index can be rebuilt with another provider or
    /// metric.
    async fn clear(&self) -> Result<()>;
}

/// Validate batch shape and in-batch id uniqueness.
pub(crate) fn validate_batch(
    ids: &[String],
    embeddings: &[Embedding],
    metadatas: &[CatalogMetadata],
    documents: &[String],
) -> Result<()> {
    let n = ids.len();
    if embeddings.len() != n || metadatas.len() != n || documents.len() != n {
        return Err(Error::InvalidBatch(format!(
            "ids={}, embeddings={}, metadatas={}, documents={}",
            n,
            embeddings.len(),
            metadatas.len(),
            documents.len()
        )));
    }
    if let Some(first) = embeddings.first() {
        if let Some(bad) = embeddings.iter().find(|e| e.len() != first.len()) {
            return Err(Error::DimensionMismatch {
                expected: first.len(),
                actual: bad.len(),
            });
        }
    }
    let mut seen = HashSet::with_capacity(n);
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(Error::DuplicateId(id.clone()));
        }
    }
    Ok(())
}

/// Cosine distance (`1 - cosine similarity`). Zero vectors are maximally distant.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredItem {
    id: String,
    embedding: Embedding,
    metadata: CatalogMetadata,
    document: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    /// Embedding provider that produced the stored vectors.
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    dimension: Option<usize>,
    items: Vec<StoredItem>,
}

/// In-memory cosine index persisted to a JSON file.
pub struct FileIndex {
    path: Option<PathBuf>,
    state: RwLock<Snapshot>,
}

impl FileIndex {
    /// An empty index that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(Snapshot::default()),
        }
    }

    /// Open the snapshot at `path`, or start empty if it does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::Index(format!("corrupt snapshot {}: {}", path.display(), e))
                })?;
                info!(
                    "Loaded {} catalog items from {}",
                    snapshot.items.len(),
                    path.display()
                );
                snapshot
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path),
            state: RwLock::new(snapshot),
        })
    }

    /// Record which embedding provider built this index.
    ///
    /// Fails if the index already holds vectors from a different provider.
    pub async fn bind_provider(&self, provider: &str, dimension: usize) -> Result<()> {
        let mut state = self.state.write().await;
        let built_with = state.provider.as_deref().unwrap_or("an unrecorded provider");
        let provider_differs = state.provider.as_deref().is_some_and(|p| p != provider);
        match state.dimension {
            Some(dim) if dim != dimension || provider_differs => Err(Error::Index(format!(
                "index was built with {} ({}D), not {} ({}D); rebuild it",
                built_with, dim, provider, dimension
            ))),
            _ => {
                state.provider = Some(provider.to_string());
                state.dimension = Some(dimension);
                Ok(())
            }
        }
    }

    /// Provider recorded in the snapshot, if any.
    pub async fn provider(&self) -> Option<String> {
        self.state.read().await.provider.clone()
    }

    async fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec(snapshot)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!("Persisted {} items to {}", snapshot.items.len(), path.display());
        Ok(())
    }
}

#[async_trait]
impl CatalogIndex for FileIndex {
    async fn add(
        &self,
        ids: Vec<String>,
        embeddings: Vec<Embedding>,
        metadatas: Vec<CatalogMetadata>,
        documents: Vec<String>,
    ) -> Result<()> {
        validate_batch(&ids, &embeddings, &metadatas, &documents)?;
        let mut state = self.state.write().await;

        let existing: HashSet<&str> = state.items.iter().map(|i| i.id.as_str()).collect();
        if let Some(dup) = ids.iter().find(|id| existing.contains(id.as_str())) {
            return Err(Error::DuplicateId(dup.clone()));
        }
        if let (Some(expected), Some(first)) = (state.dimension, embeddings.first()) {
            if first.len() != expected {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: first.len(),
                });
            }
        }

        let mut next = state.clone();
        if next.dimension.is_none() {
            next.dimension = embeddings.first().map(|e| e.len());
        }
        next.items.extend(
            ids.into_iter()
                .zip(embeddings)
                .zip(metadatas)
                .zip(documents)
                .map(|(((id, embedding), metadata), document)| StoredItem {
                    id,
                    embedding,
                    metadata,
                    document,
                }),
        );
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<IndexHit>> {
        let state = self.state.read().await;
        if let Some(expected) = state.dimension {
            if embedding.len() != expected {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }

        let mut scored: Vec<(f32, &StoredItem)> = state
            .items
            .iter()
            .map(|item| (cosine_distance(embedding, &item.embedding), item))
            .collect();
        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.id.cmp(&b.1.id))
        });

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(distance, item)| IndexHit {
                id: item.id.clone(),
                document: item.document.clone(),
                metadata: item.metadata.clone(),
                distance: Some(distance),
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.state.read().await.items.len())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let empty = Snapshot::default();
        self.persist(&empty).await?;
        info!("Cleared {} catalog items", state.items.len());
        *state = empty;
        Ok(())
    }
}
