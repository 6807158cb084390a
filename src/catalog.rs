//! Catalog ingestion.
//!
//! Reads the scraped catalog (a JSON array of assessment records), normalises
//! missing fields to empty values, embeds each record's document text and bulk
//! inserts the result into a [`CatalogIndex`].

use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{Error, Result};
use crate::search::{CatalogIndex, CatalogMetadata, EmbeddingGateway};

/// One record of the persisted catalog file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(default, rename = "type", deserialize_with = "null_as_default")]
    pub test_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub duration: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub skills: Vec<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl CatalogRecord {
    /// Text that gets embedded. The index stores exactly this string, so any
    /// re-embedding must go through here too.
    pub fn document(&self) -> String {
        format!(
            "{}\n{}\nSkills: {}",
            self.name,
            self.description,
            self.skills.join(", ")
        )
    }

    /// Metadata stored alongside the embedding.
    pub fn metadata(&self) -> CatalogMetadata {
        CatalogMetadata {
            name: self.name.clone(),
            url: self.url.clone(),
            test_type: self.test_type.clone(),
            duration: self.duration.clone(),
            skills: self.skills.clone(),
        }
    }
}

/// Read the catalog JSON file.
pub fn load_catalog(path: impl AsRef<Path>) -> Result<Vec<CatalogRecord>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Catalog(format!("failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&raw)
        .map_err(|e| Error::Catalog(format!("invalid catalog {}: {}", path.display(), e)))
}

/// Embed and index `records`. Ids are the record positions, as strings.
///
/// Returns the number of items written.
pub async fn ingest(
    records: &[CatalogRecord],
    embedder: &dyn EmbeddingGateway,
    index: &dyn CatalogIndex,
) -> Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }
    let ids: Vec<String> = (0..records.len()).map(|i| i.to_string()).collect();
    let documents: Vec<String> = records.iter().map(CatalogRecord::document).collect();
    let metadatas: Vec<CatalogMetadata> = records.iter().map(CatalogRecord::metadata).collect();

    info!(
        "Embedding {} catalog items with {}",
        documents.len(),
        embedder.info().provider
    );
    let embeddings = embedder.embed_documents(&documents).await?;
    index.add(ids, embeddings, metadatas, documents).await?;

    info!("Indexed {} items", records.len());
    Ok(records.len())
}
