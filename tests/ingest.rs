//! Ingestion into the persisted file index, including rebuilds.

use assessment_recommender::search::Embedding;
use assessment_recommender::{
    ingest, open_index, rebuild_index, CatalogIndex, CatalogRecord, EmbeddingGateway, Error,
    ProviderInfo, RecommenderConfig, Result,
};
use async_trait::async_trait;

/// Embeds text as its length, padded to a fixed dimension.
struct LengthEmbedder {
    provider: &'static str,
    dimensions: usize,
}

impl LengthEmbedder {
    fn vector(&self, text: &str) -> Embedding {
        let mut v = vec![1.0; self.dimensions];
        v[0] = text.len() as f32;
        v
    }
}

#[async_trait]
impl EmbeddingGateway for LengthEmbedder {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider: self.provider.to_string(),
            model: "length".to_string(),
            dimensions: self.dimensions,
            description: String::new(),
        }
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        Ok(self.vector(text))
    }
}

const LOCAL: LengthEmbedder = LengthEmbedder {
    provider: "local",
    dimensions: 2,
};

const GEMINI: LengthEmbedder = LengthEmbedder {
    provider: "gemini",
    dimensions: 3,
};

fn records() -> Vec<CatalogRecord> {
    ["Java 8 (New)", "OPQ32r"]
        .iter()
        .map(|name| CatalogRecord {
            name: name.to_string(),
            ..Default::default()
        })
        .collect()
}

fn config(dir: &tempfile::TempDir) -> RecommenderConfig {
    let mut config = RecommenderConfig::default();
    config.index.path = dir.path().join("index").join("catalog.json");
    config
}

#[tokio::test]
async fn test_second_ingest_without_rebuild_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);

    let index = open_index(&config, &LOCAL).await.unwrap();
    assert_eq!(ingest(&records(), &LOCAL, index.as_ref()).await.unwrap(), 2);

    let reopened = open_index(&config, &LOCAL).await.unwrap();
    let again = ingest(&records(), &LOCAL, reopened.as_ref()).await;
    assert!(matches!(again, Err(Error::DuplicateId(id)) if id == "0"));
}

#[tokio::test]
async fn test_rebuild_replaces_existing_items() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);

    let index = open_index(&config, &LOCAL).await.unwrap();
    ingest(&records(), &LOCAL, index.as_ref()).await.unwrap();

    let rebuilt = rebuild_index(&config, &LOCAL).await.unwrap();
    assert_eq!(rebuilt.count().await.unwrap(), 0);
    ingest(&records(), &LOCAL, rebuilt.as_ref()).await.unwrap();

    let reopened = open_index(&config, &LOCAL).await.unwrap();
    assert_eq!(reopened.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_rebuild_switches_embedding_provider() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);

    let index = open_index(&config, &LOCAL).await.unwrap();
    ingest(&records(), &LOCAL, index.as_ref()).await.unwrap();

    assert!(matches!(
        open_index(&config, &GEMINI).await,
        Err(Error::Index(_))
    ));

    let rebuilt = rebuild_index(&config, &GEMINI).await.unwrap();
    ingest(&records(), &GEMINI, rebuilt.as_ref()).await.unwrap();

    let reopened = open_index(&config, &GEMINI).await.unwrap();
    assert_eq!(reopened.count().await.unwrap(), 2);
    let hits = reopened.query(&[6.0, 1.0, 1.0], 1).await.unwrap();
    assert_eq!(hits[0].metadata.name, "OPQ32r");
    assert!(open_index(&config, &LOCAL).await.is_err());
}
