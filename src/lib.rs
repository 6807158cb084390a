//! Assessment recommender.
//!
//! Recommends assessment products for a free-text query (typically a job
//! description): the query is embedded, the nearest catalog items are retrieved,
//! filtered by any duration ceiling the query states, and rebalanced between
//! technical and behavioral assessments when the query asks for both.

pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod intent;
pub mod recommend;
pub mod search;

pub use api::{ApiServer, AppState, RecommendationRequest, RecommendationResponse};
pub use catalog::{ingest, load_catalog, CatalogRecord};
pub use config::{
    ApiSettings, EmbeddingProviderKind, IndexBackend, IntentProviderKind, RecommendConfig,
    RecommenderConfig, UnknownDurationPolicy,
};
pub use error::{Error, Result};
pub use evaluate::{generate_predictions, mean_recall_at_k, LabelledUrl, RecallReport};
pub use intent::{HeuristicExtractor, IntentExtractor, IntentRecord, IntentSource, LlmExtractor};
pub use recommend::{balance, Candidate, RecommendationEngine};
pub use search::{
    CatalogIndex, CatalogMetadata, EmbeddingGateway, EmbeddingProviders, FileIndex, IndexHit,
    ProviderInfo, QdrantIndex,
};

use std::sync::Arc;

/// Open the index backend selected by configuration.
///
/// The file backend is bound to the active embedding provider so an index built
/// with one provider is never queried with another.
pub async fn open_index(
    config: &RecommenderConfig,
    embedder: &dyn EmbeddingGateway,
) -> Result<Arc<dyn CatalogIndex>> {
    match config.index.backend {
        IndexBackend::File => {
            let index = FileIndex::open(&config.index.path).await?;
            let info = embedder.info();
            index.bind_provider(&info.provider, info.dimensions).await?;
            Ok(Arc::new(index))
        }
        IndexBackend::Qdrant => Ok(Arc::new(QdrantIndex::connect(
            &config.index.qdrant_url,
            config.index.collection.clone(),
        )?)),
    }
}

/// Open the configured index with every item removed, bound to `embedder`.
///
/// Used to re-ingest the catalog, including after a change of embedding provider.
pub async fn rebuild_index(
    config: &RecommenderConfig,
    embedder: &dyn EmbeddingGateway,
) -> Result<Arc<dyn CatalogIndex>> {
    match config.index.backend {
        IndexBackend::File => {
            let index = FileIndex::open(&config.index.path).await?;
            index.clear().await?;
            let info = embedder.info();
            index.bind_provider(&info.provider, info.dimensions).await?;
            Ok(Arc::new(index))
        }
        IndexBackend::Qdrant => {
            let index =
                QdrantIndex::connect(&config.index.qdrant_url, config.index.collection.clone())?;
            index.clear().await?;
            Ok(Arc::new(index))
        }
    }
}

/// Wire up a [`RecommendationEngine`] from configuration.
pub async fn build_engine(
    config: &RecommenderConfig,
    providers: &EmbeddingProviders,
) -> Result<RecommendationEngine> {
    let embedder = providers.active().await?;
    let index = open_index(config, embedder.as_ref()).await?;
    let intent = intent::from_config(&config.intent)?;
    Ok(RecommendationEngine::new(
        intent,
        embedder,
        index,
        config.recommend.clone(),
    ))
}
