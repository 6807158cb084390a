//! Embedding gateway.
//!
//! [`EmbeddingGateway`] is the capability interface the pipeline depends on. The
//! concrete backend (local fastembed model, OpenAI, Gemini) is chosen once from
//! configuration and handed out through [`EmbeddingProviders`], which builds each
//! backend at most once per process.

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::remote::{GeminiEmbedder, OpenAiEmbedder};
use super::{DEFAULT_MODEL, EMBEDDING_DIM};
use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::error::{Error, Result};

/// A dense embedding vector.
pub type Embedding = Vec<f32>;

/// Description of the active embedding backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub description: String,
}

/// Maps text to fixed-dimension vectors.
///
/// Document-side and query-side embeddings may live in different regions of the
/// vector space for the same text; an index must be queried with the same
/// provider that built it.
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Provider and model details.
    fn info(&self) -> ProviderInfo;

    /// Vector length produced by every method of this gateway.
    fn dimension(&self) -> usize {
        self.info().dimensions
    }

    /// Embed a batch of documents. Output order and length match the input.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Embed a single document.
    async fn embed_document(&self, text: &str) -> Result<Embedding> {
        let mut out = self.embed_documents(&[text.to_string()]).await?;
        out.pop().ok_or_else(|| {
            Error::EmbeddingProvider(format!("{} returned no embedding", self.info().provider))
        })
    }

    /// Embed a search query.
    async fn embed_query(&self, text: &str) -> Result<Embedding>;
}

/// Check that a provider answered with one vector of the right size per input.
pub(crate) fn check_batch(
    provider: &str,
    expected_len: usize,
    dimension: usize,
    embeddings: &[Embedding],
) -> Result<()> {
    if embeddings.len() != expected_len {
        return Err(Error::EmbeddingProvider(format!(
            "{} returned {} embeddings for {} inputs",
            provider,
            embeddings.len(),
            expected_len
        )));
    }
    if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
        return Err(Error::EmbeddingProvider(format!(
            "{} returned a {}-dimensional vector, expected {}",
            provider,
            bad.len(),
            dimension
        )));
    }
    Ok(())
}

/// Local embedding model (fastembed / ONNX, all-MiniLM-L6-v2).
pub struct LocalEmbedder {
    model: Arc<TextEmbedding>,
    batch_size: usize,
}

impl LocalEmbedder {
    /// Load the model, downloading it on first use.
    ///
    /// Loading is blocking; call from a blocking context or via [`LocalEmbedder::load`].
    pub fn new(batch_size: usize) -> Result<Self> {
        let options =
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false);
        let model = TextEmbedding::try_new(options).map_err(|e| {
            Error::EmbeddingProvider(format!("failed to load {}: {}", DEFAULT_MODEL, e))
        })?;
        Ok(Self {
            model: Arc::new(model),
            batch_size: batch_size.max(1),
        })
    }

    /// Load the model on the blocking thread pool.
    pub async fn load(batch_size: usize) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::new(batch_size))
            .await
            .map_err(|e| Error::EmbeddingProvider(format!("model load task failed: {}", e)))?
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Embedding>> {
        let expected = texts.len();
        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let embeddings = tokio::task::spawn_blocking(move || model.embed(texts, Some(batch_size)))
            .await
            .map_err(|e| Error::EmbeddingProvider(format!("embedding task failed: {}", e)))?
            .map_err(|e| Error::EmbeddingProvider(format!("local model error: {}", e)))?;
        check_batch("local", expected, EMBEDDING_DIM, &embeddings)?;
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingGateway for LocalEmbedder {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider: EmbeddingProviderKind::Local.to_string(),
            model: DEFAULT_MODEL.to_string(),
            dimensions: EMBEDDING_DIM,
            description: "fastembed all-MiniLM-L6-v2 (384D, local)".to_string(),
        }
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed(texts.to_vec()).await
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        let mut out = self.embed(vec![text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| Error::EmbeddingProvider("local model returned no embedding".into()))
    }
}

/// Query-embedding cache in front of another gateway.
///
/// Document embeddings pass straight through; only `embed_query` is cached.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingGateway>,
    cache: Cache<String, Embedding>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingGateway>, capacity: u64) -> Self {
        Self {
            inner,
            cache: Cache::new(capacity),
        }
    }

    /// Number of cached query vectors.
    pub fn cached_entries(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl EmbeddingGateway for CachedEmbedder {
    fn info(&self) -> ProviderInfo {
        self.inner.info()
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        self.inner.embed_documents(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        if let Some(hit) = self.cache.get(text).await {
            debug!("query embedding cache hit");
            return Ok(hit);
        }
        let embedding = self.inner.embed_query(text).await?;
        self.cache.insert(text.to_string(), embedding.clone()).await;
        Ok(embedding)
    }
}

/// Lazily constructed embedding backends, one per provider kind.
///
/// Each backend is built on first request and shared for the life of the
/// process; concurrent first requests wait on the same initialisation.
pub struct EmbeddingProviders {
    config: EmbeddingConfig,
    cells: HashMap<EmbeddingProviderKind, OnceCell<Arc<dyn EmbeddingGateway>>>,
}

impl EmbeddingProviders {
    pub fn new(config: EmbeddingConfig) -> Self {
        let cells = [
            EmbeddingProviderKind::Local,
            EmbeddingProviderKind::OpenAi,
            EmbeddingProviderKind::Gemini,
        ]
        .into_iter()
        .map(|kind| (kind, OnceCell::new()))
        .collect();
        Self { config, cells }
    }

    /// The backend selected by configuration.
    pub async fn active(&self) -> Result<Arc<dyn EmbeddingGateway>> {
        self.get(self.config.provider).await
    }

    /// Get (building if needed) the backend for `kind`.
    pub async fn get(&self, kind: EmbeddingProviderKind) -> Result<Arc<dyn EmbeddingGateway>> {
        let cell = self
            .cells
            .get(&kind)
            .ok_or_else(|| Error::Config(format!("no slot for provider {}", kind)))?;
        let gateway = cell
            .get_or_try_init(|| async {
                info!("Initializing {} embedding provider", kind);
                build_gateway(kind, &self.config).await
            })
            .await?;
        Ok(Arc::clone(gateway))
    }

    /// Whether the backend for `kind` has been built.
    pub fn is_initialized(&self, kind: EmbeddingProviderKind) -> bool {
        self.cells
            .get(&kind)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }
}

async fn build_gateway(
    kind: EmbeddingProviderKind,
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingGateway>> {
    let base: Arc<dyn EmbeddingGateway> = match kind {
        EmbeddingProviderKind::Local => Arc::new(LocalEmbedder::load(config.batch_size).await?),
        EmbeddingProviderKind::OpenAi => Arc::new(OpenAiEmbedder::from_config(config)?),
        EmbeddingProviderKind::Gemini => Arc::new(GeminiEmbedder::from_config(config)?),
    };
    if config.query_cache_capacity > 0 {
        Ok(Arc::new(CachedEmbedder::new(
            base,
            config.query_cache_capacity,
        )))
    } else {
        Ok(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        query_calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingGateway for CountingEmbedder {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                provider: "counting".to_string(),
                model: "test".to_string(),
                dimensions: 2,
                description: String::new(),
            }
        }

        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        async fn embed_query(&self, text: &str) -> Result<Embedding> {
            self.query_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 0.0])
        }
    }

    #[tokio::test]
    async fn test_cached_embedder_reuses_query_vectors() {
        let inner = Arc::new(CountingEmbedder {
            query_calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(inner.clone(), 16);

        let first = cached.embed_query("java developer").await.unwrap();
        let second = cached.embed_query("java developer").await.unwrap();
        cached.embed_query("sales manager").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.query_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_default_embed_document_uses_batch() {
        let embedder = CountingEmbedder {
            query_calls: AtomicUsize::new(0),
        };
        let vector = embedder.embed_document("abc").await.unwrap();
        assert_eq!(vector, vec![3.0, 1.0]);
        assert_eq!(embedder.dimension(), 2);
    }

    #[test]
    fn test_check_batch_rejects_wrong_count_and_dimension() {
        let good = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        assert!(check_batch("p", 2, 2, &good).is_ok());
        assert!(matches!(
            check_batch("p", 3, 2, &good),
            Err(Error::EmbeddingProvider(_))
        ));
        assert!(matches!(
            check_batch("p", 2, 3, &good),
            Err(Error::EmbeddingProvider(_))
        ));
    }

    #[tokio::test]
    async fn test_remote_provider_without_key_fails_and_stays_uninitialized() {
        let config = EmbeddingConfig {
            provider: EmbeddingProviderKind::OpenAi,
            openai_api_key: None,
            ..Default::default()
        };
        let providers = EmbeddingProviders::new(config);
        let result = providers.active().await;
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(!providers.is_initialized(EmbeddingProviderKind::OpenAi));
    }
}
