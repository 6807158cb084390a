//! Service configuration.
//!
//! Loaded from a TOML file; every section and key has a default so a partial (or
//! missing) file still yields a usable configuration. Secrets and provider
//! selection can be overridden from the environment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommenderConfig {
    pub api: ApiSettings,
    pub embedding: EmbeddingConfig,
    pub intent: IntentConfig,
    pub index: IndexConfig,
    pub recommend: RecommendConfig,
}

impl RecommenderConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: RecommenderConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let rendered = toml::to_string_pretty(self)?;
        std::fs::write(path, rendered)?;
        Ok(())
    }

    /// Apply environment overrides (provider selection, API keys, index path).
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("EMBEDDING_PROVIDER") {
            self.embedding.provider = provider.parse()?;
        }
        if let Some(provider) = lookup("LLM_PROVIDER") {
            self.intent.provider = provider.parse()?;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.embedding.openai_api_key = Some(key.clone());
            self.intent.openai_api_key = Some(key);
        }
        if let Some(key) = lookup("GOOGLE_API_KEY") {
            self.embedding.gemini_api_key = Some(key.clone());
            self.intent.gemini_api_key = Some(key);
        }
        if let Some(key) = lookup("GROQ_API_KEY") {
            self.intent.groq_api_key = Some(key);
        }
        if let Some(path) = lookup("INDEX_PATH") {
            self.index.path = PathBuf::from(path);
        }
        self.validate()
    }

    /// Reject settings the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.recommend.oversample == 0 {
            return Err(Error::Config(
                "recommend.oversample must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.recommend.tech_ratio) {
            return Err(Error::Config(format!(
                "recommend.tech_ratio must be within [0, 1], got {}",
                self.recommend.tech_ratio
            )));
        }
        if self.api.max_top_k == 0 {
            return Err(Error::Config("api.max_top_k must be at least 1".to_string()));
        }
        if self.embedding.batch_size == 0 {
            return Err(Error::Config(
                "embedding.batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub listen_address: String,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
    /// `top_k` used when a request omits it.
    pub default_top_k: usize,
    /// Upper bound applied to requested `top_k`.
    pub max_top_k: usize,
    /// Global quota for `/recommend`; 0 disables rate limiting.
    pub requests_per_minute: u32,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8000".to_string(),
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
            default_top_k: 10,
            max_top_k: 50,
            requests_per_minute: 0,
        }
    }
}

/// Embedding backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// fastembed running on the local CPU.
    #[default]
    Local,
    /// OpenAI embeddings REST API.
    OpenAi,
    /// Google Gemini embeddings REST API.
    Gemini,
}

impl EmbeddingProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingProviderKind::Local => "local",
            EmbeddingProviderKind::OpenAi => "openai",
            EmbeddingProviderKind::Gemini => "gemini",
        }
    }
}

impl fmt::Display for EmbeddingProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(EmbeddingProviderKind::Local),
            "openai" => Ok(EmbeddingProviderKind::OpenAi),
            "gemini" => Ok(EmbeddingProviderKind::Gemini),
            other => Err(Error::Config(format!(
                "unknown embedding provider '{}'",
                other
            ))),
        }
    }
}

/// Embedding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub openai_model: String,
    pub openai_base_url: String,
    /// Output size for OpenAI models; required for models not known by name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_dimensions: Option<usize>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub timeout_secs: u64,
    /// Max texts per document-embedding request.
    pub batch_size: usize,
    /// Query embeddings kept in memory; 0 disables the cache.
    pub query_cache_capacity: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            openai_model: "text-embedding-3-large".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_dimensions: None,
            gemini_model: "models/text-embedding-004".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout_secs: 30,
            batch_size: 32,
            query_cache_capacity: 1024,
            openai_api_key: None,
            gemini_api_key: None,
        }
    }
}

/// Intent extractor selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentProviderKind {
    /// Keyword heuristic only; no model calls.
    #[default]
    Heuristic,
    Gemini,
    Groq,
    OpenAi,
}

impl FromStr for IntentProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "heuristic" | "none" => Ok(IntentProviderKind::Heuristic),
            "gemini" => Ok(IntentProviderKind::Gemini),
            "groq" => Ok(IntentProviderKind::Groq),
            "openai" => Ok(IntentProviderKind::OpenAi),
            other => Err(Error::Config(format!("unknown LLM provider '{}'", other))),
        }
    }
}

/// Intent extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentConfig {
    pub provider: IntentProviderKind,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub groq_model: String,
    pub groq_base_url: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groq_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            provider: IntentProviderKind::default(),
            gemini_model: "gemini-pro".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            groq_model: "llama-3.3-70b-versatile".to_string(),
            groq_base_url: "https://api.groq.com/openai/v1".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.3,
            timeout_secs: 30,
            gemini_api_key: None,
            groq_api_key: None,
            openai_api_key: None,
        }
    }
}

/// Vector index backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// In-process index persisted as a JSON snapshot.
    #[default]
    File,
    /// Remote Qdrant collection.
    Qdrant,
}

/// Index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    /// Snapshot location for the file backend.
    pub path: PathBuf,
    pub qdrant_url: String,
    pub collection: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::default(),
            path: PathBuf::from(".index/catalog.json"),
            qdrant_url: "http://localhost:6334".to_string(),
            collection: "assessment_catalog".to_string(),
        }
    }
}

/// How candidates with an unparseable duration are treated by the duration filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownDurationPolicy {
    /// Unknown duration passes any ceiling.
    #[default]
    Keep,
    /// Unknown duration is excluded whenever a ceiling is set.
    Drop,
}

/// Retrieval and balancing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendConfig {
    /// Nearest neighbours fetched per query, independent of `top_k`.
    pub oversample: usize,
    /// Share of technical items when balancing.
    pub tech_ratio: f64,
    pub unknown_duration: UnknownDurationPolicy,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            oversample: 50,
            tech_ratio: 0.6,
            unknown_duration: UnknownDurationPolicy::Keep,
        }
    }
}
