//! Error types for the recommender.

use thiserror::Error;

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the recommendation pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// Embedding backend unreachable, misconfigured, or returned a bad payload.
    #[error("Embedding provider error: {0}")]
    EmbeddingProvider(String),

    /// Intent model backend unreachable or misconfigured.
    #[error("Intent provider error: {0}")]
    IntentProvider(String),

    /// Vector index backend failure.
    #[error("Index error: {0}")]
    Index(String),

    /// An id passed to `add` already exists in the batch or the index.
    #[error("Duplicate catalog id: {0}")]
    DuplicateId(String),

    /// `add` received sequences of different lengths.
    #[error("Invalid index batch: {0}")]
    InvalidBatch(String),

    /// Query vector does not match the dimension the index was built with.
    #[error("Dimension mismatch: index has {expected}, query has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog file could not be read or parsed.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Evaluation query, prediction or ground-truth file could not be used.
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// HTTP API error.
    #[error("API error: {0}")]
    Api(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure originated in an external provider rather than locally.
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            Error::EmbeddingProvider(_) | Error::IntentProvider(_) | Error::Index(_)
        )
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}
