//! Semantic retrieval over the assessment catalog.
//!
//! Provides vector-based nearest-neighbour retrieval using:
//! - FastEmbed for local embedding generation (ONNX-based, lightweight)
//! - OpenAI / Gemini REST embeddings as remote alternatives
//! - A file-backed cosine index, or Qdrant, for vector storage
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐
//! │  Catalog item / │────▶│ EmbeddingGateway │
//! │   user query    │     │ local/openai/gem │
//! └─────────────────┘     └────────┬─────────┘
//!                                  │
//!                                  ▼
//!                          ┌──────────────┐
//!                          │   Embedding  │
//!                          │   Vec<f32>   │
//!                          └──────┬───────┘
//!                                 │
//!                    ┌────────────┴────────────┐
//!                    ▼                         ▼
//!              ┌───────────┐            ┌────────────┐
//!              │ FileIndex │            │ QdrantIndex│
//!              │  (JSON)   │            │  (remote)  │
//!              └─────┬─────┘            └─────┬──────┘
//!                    └────────────┬───────────┘
//!                                 ▼
//!                         ┌──────────────┐
//!                         │  IndexHit    │
//!                         │ nearest first│
//!                         └──────────────┘
//! ```

mod embedding;
mod index;
mod qdrant;
mod remote;

pub use embedding::{
    CachedEmbedder, Embedding, EmbeddingGateway, EmbeddingProviders, LocalEmbedder, ProviderInfo,
};
pub use index::{cosine_distance, CatalogIndex, CatalogMetadata, FileIndex, IndexHit};
pub use qdrant::QdrantIndex;
pub use remote::{
    openai_model_dimension, GeminiEmbedder, OpenAiEmbedder, GEMINI_EMBEDDING_DIM,
    OPENAI_EMBEDDING_DIM,
};

/// Default local embedding model (all-MiniLM-L6-v2 - 384 dimensions, good balance of speed/quality)
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Embedding dimension for the default model
pub const EMBEDDING_DIM: usize = 384;
