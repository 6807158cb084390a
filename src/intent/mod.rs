//! Query intent extraction.
//!
//! An [`IntentExtractor`] turns a free-text query into an [`IntentRecord`]. The
//! keyword [`HeuristicExtractor`] never fails; the model-backed [`LlmExtractor`]
//! falls back to it when the model answers with something that is not the
//! expected JSON.

mod heuristic;
mod llm;

pub use heuristic::HeuristicExtractor;
pub use llm::{ChatBackend, ExtractionError, LlmExtractor};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{IntentConfig, IntentProviderKind};
use crate::error::Result;

/// Which extractor produced an [`IntentRecord`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentSource {
    #[default]
    Heuristic,
    Model,
}

/// Structured interpretation of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentRecord {
    /// The original query text.
    pub raw: String,
    /// Upper bound on assessment length, if the query states one.
    pub duration_minutes: Option<u32>,
    /// Both technical and behavioral assessments were asked for.
    pub needs_balance: bool,
    pub prefers_tech: bool,
    pub prefers_behavioral: bool,
    pub source: IntentSource,
    /// Model-extracted details; empty for heuristic records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_role: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub technical_skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub soft_skills: Vec<String>,
}

/// Maps a raw query to an [`IntentRecord`].
#[async_trait]
pub trait IntentExtractor: Send + Sync {
    /// Never fails on malformed input. Errors are reserved for an unreachable
    /// model backend.
    async fn parse(&self, query: &str) -> Result<IntentRecord>;
}

/// Build the extractor selected by configuration.
pub fn from_config(config: &IntentConfig) -> Result<Arc<dyn IntentExtractor>> {
    match config.provider {
        IntentProviderKind::Heuristic => Ok(Arc::new(HeuristicExtractor::new())),
        _ => Ok(Arc::new(LlmExtractor::from_config(config)?)),
    }
}
