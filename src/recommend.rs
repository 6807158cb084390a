//! Recommendation engine.
//!
//! Pipeline per request:
//!
//! ```text
//! query ──▶ IntentExtractor ──▶ IntentRecord ─────────────────────┐
//!   │                                                             ▼
//!   └──▶ EmbeddingGateway ──▶ CatalogIndex (50 nearest) ──▶ score, duration filter,
//!                                                            sort, balance ──▶ top-k
//! ```
//!
//! The engine only reads from the index and keeps no state between requests.

use regex::Regex;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tracing::{debug, info};

use crate::config::{RecommendConfig, UnknownDurationPolicy};
use crate::error::Result;
use crate::intent::{IntentExtractor, IntentRecord};
use crate::search::{CatalogIndex, EmbeddingGateway, IndexHit};

/// Catalog type code for technical (knowledge & skills) assessments.
pub const TECHNICAL_TYPE: &str = "K";

/// Catalog type code for behavioral (personality & behaviour) assessments.
pub const BEHAVIORAL_TYPE: &str = "P";

static FIRST_INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// A catalog item scored for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub url: String,
    pub test_type: String,
    pub duration: String,
    pub skills: Vec<String>,
    /// `1 - cosine distance`; higher is more similar.
    pub score: f64,
    /// Embedded text, kept for debugging only.
    #[serde(skip)]
    pub document: String,
}

impl Candidate {
    /// Build a candidate from an index hit. A missing distance scores `0.0`.
    pub fn from_hit(hit: IndexHit) -> Self {
        let score = hit.distance.map(|d| 1.0 - d as f64).unwrap_or(0.0);
        let meta = hit.metadata;
        let name = if meta.name.is_empty() && !meta.url.is_empty() {
            display_name_from_url(&meta.url)
        } else {
            meta.name
        };
        Self {
            id: hit.id,
            name,
            url: meta.url,
            test_type: meta.test_type,
            duration: meta.duration,
            skills: meta.skills,
            score,
            document: hit.document,
        }
    }

    pub fn is_technical(&self) -> bool {
        self.test_type == TECHNICAL_TYPE
    }

    pub fn is_behavioral(&self) -> bool {
        self.test_type == BEHAVIORAL_TYPE
    }
}

/// Human-readable name from the last path segment of a catalog URL.
///
/// `.../view/verify-numerical_ability/` becomes `Verify Numerical Ability`.
pub fn display_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let segment = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    segment
        .replace(['-', '_'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Minutes described by a catalog duration string, if any integer is present.
///
/// Strings mentioning "hour" count the first integer (default 1) as hours.
pub fn parse_duration_minutes(duration: &str) -> Option<u32> {
    let lower = duration.to_lowercase();
    let first = FIRST_INTEGER
        .find(&lower)
        .and_then(|m| m.as_str().parse::<u32>().ok());
    if lower.contains("hour") {
        Some(first.unwrap_or(1).saturating_mul(60))
    } else {
        first
    }
}

/// Whether `candidate` fits under a duration ceiling.
pub fn within_duration(candidate: &Candidate, ceiling: u32, policy: UnknownDurationPolicy) -> bool {
    match parse_duration_minutes(&candidate.duration) {
        Some(minutes) => minutes <= ceiling,
        None => policy == UnknownDurationPolicy::Keep,
    }
}

/// Split the top `k` between technical and behavioral items when the intent asks
/// for both.
///
/// `candidates` must already be sorted best-first. With balancing, the result is
/// up to `round(k * tech_ratio)` technical items followed by behavioral items,
/// then any shortfall filled from the remaining candidates in their original
/// order.
pub fn balance(
    candidates: Vec<Candidate>,
    intent: &IntentRecord,
    k: usize,
    tech_ratio: f64,
) -> Vec<Candidate> {
    if !intent.needs_balance {
        let mut out = candidates;
        out.truncate(k);
        return out;
    }

    let tech_n = (((k as f64) * tech_ratio).round() as usize).min(k);
    let beh_n = k - tech_n;

    let mut picked = vec![false; candidates.len()];
    let mut order: Vec<usize> = Vec::with_capacity(k);
    let technical = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_technical())
        .take(tech_n);
    let behavioral = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_behavioral())
        .take(beh_n);
    for (i, _) in technical.chain(behavioral) {
        picked[i] = true;
        order.push(i);
    }
    for (i, taken) in picked.iter_mut().enumerate() {
        if order.len() >= k {
            break;
        }
        if !*taken {
            *taken = true;
            order.push(i);
        }
    }
    order.truncate(k);

    let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

/// Retrieval-and-balancing pipeline over injected providers.
pub struct RecommendationEngine {
    intent: Arc<dyn IntentExtractor>,
    embedder: Arc<dyn EmbeddingGateway>,
    index: Arc<dyn CatalogIndex>,
    config: RecommendConfig,
}

impl RecommendationEngine {
    pub fn new(
        intent: Arc<dyn IntentExtractor>,
        embedder: Arc<dyn EmbeddingGateway>,
        index: Arc<dyn CatalogIndex>,
        config: RecommendConfig,
    ) -> Self {
        Self {
            intent,
            embedder,
            index,
            config,
        }
    }

    /// The embedding gateway used for queries.
    pub fn embedder(&self) -> &Arc<dyn EmbeddingGateway> {
        &self.embedder
    }

    /// Recommend at most `top_k` assessments for `query`.
    ///
    /// Provider and index failures are returned as-is; nothing is retried.
    pub async fn recommend(&self, query: &str, top_k: usize) -> Result<Vec<Candidate>> {
        let start = Instant::now();
        let intent = self.intent.parse(query).await?;
        debug!(
            duration_minutes = ?intent.duration_minutes,
            needs_balance = intent.needs_balance,
            prefers_tech = intent.prefers_tech,
            prefers_behavioral = intent.prefers_behavioral,
            source = ?intent.source,
            "parsed query intent"
        );

        let embedding = self.embedder.embed_query(query).await?;
        let hits = self.index.query(&embedding, self.config.oversample).await?;
        let retrieved = hits.len();
        let results = self.rank(&intent, hits, top_k);

        let elapsed = start.elapsed();
        metrics::counter!("recommend_requests_total").increment(1);
        metrics::histogram!("recommend_latency_seconds").record(elapsed.as_secs_f64());
        metrics::histogram!("recommend_results").record(results.len() as f64);
        info!(
            retrieved,
            returned = results.len(),
            top_k,
            latency_ms = elapsed.as_millis() as u64,
            "recommendation complete"
        );
        Ok(results)
    }

    /// Score, filter, sort and balance retrieved hits.
    pub fn rank(&self, intent: &IntentRecord, hits: Vec<IndexHit>, top_k: usize) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = hits.into_iter().map(Candidate::from_hit).collect();
        if let Some(ceiling) = intent.duration_minutes {
            let policy = self.config.unknown_duration;
            candidates.retain(|c| within_duration(c, ceiling, policy));
        }
        // Stable: equal scores keep the index's nearest-first order.
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        balance(candidates, intent, top_k, self.config.tech_ratio)
    }
}
