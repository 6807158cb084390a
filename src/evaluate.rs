//! Offline quality evaluation.
//!
//! Runs the engine over a CSV of queries to produce `Query,Assessment_url`
//! prediction rows, and scores predictions against ground-truth rows of the same
//! shape with mean Recall@K.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::error::{Error, Result};
use crate::recommend::RecommendationEngine;

/// One `(query, assessment url)` pair, as found in prediction and ground-truth files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelledUrl {
    #[serde(rename = "Query")]
    pub query: String,
    #[serde(rename = "Assessment_url")]
    pub assessment_url: String,
}

#[derive(Debug, Deserialize)]
struct QueryRow {
    #[serde(rename = "Query")]
    query: String,
}

/// Recall for a single ground-truth query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecall {
    pub query: String,
    /// Distinct relevant urls in the ground truth.
    pub relevant: usize,
    /// Relevant urls found among the first `k` predictions.
    pub hits: usize,
    pub recall: f64,
}

/// Mean Recall@K over every query that has ground truth.
#[derive(Debug, Clone, PartialEq)]
pub struct RecallReport {
    pub k: usize,
    pub mean_recall: f64,
    pub per_query: Vec<QueryRecall>,
}

fn dataset_err(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Dataset(format!("{}: {}", path.display(), e))
}

/// Read the `Query` column of a CSV file. Other columns are ignored.
pub fn read_queries(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path).map_err(|e| dataset_err(path, e))?;
    reader
        .deserialize::<QueryRow>()
        .map(|row| row.map(|r| r.query).map_err(|e| dataset_err(path, e)))
        .collect()
}

/// Read `Query,Assessment_url` rows.
pub fn read_labelled(path: impl AsRef<Path>) -> Result<Vec<LabelledUrl>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path).map_err(|e| dataset_err(path, e))?;
    reader
        .deserialize::<LabelledUrl>()
        .map(|row| row.map_err(|e| dataset_err(path, e)))
        .collect()
}

/// Write `Query,Assessment_url` rows with a header line.
pub fn write_predictions(path: impl AsRef<Path>, rows: &[LabelledUrl]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path).map_err(|e| dataset_err(path, e))?;
    for row in rows {
        writer.serialize(row).map_err(|e| dataset_err(path, e))?;
    }
    writer.flush()?;
    Ok(())
}

/// Recommend for every query and flatten the results into prediction rows, best
/// first within each query.
pub async fn generate_predictions(
    engine: &RecommendationEngine,
    queries: &[String],
    top_k: usize,
) -> Result<Vec<LabelledUrl>> {
    let mut rows = Vec::new();
    for query in queries {
        let results = engine.recommend(query, top_k).await?;
        rows.extend(results.into_iter().map(|c| LabelledUrl {
            query: query.clone(),
            assessment_url: c.url,
        }));
    }
    info!(
        "Generated {} prediction rows for {} queries",
        rows.len(),
        queries.len()
    );
    Ok(rows)
}

/// Score `predictions` against `truth`.
///
/// Queries are taken from the ground truth in first-seen order. For each, the
/// first `k` predicted urls (in file order) are compared as a set with the
/// relevant urls. Queries that only appear in `predictions` are ignored, and a
/// query with no predictions scores 0.
pub fn mean_recall_at_k(
    predictions: &[LabelledUrl],
    truth: &[LabelledUrl],
    k: usize,
) -> RecallReport {
    let mut order: Vec<&str> = Vec::new();
    let mut relevant: HashMap<&str, HashSet<&str>> = HashMap::new();
    for row in truth {
        let urls = relevant.entry(row.query.as_str()).or_insert_with(|| {
            order.push(row.query.as_str());
            HashSet::new()
        });
        urls.insert(row.assessment_url.as_str());
    }

    let mut predicted: HashMap<&str, Vec<&str>> = HashMap::new();
    for row in predictions {
        predicted
            .entry(row.query.as_str())
            .or_default()
            .push(row.assessment_url.as_str());
    }

    let per_query: Vec<QueryRecall> = order
        .into_iter()
        .filter_map(|query| {
            let wanted = relevant.get(query)?;
            if wanted.is_empty() {
                return None;
            }
            let top: HashSet<&str> = predicted
                .get(query)
                .map(|urls| urls.iter().take(k).copied().collect())
                .unwrap_or_default();
            let hits = top.intersection(wanted).count();
            Some(QueryRecall {
                query: query.to_string(),
                relevant: wanted.len(),
                hits,
                recall: hits as f64 / wanted.len() as f64,
            })
        })
        .collect();

    let mean_recall = if per_query.is_empty() {
        0.0
    } else {
        per_query.iter().map(|q| q.recall).sum::<f64>() / per_query.len() as f64
    };
    RecallReport {
        k,
        mean_recall,
        per_query,
    }
}
