//! Keyword heuristic intent extraction.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use super::{IntentExtractor, IntentRecord, IntentSource};
use crate::error::Result;

/// Keywords that signal a technical assessment.
pub const TECH_KEYWORDS: &[&str] = &[
    "java",
    "python",
    "sql",
    "cloud",
    "aws",
    "azure",
    "gcp",
    "javascript",
    "data",
    "ml",
    "machine learning",
    "devops",
    "react",
    "node",
    "c++",
    "c#",
];

/// Keywords that signal a behavioral assessment.
pub const BEHAVIORAL_KEYWORDS: &[&str] = &[
    "leadership",
    "communication",
    "teamwork",
    "collaboration",
    "dependability",
    "adaptability",
    "initiative",
    "integrity",
    "attention to detail",
];

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3})\s*(min|mins|minutes|hour|hours)").unwrap());

/// Deterministic substring-matching extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicExtractor;

impl HeuristicExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous extraction; this is what [`IntentExtractor::parse`] wraps.
    pub fn extract(&self, query: &str) -> IntentRecord {
        let q = query.to_lowercase();
        let duration_minutes = parse_query_duration(&q);

        let wants_tech = TECH_KEYWORDS.iter().any(|k| q.contains(k));
        let wants_behavioral = BEHAVIORAL_KEYWORDS.iter().any(|k| q.contains(k))
            || q.contains("behavior")
            || q.contains("personality");

        IntentRecord {
            raw: query.to_string(),
            duration_minutes,
            needs_balance: wants_tech && wants_behavioral,
            prefers_tech: wants_tech && !wants_behavioral,
            prefers_behavioral: wants_behavioral && !wants_tech,
            source: IntentSource::Heuristic,
            ..Default::default()
        }
    }
}

/// First `<n> min|hour` expression in an already lower-cased query, in minutes.
fn parse_query_duration(q: &str) -> Option<u32> {
    let caps = DURATION_RE.captures(q)?;
    let value: u32 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str();
    if unit.contains("min") {
        Some(value)
    } else {
        Some(value * 60)
    }
}

#[async_trait]
impl IntentExtractor for HeuristicExtractor {
    async fn parse(&self, query: &str) -> Result<IntentRecord> {
        Ok(self.extract(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tech_only_query() {
        let intent = HeuristicExtractor::new().extract("Java developer with 5 years experience");
        assert!(intent.prefers_tech);
        assert!(!intent.prefers_behavioral);
        assert!(!intent.needs_balance);
        assert_eq!(intent.duration_minutes, None);
        assert_eq!(intent.raw, "Java developer with 5 years experience");
        assert_eq!(intent.source, IntentSource::Heuristic);
    }

    #[test]
    fn test_behavioral_query_with_duration() {
        let intent =
            HeuristicExtractor::new().extract("leadership and communication, 30 minute test");
        assert!(intent.prefers_behavioral);
        assert!(!intent.prefers_tech);
        assert!(!intent.needs_balance);
        assert_eq!(intent.duration_minutes, Some(30));
    }

    #[test]
    fn test_mixed_query_needs_balance() {
        let intent = HeuristicExtractor::new().extract("Python engineer with strong Leadership");
        assert!(intent.needs_balance);
        assert!(!intent.prefers_tech);
        assert!(!intent.prefers_behavioral);
    }

    #[test]
    fn test_hours_convert_to_minutes() {
        let intent = HeuristicExtractor::new().extract("assessment under 2 hours");
        assert_eq!(intent.duration_minutes, Some(120));
    }

    #[test]
    fn test_first_duration_wins() {
        let intent = HeuristicExtractor::new().extract("40 mins ideally, 1 hour at most");
        assert_eq!(intent.duration_minutes, Some(40));
    }

    #[test]
    fn test_duration_without_space() {
        let intent = HeuristicExtractor::new().extract("a 45min screen");
        assert_eq!(intent.duration_minutes, Some(45));
    }

    #[test]
    fn test_personality_literal_is_behavioral() {
        let intent = HeuristicExtractor::new().extract("Personality questionnaire for sales");
        assert!(intent.prefers_behavioral);
    }

    #[test]
    fn test_no_signals() {
        let intent = HeuristicExtractor::new().extract("");
        assert!(!intent.needs_balance && !intent.prefers_tech && !intent.prefers_behavioral);
        assert_eq!(intent.duration_minutes, None);
    }

    #[test]
    fn test_parse_never_fails() {
        let extractor = HeuristicExtractor::new();
        let intent = tokio_test::assert_ok!(tokio_test::block_on(
            extractor.parse("\u{0}\u{ffff} ??? 9999999 minutes")
        ));
        assert_eq!(intent.raw, "\u{0}\u{ffff} ??? 9999999 minutes");
        assert_eq!(intent.duration_minutes, Some(999));
    }
}
