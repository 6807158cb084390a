//! End-to-end tests of the HTTP surface over an in-memory index.

use assessment_recommender::api::{check_health, HealthResponse, Recommendation};
use assessment_recommender::recommend::parse_duration_minutes;
use assessment_recommender::search::Embedding;
use assessment_recommender::{
    ingest, ApiServer, ApiSettings, AppState, CatalogRecord, EmbeddingGateway, Error, FileIndex,
    HeuristicExtractor, IntentExtractor, IntentRecord, ProviderInfo, RecommendConfig,
    RecommendationEngine, RecommendationResponse, Result,
};
use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const VOCABULARY: &[&str] = &[
    "java",
    "python",
    "sql",
    "leadership",
    "communication",
    "personality",
];

/// Bag-of-keywords embedder. The trailing axis keeps vectors non-zero.
struct KeywordEmbedder;

fn keyword_vector(text: &str) -> Embedding {
    let lower = text.to_lowercase();
    let mut v: Vec<f32> = VOCABULARY
        .iter()
        .map(|w| lower.matches(w).count() as f32)
        .collect();
    v.push(0.1);
    v
}

#[async_trait]
impl EmbeddingGateway for KeywordEmbedder {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider: "keyword".to_string(),
            model: "bag-of-words".to_string(),
            dimensions: VOCABULARY.len() + 1,
            description: "test embedder".to_string(),
        }
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        Ok(keyword_vector(text))
    }
}

fn record(name: &str, test_type: &str, duration: &str, skills: &[&str]) -> CatalogRecord {
    CatalogRecord {
        name: name.to_string(),
        description: format!("Assessment of {}", skills.join(" and ")),
        url: format!(
            "https://catalog.example.com/view/{}/",
            name.to_lowercase().replace(' ', "-")
        ),
        test_type: test_type.to_string(),
        duration: duration.to_string(),
        skills: skills.iter().map(|s| s.to_string()).collect(),
    }
}

fn catalog() -> Vec<CatalogRecord> {
    let durations = ["20 minutes", "45 minutes", "", "30 minutes", "1 hour"];
    let mut records = Vec::new();
    for i in 0..8 {
        records.push(record(
            &format!("Java Programming {}", i),
            "K",
            durations[i % durations.len()],
            &["java"],
        ));
    }
    for i in 0..8 {
        records.push(record(
            &format!("Python Programming {}", i),
            "K",
            durations[i % durations.len()],
            &["python"],
        ));
    }
    for i in 0..8 {
        records.push(record(
            &format!("Leadership Styles {}", i),
            "P",
            durations[i % durations.len()],
            &["leadership", "communication"],
        ));
    }
    records.push(record("Personality Profile", "P", "Untimed", &["personality"]));
    records.push(record("SQL Server", "K", "15 minutes", &["sql"]));
    records
}

async fn server_with(records: &[CatalogRecord], settings: ApiSettings) -> TestServer {
    let embedder = Arc::new(KeywordEmbedder);
    let index = Arc::new(FileIndex::in_memory());
    ingest(records, embedder.as_ref(), index.as_ref())
        .await
        .unwrap();

    let engine = Arc::new(RecommendationEngine::new(
        Arc::new(HeuristicExtractor::new()),
        embedder,
        index,
        RecommendConfig::default(),
    ));
    let state = AppState::new(engine, &settings);
    let router = ApiServer::with_state(settings, state).router().unwrap();
    TestServer::new(router).unwrap()
}

async fn server() -> TestServer {
    server_with(&catalog(), ApiSettings::default()).await
}

async fn recommend(server: &TestServer, query: &str, top_k: usize) -> RecommendationResponse {
    let response = server
        .post("/recommend")
        .json(&json!({ "query": query, "top_k": top_k }))
        .await;
    response.assert_status_ok();
    response.json::<RecommendationResponse>()
}

fn count_type(items: &[Recommendation], test_type: &str) -> usize {
    items.iter().filter(|r| r.test_type == test_type).count()
}

#[tokio::test]
async fn test_health_payload() {
    let server = server().await;
    let response = server.get("/health").await;
    response.assert_status_ok();
    let body = response.json::<HealthResponse>();
    assert_eq!(body.status, "healthy");
    assert_eq!(body.message, "API is running");
}

#[tokio::test]
async fn test_java_query_returns_technical_items_first() {
    let server = server().await;
    let body = recommend(&server, "Java developer with 5 years experience", 5).await;

    assert_eq!(body.query, "Java developer with 5 years experience");
    assert_eq!(body.total_results, 5);
    assert_eq!(body.recommendations.len(), 5);
    for rec in &body.recommendations {
        assert!(rec.assessment_name.starts_with("Java Programming"));
        assert_eq!(rec.test_type, "K");
        assert!(rec.relevance_score > 0.9);
    }
    let scores: Vec<f64> = body
        .recommendations
        .iter()
        .map(|r| r.relevance_score)
        .collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_duration_ceiling_keeps_short_and_unknown_items() {
    let server = server().await;
    let body = recommend(&server, "leadership and communication, 30 minute test", 10).await;

    assert!(!body.recommendations.is_empty());
    for rec in &body.recommendations {
        if let Some(minutes) = rec.duration.as_deref().and_then(parse_duration_minutes) {
            assert!(minutes <= 30, "{} runs {} minutes", rec.assessment_name, minutes);
        }
    }
    // Items with no stated duration survive the filter and come back as null.
    assert!(body.recommendations.iter().any(|r| r.duration.is_none()));
    assert!(body
        .recommendations
        .iter()
        .any(|r| r.assessment_name.starts_with("Leadership Styles")));
}

#[tokio::test]
async fn test_mixed_query_is_balanced_six_four() {
    let server = server().await;
    let body = recommend(&server, "python developer with strong leadership", 10).await;

    assert_eq!(body.total_results, 10);
    assert_eq!(count_type(&body.recommendations, "K"), 6);
    assert_eq!(count_type(&body.recommendations, "P"), 4);
    // Technical picks come first, then behavioral.
    assert!(body.recommendations[..6].iter().all(|r| r.test_type == "K"));
    assert!(body.recommendations[6..].iter().all(|r| r.test_type == "P"));
}

#[tokio::test]
async fn test_small_index_returns_what_exists() {
    let records = vec![
        record("Java Basics", "K", "10 minutes", &["java"]),
        record("Team Leadership", "P", "", &["leadership"]),
        record("SQL Queries", "K", "20 minutes", &["sql"]),
    ];
    let server = server_with(&records, ApiSettings::default()).await;
    let body = recommend(&server, "java and leadership", 10).await;
    assert_eq!(body.total_results, 3);
}

#[tokio::test]
async fn test_zero_top_k_is_empty() {
    let server = server().await;
    let body = recommend(&server, "Java developer", 0).await;
    assert_eq!(body.total_results, 0);
    assert!(body.recommendations.is_empty());
}

#[tokio::test]
async fn test_top_k_is_capped() {
    let settings = ApiSettings {
        max_top_k: 4,
        ..Default::default()
    };
    let server = server_with(&catalog(), settings).await;
    let body = recommend(&server, "python", 40).await;
    assert_eq!(body.total_results, 4);
}

#[tokio::test]
async fn test_missing_top_k_uses_default() {
    let server = server().await;
    let response = server
        .post("/recommend")
        .json(&json!({ "query": "communication skills" }))
        .await;
    response.assert_status_ok();
    let body = response.json::<RecommendationResponse>();
    assert_eq!(body.total_results, ApiSettings::default().default_top_k);
}

#[tokio::test]
async fn test_repeated_query_is_identical() {
    let server = server().await;
    let first = recommend(&server, "python developer with strong leadership", 10).await;
    let second = recommend(&server, "python developer with strong leadership", 10).await;
    assert_eq!(first.recommendations, second.recommendations);
}

#[tokio::test]
async fn test_blank_query_is_rejected() {
    let server = server().await;
    let response = server
        .post("/recommend")
        .json(&json!({ "query": "   " }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_provider_endpoint_reports_embedder() {
    let server = server().await;
    let response = server.get("/provider").await;
    response.assert_status_ok();
    let info = response.json::<ProviderInfo>();
    assert_eq!(info.provider, "keyword");
    assert_eq!(info.dimensions, VOCABULARY.len() + 1);
}

#[tokio::test]
async fn test_metrics_without_recorder_is_not_found() {
    let server = server().await;
    server
        .get("/metrics")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rate_limit_rejects_excess_requests() {
    let settings = ApiSettings {
        requests_per_minute: 1,
        ..Default::default()
    };
    let server = server_with(&catalog(), settings).await;
    recommend(&server, "java", 3).await;
    server
        .post("/recommend")
        .json(&json!({ "query": "java", "top_k": 3 }))
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}

struct UnreachableModel;

#[async_trait]
impl IntentExtractor for UnreachableModel {
    async fn parse(&self, _query: &str) -> Result<IntentRecord> {
        Err(Error::IntentProvider("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_intent_provider_outage_is_bad_gateway() {
    let engine = Arc::new(RecommendationEngine::new(
        Arc::new(UnreachableModel),
        Arc::new(KeywordEmbedder),
        Arc::new(FileIndex::in_memory()),
        RecommendConfig::default(),
    ));
    let settings = ApiSettings::default();
    let state = AppState::new(engine, &settings);
    let server = TestServer::new(ApiServer::with_state(settings, state).router().unwrap()).unwrap();

    server
        .post("/recommend")
        .json(&json!({ "query": "java developer" }))
        .await
        .assert_status(StatusCode::BAD_GATEWAY);
}

async fn spawn(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_check_health_against_running_server() {
    let embedder = Arc::new(KeywordEmbedder);
    let engine = Arc::new(RecommendationEngine::new(
        Arc::new(HeuristicExtractor::new()),
        embedder,
        Arc::new(FileIndex::in_memory()),
        RecommendConfig::default(),
    ));
    let settings = ApiSettings::default();
    let state = AppState::new(engine, &settings);
    let endpoint = spawn(ApiServer::with_state(settings, state).router().unwrap()).await;

    let health = check_health(&format!("{}/", endpoint), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(health.status, "healthy");
}

#[tokio::test]
async fn test_check_health_rejects_error_status_with_json_body() {
    let router = axum::Router::new().route(
        "/health",
        axum::routing::get(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(json!({ "status": "healthy", "message": "API is running" })),
            )
        }),
    );
    let endpoint = spawn(router).await;

    let result = check_health(&endpoint, Duration::from_secs(5)).await;
    assert!(matches!(result, Err(Error::Api(_))));
}

#[tokio::test]
async fn test_check_health_unreachable_endpoint_fails() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = check_health(&format!("http://{}", addr), Duration::from_secs(2)).await;
    assert!(matches!(result, Err(Error::Api(_))));
}
