//! HTTP API.
//!
//! Routes:
//! - `GET /health`: liveness check with a fixed payload
//! - `POST /recommend`: run the recommendation pipeline
//! - `GET /provider`: active embedding provider
//! - `GET /metrics`: Prometheus text, when a recorder is installed

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ApiSettings;
use crate::error::{Error, Result};
use crate::recommend::{Candidate, RecommendationEngine};
use crate::search::ProviderInfo;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RecommendationEngine>,
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub rate_limiter: Option<Arc<DefaultDirectRateLimiter>>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(engine: Arc<RecommendationEngine>, settings: &ApiSettings) -> Self {
        let rate_limiter = NonZeroU32::new(settings.requests_per_minute)
            .map(|rpm| Arc::new(RateLimiter::direct(Quota::per_minute(rpm))));
        Self {
            engine,
            default_top_k: settings.default_top_k,
            max_top_k: settings.max_top_k.max(1),
            rate_limiter,
            metrics: None,
        }
    }

    /// Attach a Prometheus handle for `/metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Body of `POST /recommend`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// One recommended assessment as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub assessment_name: String,
    pub assessment_url: String,
    pub relevance_score: f64,
    pub test_type: String,
    pub duration: Option<String>,
}

impl From<Candidate> for Recommendation {
    fn from(c: Candidate) -> Self {
        Self {
            assessment_name: c.name,
            assessment_url: c.url,
            relevance_score: c.score,
            test_type: c.test_type,
            duration: (!c.duration.is_empty()).then_some(c.duration),
        }
    }
}

/// Body returned by `POST /recommend`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub query: String,
    pub recommendations: Vec<Recommendation>,
    pub total_results: usize,
}

/// Fixed liveness payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::EmbeddingProvider(_) | Error::IntentProvider(_) => StatusCode::BAD_GATEWAY,
            Error::Api(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if self.is_provider_error() {
            warn!("upstream failure: {}", self);
        } else if status.is_server_error() {
            error!("request failed: {}", self);
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        message: "API is running".to_string(),
    })
}

async fn recommend(
    State(state): State<AppState>,
    Json(request): Json<RecommendationRequest>,
) -> std::result::Result<Json<RecommendationResponse>, Response> {
    if request.query.trim().is_empty() {
        return Err(Error::Api("query must not be empty".to_string()).into_response());
    }
    if let Some(limiter) = &state.rate_limiter {
        if limiter.check().is_err() {
            metrics::counter!("recommend_rate_limited_total").increment(1);
            return Err((
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorBody {
                    error: "rate limit exceeded".to_string(),
                }),
            )
                .into_response());
        }
    }

    let top_k = request
        .top_k
        .unwrap_or(state.default_top_k)
        .min(state.max_top_k);
    let results = state
        .engine
        .recommend(&request.query, top_k)
        .await
        .map_err(IntoResponse::into_response)?;

    let recommendations: Vec<Recommendation> = results.into_iter().map(Into::into).collect();
    Ok(Json(RecommendationResponse {
        query: request.query,
        total_results: recommendations.len(),
        recommendations,
    }))
}

async fn provider(State(state): State<AppState>) -> Json<ProviderInfo> {
    Json(state.engine.embedder().info())
}

async fn metrics_text(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// HTTP server wrapper.
pub struct ApiServer {
    config: ApiSettings,
    state: AppState,
}

impl ApiServer {
    pub fn with_state(config: ApiSettings, state: AppState) -> Self {
        Self { config, state }
    }

    fn cors_layer(&self) -> Result<CorsLayer> {
        let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
        if self.config.cors_origins.iter().any(|o| o == "*") {
            return Ok(layer.allow_origin(Any));
        }
        let origins = self
            .config
            .cors_origins
            .iter()
            .map(|o| {
                HeaderValue::from_str(o)
                    .map_err(|_| Error::Config(format!("invalid CORS origin '{}'", o)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(layer.allow_origin(AllowOrigin::list(origins)))
    }

    /// Build the router with all routes and layers.
    pub fn router(&self) -> Result<Router> {
        let cors = if self.config.cors_enabled {
            Some(self.cors_layer()?)
        } else {
            None
        };
        Ok(Router::new()
            .route("/health", get(health))
            .route("/recommend", post(recommend))
            .route("/provider", get(provider))
            .route("/metrics", get(metrics_text))
            .with_state(self.state.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .option_layer(cors),
            ))
    }

    /// Bind and serve until the process is stopped.
    pub async fn run(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Api(format!("failed to bind {}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let app = self.router()?;
        if let Ok(addr) = listener.local_addr() {
            info!("API listening on http://{}", addr);
        }
        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Api(format!("server error: {}", e)))
    }
}

/// Query `GET {endpoint}/health` on a running server.
///
/// Non-2xx answers are failures even when they carry a JSON body.
pub async fn check_health(endpoint: &str, timeout: Duration) -> Result<HealthResponse> {
    let url = format!("{}/health", endpoint.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Api(format!("failed to build HTTP client: {}", e)))?;
    let response = client
        .get(&url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| Error::Api(format!("health check against {} failed: {}", url, e)))?;
    response
        .json::<HealthResponse>()
        .await
        .map_err(|e| Error::Api(format!("invalid health payload from {}: {}", url, e)))
}
