//! Remote embedding backends (OpenAI and Gemini REST APIs).
//!
//! Neither client retries: a failed request surfaces as
//! [`Error::EmbeddingProvider`] and the caller decides what to do with it.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::embedding::{check_batch, Embedding, EmbeddingGateway, ProviderInfo};
use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::error::{Error, Result};

/// Output size of `text-embedding-3-large`, the default OpenAI model.
pub const OPENAI_EMBEDDING_DIM: usize = 3072;

/// Native output size of a known OpenAI embedding model.
pub fn openai_model_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-large" => Some(OPENAI_EMBEDDING_DIM),
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        _ => None,
    }
}

/// Output size of Gemini `text-embedding-004`.
pub const GEMINI_EMBEDDING_DIM: usize = 768;

/// Gemini rejects batch requests larger than this.
const GEMINI_MAX_BATCH: usize = 100;

fn http_client(headers: HeaderMap, timeout: Duration, provider: &str) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .map_err(|e| Error::EmbeddingProvider(format!("failed to build {} client: {}", provider, e)))
}

fn require_key(key: Option<&String>, env_var: &str) -> Result<String> {
    key.map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| Error::Config(format!("{} is not set", env_var)))
}

async fn read_json<T: for<'de> Deserialize<'de>>(resp: Response, provider: &str) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        return Err(Error::EmbeddingProvider(format!(
            "{} request failed ({}): {}",
            provider, status, body
        )));
    }
    resp.json::<T>()
        .await
        .map_err(|e| Error::EmbeddingProvider(format!("failed to parse {} response: {}", provider, e)))
}

/// OpenAI embeddings client (`POST {base}/embeddings`).
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    /// Explicit `dimensions` request parameter, when configured.
    requested_dimensions: Option<usize>,
    batch_size: usize,
}

impl OpenAiEmbedder {
    /// `dimensions` overrides the model's native size and is sent with each
    /// request; without it the model must be one of the known OpenAI models.
    pub fn new(
        api_key: String,
        base_url: &str,
        model: String,
        dimensions: Option<usize>,
        timeout: Duration,
        batch_size: usize,
    ) -> Result<Self> {
        let resolved = dimensions
            .or_else(|| openai_model_dimension(&model))
            .filter(|d| *d > 0)
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown OpenAI embedding model '{}'; set embedding.openai_dimensions",
                    model
                ))
            })?;
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| Error::Config("invalid OpenAI API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Self {
            client: http_client(headers, timeout, "OpenAI")?,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            dimensions: resolved,
            requested_dimensions: dimensions,
            batch_size: batch_size.max(1),
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let key = require_key(config.openai_api_key.as_ref(), "OPENAI_API_KEY")?;
        Self::new(
            key,
            &config.openai_base_url,
            config.openai_model.clone(),
            config.openai_dimensions,
            Duration::from_secs(config.timeout_secs.max(1)),
            config.batch_size,
        )
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Embedding>> {
        let request = OpenAiRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.requested_dimensions,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::EmbeddingProvider(format!("OpenAI request error: {}", e)))?;
        let mut parsed: OpenAiResponse = read_json(resp, "OpenAI").await?;
        parsed.data.sort_by_key(|entry| entry.index);
        let embeddings: Vec<Embedding> = parsed.data.into_iter().map(|d| d.embedding).collect();
        check_batch("OpenAI", inputs.len(), self.dimensions, &embeddings)?;
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingGateway for OpenAiEmbedder {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider: EmbeddingProviderKind::OpenAi.to_string(),
            model: self.model.clone(),
            dimensions: self.dimensions,
            description: format!("OpenAI {} ({}D, API-based)", self.model, self.dimensions),
        }
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch(chunk).await?);
        }
        Ok(out)
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| Error::EmbeddingProvider("OpenAI returned no embedding".into()))
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiData {
    embedding: Vec<f32>,
    index: usize,
}

/// Gemini task types; documents and queries are encoded differently.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

/// Gemini embeddings client (`embedContent` / `batchEmbedContents`).
#[derive(Clone)]
pub struct GeminiEmbedder {
    client: Client,
    base_url: String,
    model: String,
    batch_size: usize,
}

impl GeminiEmbedder {
    pub fn new(
        api_key: String,
        base_url: &str,
        model: String,
        timeout: Duration,
        batch_size: usize,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(api_key.trim())
                .map_err(|_| Error::Config("invalid Google API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Self {
            client: http_client(headers, timeout, "Gemini")?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            batch_size: batch_size.clamp(1, GEMINI_MAX_BATCH),
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let key = require_key(config.gemini_api_key.as_ref(), "GOOGLE_API_KEY")?;
        Self::new(
            key,
            &config.gemini_base_url,
            config.gemini_model.clone(),
            Duration::from_secs(config.timeout_secs.max(1)),
            GEMINI_MAX_BATCH.min(config.batch_size.max(1)),
        )
    }

    fn request<'a>(&'a self, text: &'a str, task_type: TaskType) -> GeminiEmbedRequest<'a> {
        GeminiEmbedRequest {
            model: &self.model,
            content: GeminiContent {
                parts: vec![GeminiPart { text }],
            },
            task_type,
        }
    }

    async fn embed_one(&self, text: &str, task_type: TaskType) -> Result<Embedding> {
        let url = format!("{}/{}:embedContent", self.base_url, self.model);
        let resp = self
            .client
            .post(&url)
            .json(&self.request(text, task_type))
            .send()
            .await
            .map_err(|e| Error::EmbeddingProvider(format!("Gemini request error: {}", e)))?;
        let parsed: GeminiEmbedResponse = read_json(resp, "Gemini").await?;
        let embeddings = vec![parsed.embedding.values];
        check_batch("Gemini", 1, GEMINI_EMBEDDING_DIM, &embeddings)?;
        Ok(embeddings.into_iter().next().unwrap_or_default())
    }

    async fn embed_batch(&self, texts: &[String], task_type: TaskType) -> Result<Vec<Embedding>> {
        let url = format!("{}/{}:batchEmbedContents", self.base_url, self.model);
        let body = GeminiBatchRequest {
            requests: texts
                .iter()
                .map(|t| self.request(t.as_str(), task_type))
                .collect(),
        };
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::EmbeddingProvider(format!("Gemini request error: {}", e)))?;
        let parsed: GeminiBatchResponse = read_json(resp, "Gemini").await?;
        let embeddings: Vec<Embedding> = parsed.embeddings.into_iter().map(|e| e.values).collect();
        check_batch("Gemini", texts.len(), GEMINI_EMBEDDING_DIM, &embeddings)?;
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingGateway for GeminiEmbedder {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider: EmbeddingProviderKind::Gemini.to_string(),
            model: self.model.clone(),
            dimensions: GEMINI_EMBEDDING_DIM,
            description: format!(
                "Google Gemini {} ({}D, API-based)",
                self.model, GEMINI_EMBEDDING_DIM
            ),
        }
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch(chunk, TaskType::RetrievalDocument).await?);
        }
        Ok(out)
    }

    async fn embed_document(&self, text: &str) -> Result<Embedding> {
        self.embed_one(text, TaskType::RetrievalDocument).await
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        self.embed_one(text, TaskType::RetrievalQuery).await
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiEmbedRequest<'a> {
    model: &'a str,
    content: GeminiContent<'a>,
    task_type: TaskType,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GeminiBatchRequest<'a> {
    requests: Vec<GeminiEmbedRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct GeminiValues {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedResponse {
    embedding: GeminiValues,
}

#[derive(Debug, Deserialize)]
struct GeminiBatchResponse {
    #[serde(default)]
    embeddings: Vec<GeminiValues>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_request_shape() {
        let embedder = GeminiEmbedder::new(
            "key".to_string(),
            "https://example.invalid/v1beta/",
            "models/text-embedding-004".to_string(),
            Duration::from_secs(5),
            500,
        )
        .unwrap();
        assert_eq!(embedder.batch_size, GEMINI_MAX_BATCH);
        assert_eq!(embedder.base_url, "https://example.invalid/v1beta");

        let value = serde_json::to_value(embedder.request("hello", TaskType::RetrievalQuery)).unwrap();
        assert_eq!(value["taskType"], "RETRIEVAL_QUERY");
        assert_eq!(value["content"]["parts"][0]["text"], "hello");
        assert_eq!(value["model"], "models/text-embedding-004");
    }

    fn openai(model: &str, dimensions: Option<usize>) -> Result<OpenAiEmbedder> {
        OpenAiEmbedder::new(
            "sk-test".to_string(),
            "https://example.invalid/v1",
            model.to_string(),
            dimensions,
            Duration::from_secs(5),
            16,
        )
    }

    #[test]
    fn test_openai_dimension_follows_model() {
        let large = openai("text-embedding-3-large", None).unwrap();
        assert_eq!(large.info().dimensions, 3072);
        let small = openai("text-embedding-3-small", None).unwrap();
        assert_eq!(small.info().dimensions, 1536);
        assert_eq!(small.requested_dimensions, None);

        assert!(matches!(
            openai("my-finetuned-embedder", None),
            Err(Error::Config(_))
        ));
        let custom = openai("my-finetuned-embedder", Some(256)).unwrap();
        assert_eq!(custom.info().dimensions, 256);
    }

    #[test]
    fn test_openai_request_sends_configured_dimensions() {
        let inputs = vec!["java".to_string()];
        let request = OpenAiRequest {
            model: "text-embedding-3-small",
            input: &inputs,
            dimensions: Some(512),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["dimensions"], 512);

        let request = OpenAiRequest {
            dimensions: None,
            ..request
        };
        assert!(serde_json::to_value(&request).unwrap().get("dimensions").is_none());
    }

    #[test]
    fn test_openai_response_restores_input_order() {
        let raw = r#"{"data":[{"embedding":[2.0],"index":1},{"embedding":[1.0],"index":0}]}"#;
        let mut parsed: OpenAiResponse = serde_json::from_str(raw).unwrap();
        parsed.data.sort_by_key(|entry| entry.index);
        let values: Vec<f32> = parsed.data.iter().map(|d| d.embedding[0]).collect();
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_missing_keys_are_config_errors() {
        let config = EmbeddingConfig::default();
        assert!(matches!(
            OpenAiEmbedder::from_config(&config),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            GeminiEmbedder::from_config(&config),
            Err(Error::Config(_))
        ));
    }
}
