//! Model-backed intent extraction with heuristic fallback.
//!
//! Extraction is two explicit stages: ask the model for structured JSON, then
//! parse it. Only a [`ExtractionError::Malformed`] answer falls through to the
//! heuristic extractor; a backend that cannot be reached is reported as
//! [`Error::IntentProvider`] so outages stay visible.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::heuristic::HeuristicExtractor;
use super::{IntentExtractor, IntentRecord, IntentSource};
use crate::config::{IntentConfig, IntentProviderKind};
use crate::error::{Error, Result};

const EXTRACTION_PROMPT: &str = r#"Analyze this job query/description and extract structured information.

Query: {query}

Extract and return ONLY a valid JSON object with these fields:
{
  "job_role": "primary role or position mentioned",
  "technical_skills": ["list", "of", "technical", "skills"],
  "soft_skills": ["list", "of", "behavioral", "traits"],
  "experience_level": "entry/mid/senior/executive or null",
  "duration_minutes": null or number,
  "test_type_preference": "technical/behavioral/both/none",
  "key_competencies": ["main", "competencies", "needed"]
}

Return ONLY the JSON, no other text."#;

const SYSTEM_MESSAGE: &str = "You are a precise data extraction assistant. \
     Extract only the requested information in the specified format.";

const MAX_OUTPUT_TOKENS: u32 = 512;

/// Why structured extraction did not produce a record.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// The model answered, but not with the expected JSON.
    #[error("malformed model output: {0}")]
    Malformed(String),
    /// The model could not be reached or rejected the request.
    #[error(transparent)]
    Provider(Error),
}

/// A text-completion backend.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Return the model's text answer. `Ok` with unusable text is the caller's
    /// problem; `Err` means the backend itself failed.
    async fn complete(&self, prompt: &str) -> std::result::Result<String, ExtractionError>;
}

/// Chat backends reachable over HTTP.
pub enum ChatBackend {
    /// Gemini `generateContent`.
    Gemini {
        client: Client,
        base_url: String,
        model: String,
        temperature: f32,
    },
    /// OpenAI-style `chat/completions` (OpenAI, Groq).
    OpenAiCompatible {
        name: String,
        client: Client,
        endpoint: String,
        model: String,
        temperature: f32,
    },
}

impl ChatBackend {
    pub fn from_config(config: &IntentConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        match config.provider {
            IntentProviderKind::Gemini => {
                let key = api_key(config.gemini_api_key.as_ref(), "GOOGLE_API_KEY")?;
                let mut headers = HeaderMap::new();
                headers.insert(
                    "x-goog-api-key",
                    HeaderValue::from_str(&key)
                        .map_err(|_| Error::Config("invalid Google API key".to_string()))?,
                );
                Ok(ChatBackend::Gemini {
                    client: build_client(headers, timeout)?,
                    base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
                    model: config.gemini_model.clone(),
                    temperature: config.temperature,
                })
            }
            IntentProviderKind::Groq => Self::openai_compatible(
                "groq",
                api_key(config.groq_api_key.as_ref(), "GROQ_API_KEY")?,
                &config.groq_base_url,
                config.groq_model.clone(),
                config.temperature,
                timeout,
            ),
            IntentProviderKind::OpenAi => Self::openai_compatible(
                "openai",
                api_key(config.openai_api_key.as_ref(), "OPENAI_API_KEY")?,
                &config.openai_base_url,
                config.openai_model.clone(),
                config.temperature,
                timeout,
            ),
            IntentProviderKind::Heuristic => Err(Error::Config(
                "heuristic intent provider has no chat backend".to_string(),
            )),
        }
    }

    fn openai_compatible(
        name: &str,
        key: String,
        base_url: &str,
        model: String,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| Error::Config(format!("invalid {} API key", name)))?,
        );
        Ok(ChatBackend::OpenAiCompatible {
            name: name.to_string(),
            client: build_client(headers, timeout)?,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            temperature,
        })
    }
}

fn api_key(key: Option<&String>, env_var: &str) -> Result<String> {
    key.map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| Error::Config(format!("{} is not set", env_var)))
}

fn build_client(mut headers: HeaderMap, timeout: Duration) -> Result<Client> {
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .map_err(|e| Error::IntentProvider(format!("failed to build HTTP client: {}", e)))
}

fn provider_error(backend: &str, detail: impl std::fmt::Display) -> ExtractionError {
    ExtractionError::Provider(Error::IntentProvider(format!("{}: {}", backend, detail)))
}

async fn post_json<B: Serialize, T: for<'de> Deserialize<'de>>(
    backend: &str,
    client: &Client,
    url: &str,
    body: &B,
) -> std::result::Result<T, ExtractionError> {
    let resp = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| provider_error(backend, e))?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(provider_error(backend, format!("HTTP {}: {}", status, text)));
    }
    resp.json::<T>()
        .await
        .map_err(|e| ExtractionError::Malformed(format!("{} response body: {}", backend, e)))
}

#[async_trait]
impl ChatCompletion for ChatBackend {
    fn name(&self) -> &str {
        match self {
            ChatBackend::Gemini { .. } => "gemini",
            ChatBackend::OpenAiCompatible { name, .. } => name.as_str(),
        }
    }

    async fn complete(&self, prompt: &str) -> std::result::Result<String, ExtractionError> {
        match self {
            ChatBackend::Gemini {
                client,
                base_url,
                model,
                temperature,
            } => {
                let url = format!("{}/models/{}:generateContent", base_url, model);
                let body = serde_json::json!({
                    "contents": [{ "parts": [{ "text": format!("{}\n\n{}", SYSTEM_MESSAGE, prompt) }] }],
                    "generationConfig": {
                        "temperature": temperature,
                        "maxOutputTokens": MAX_OUTPUT_TOKENS,
                    }
                });
                let parsed: GeminiResponse = post_json("gemini", client, &url, &body).await?;
                parsed
                    .candidates
                    .into_iter()
                    .next()
                    .and_then(|c| c.content)
                    .and_then(|c| c.parts.into_iter().next())
                    .map(|p| p.text.trim().to_string())
                    .ok_or_else(|| ExtractionError::Malformed("no candidates in response".into()))
            }
            ChatBackend::OpenAiCompatible {
                name,
                client,
                endpoint,
                model,
                temperature,
            } => {
                let body = serde_json::json!({
                    "model": model,
                    "messages": [
                        { "role": "system", "content": SYSTEM_MESSAGE },
                        { "role": "user", "content": prompt },
                    ],
                    "temperature": temperature,
                    "max_tokens": MAX_OUTPUT_TOKENS,
                });
                let parsed: ChatResponse = post_json(name, client, endpoint, &body).await?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .map(|c| c.trim().to_string())
                    .ok_or_else(|| ExtractionError::Malformed("no choices in response".into()))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// JSON shape requested from the model.
#[derive(Debug, Deserialize)]
struct ModelIntent {
    job_role: Option<String>,
    technical_skills: Option<Vec<String>>,
    soft_skills: Option<Vec<String>>,
    duration_minutes: Option<f64>,
    test_type_preference: Option<String>,
}

/// Remove a surrounding markdown code fence, if any.
pub(crate) fn strip_code_fence(response: &str) -> &str {
    let mut text = response.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Turn model output into a record, or explain why it cannot be used.
pub(crate) fn parse_model_output(
    query: &str,
    response: &str,
) -> std::result::Result<IntentRecord, String> {
    let parsed: ModelIntent =
        serde_json::from_str(strip_code_fence(response)).map_err(|e| e.to_string())?;
    let preference = parsed
        .test_type_preference
        .as_deref()
        .map(|p| p.trim().to_lowercase())
        .unwrap_or_default();
    let duration_minutes = parsed
        .duration_minutes
        .filter(|m| m.is_finite() && *m > 0.0 && *m <= u32::MAX as f64)
        .map(|m| m.round() as u32);

    Ok(IntentRecord {
        raw: query.to_string(),
        duration_minutes,
        needs_balance: preference == "both",
        prefers_tech: preference == "technical",
        prefers_behavioral: preference == "behavioral",
        source: IntentSource::Model,
        job_role: parsed.job_role.filter(|r| !r.trim().is_empty()),
        technical_skills: parsed.technical_skills.unwrap_or_default(),
        soft_skills: parsed.soft_skills.unwrap_or_default(),
    })
}

/// Model-backed extractor.
pub struct LlmExtractor {
    backend: Arc<dyn ChatCompletion>,
    fallback: HeuristicExtractor,
}

impl LlmExtractor {
    pub fn new(backend: Arc<dyn ChatCompletion>) -> Self {
        Self {
            backend,
            fallback: HeuristicExtractor::new(),
        }
    }

    pub fn from_config(config: &IntentConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(ChatBackend::from_config(config)?)))
    }

    /// Stage one: structured extraction only, no fallback.
    pub async fn try_extract(
        &self,
        query: &str,
    ) -> std::result::Result<IntentRecord, ExtractionError> {
        let prompt = EXTRACTION_PROMPT.replace("{query}", query);
        let response = self.backend.complete(&prompt).await?;
        debug!("{} intent response: {} bytes", self.backend.name(), response.len());
        parse_model_output(query, &response).map_err(ExtractionError::Malformed)
    }
}

#[async_trait]
impl IntentExtractor for LlmExtractor {
    async fn parse(&self, query: &str) -> Result<IntentRecord> {
        match self.try_extract(query).await {
            Ok(record) => Ok(record),
            Err(ExtractionError::Malformed(reason)) => {
                warn!(
                    "{} intent parsing failed ({}), falling back to heuristic",
                    self.backend.name(),
                    reason
                );
                metrics::counter!("intent_fallback_total").increment(1);
                Ok(self.fallback.extract(query))
            }
            Err(ExtractionError::Provider(err)) => Err(err),
        }
    }
}
