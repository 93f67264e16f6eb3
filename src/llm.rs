//! Generative model clients.
//!
//! Defines the [`GenerativeModel`] trait and concrete implementations:
//! - **[`DisabledModel`]** — returns errors; used when no provider is configured.
//! - **[`GeminiModel`]** — Gemini / Vertex AI `streamGenerateContent` over SSE.
//!   Streamed chunks are accumulated into a single completion before returning.
//! - **[`OpenAiModel`]** — OpenAI-compatible chat completions (also Azure
//!   OpenAI deployments via `endpoint` + `api_version`).
//!
//! A model is built once at startup by [`create_model`] and shared as an
//! `Arc<dyn GenerativeModel>`; tests inject their own implementations.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ModelConfig;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HARASSMENT",
];

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("generative model is disabled")]
    Disabled,
    #[error("request failed: {0}")]
    Communication(String),
    #[error("model API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("model returned an empty response")]
    EmptyResponse,
}

/// A single generation request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    pub system: Option<String>,
    pub user: String,
    /// Overrides the model's configured temperature.
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

impl Prompt {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            user: text.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Text-generation boundary.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Returns the model identifier (e.g. `"gemini-1.5-pro-002"`).
    fn model_name(&self) -> &str;

    /// Returns the complete generated text for `prompt`.
    async fn generate(&self, prompt: &Prompt) -> Result<String, ModelError>;
}

/// Sampling defaults applied when a [`Prompt`] does not override them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sampling {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

impl Sampling {
    fn from_config(config: &ModelConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            max_output_tokens: config.max_output_tokens,
        }
    }

    fn merged(&self, prompt: &Prompt) -> Sampling {
        Sampling {
            temperature: prompt.temperature.or(self.temperature),
            top_p: prompt.top_p.or(self.top_p),
            max_output_tokens: prompt.max_output_tokens.or(self.max_output_tokens),
        }
    }
}

// ============ Disabled Model ============

pub struct DisabledModel;

#[async_trait]
impl GenerativeModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &Prompt) -> Result<String, ModelError> {
        Err(ModelError::Disabled)
    }
}

// ============ Gemini / Vertex AI ============

/// How requests to a Gemini endpoint are authenticated.
#[derive(Debug, Clone)]
pub enum GeminiAuth {
    /// Gemini API key, sent as `x-goog-api-key`.
    ApiKey(String),
    /// OAuth access token for Vertex AI, sent as a bearer token.
    Bearer(String),
}

pub struct GeminiModel {
    client: reqwest::Client,
    url: String,
    auth: GeminiAuth,
    model: String,
    sampling: Sampling,
    max_retries: u32,
}

impl GeminiModel {
    /// Client for the public Gemini API (or `endpoint` if set).
    pub fn gemini(config: &ModelConfig, api_key: String) -> Result<Self> {
        let model = required_model(config)?;
        let base = config
            .endpoint
            .clone()
            .unwrap_or_else(|| GEMINI_BASE_URL.to_string());
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            base.trim_end_matches('/'),
            model
        );
        Self::build(config, model, url, GeminiAuth::ApiKey(api_key))
    }

    /// Client for a Vertex AI publisher model in `config.project` / `config.location`.
    pub fn vertex(config: &ModelConfig, access_token: String) -> Result<Self> {
        let model = required_model(config)?;
        let project = config
            .project
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("project required for the vertex provider"))?;
        let base = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com", config.location));
        let url = format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:streamGenerateContent?alt=sse",
            base.trim_end_matches('/'),
            project,
            config.location,
            model
        );
        Self::build(config, model, url, GeminiAuth::Bearer(access_token))
    }

    fn build(config: &ModelConfig, model: String, url: String, auth: GeminiAuth) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url,
            auth,
            model,
            sampling: Sampling::from_config(config),
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, prompt: &Prompt) -> Value {
        let sampling = self.sampling.merged(prompt);
        let mut generation_config = serde_json::Map::new();
        if let Some(t) = sampling.max_output_tokens {
            generation_config.insert("maxOutputTokens".into(), json!(t));
        }
        if let Some(t) = sampling.temperature {
            generation_config.insert("temperature".into(), json!(t));
        }
        if let Some(p) = sampling.top_p {
            generation_config.insert("topP".into(), json!(p));
        }

        let safety: Vec<Value> = SAFETY_CATEGORIES
            .iter()
            .map(|c| json!({ "category": c, "threshold": "BLOCK_NONE" }))
            .collect();

        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt.user }] }],
            "generationConfig": generation_config,
            "safetySettings": safety,
        });
        if let Some(ref system) = prompt.system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        body
    }
}

#[async_trait]
impl GenerativeModel for GeminiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String, ModelError> {
        let body = self.request_body(prompt);
        let text = send_with_retry(self.max_retries, || {
            let req = self.client.post(&self.url).json(&body);
            match &self.auth {
                GeminiAuth::ApiKey(key) => req.header("x-goog-api-key", key),
                GeminiAuth::Bearer(token) => req.bearer_auth(token),
            }
        })
        .await?;
        non_empty(accumulate_sse(&text)?)
    }
}

/// Concatenates the candidate text of every `data:` event in an SSE body.
///
/// Each event carries a `GenerateContentResponse` chunk. Chunks without
/// candidate text (safety metadata, usage totals) contribute nothing.
pub fn accumulate_sse(body: &str) -> Result<String, ModelError> {
    let mut out = String::new();
    for line in body.lines() {
        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == "[DONE]" {
            continue;
        }
        let chunk: Value = serde_json::from_str(payload)
            .map_err(|e| ModelError::InvalidResponse(format!("bad stream chunk: {}", e)))?;
        if let Some(err) = chunk.get("error") {
            return Err(ModelError::InvalidResponse(err.to_string()));
        }
        out.push_str(&chunk_text(&chunk));
    }
    Ok(out)
}

fn chunk_text(chunk: &Value) -> String {
    chunk
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<String>()
        })
        .unwrap_or_default()
}

// ============ OpenAI-compatible ============

pub struct OpenAiModel {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    sampling: Sampling,
    max_retries: u32,
}

impl OpenAiModel {
    pub fn new(config: &ModelConfig, api_key: String) -> Result<Self> {
        let model = required_model(config)?;
        let base = config
            .endpoint
            .clone()
            .unwrap_or_else(|| OPENAI_BASE_URL.to_string());
        let mut url = format!("{}/chat/completions", base.trim_end_matches('/'));
        if let Some(ref version) = config.api_version {
            url.push_str(&format!("?api-version={}", version));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url,
            api_key,
            model,
            sampling: Sampling::from_config(config),
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, prompt: &Prompt) -> Value {
        let sampling = self.sampling.merged(prompt);
        let mut messages = Vec::new();
        if let Some(ref system) = prompt.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": prompt.user }));

        let mut body = json!({ "model": self.model, "messages": messages });
        if let Some(t) = sampling.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = sampling.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(m) = sampling.max_output_tokens {
            body["max_tokens"] = json!(m);
        }
        body
    }
}

#[async_trait]
impl GenerativeModel for OpenAiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String, ModelError> {
        let body = self.request_body(prompt);
        let text = send_with_retry(self.max_retries, || {
            self.client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                // Azure deployments authenticate with this header instead.
                .header("api-key", &self.api_key)
                .json(&body)
        })
        .await?;
        let json: Value = serde_json::from_str(&text)
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        non_empty(parse_chat_completion(&json)?)
    }
}

/// Extracts `choices[0].message.content` from a chat completion response.
pub fn parse_chat_completion(json: &Value) -> Result<String, ModelError> {
    json.pointer("/choices/0/message/content")
        .map(|c| c.as_str().unwrap_or_default().to_string())
        .ok_or_else(|| ModelError::InvalidResponse("missing choices[0].message.content".into()))
}

// ============ Shared transport ============

/// Sends a request built by `build`, retrying transient failures, and returns the body text.
async fn send_with_retry<F>(max_retries: u32, build: F) -> Result<String, ModelError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(attempt, ?delay, "retrying model request");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .map_err(|e| ModelError::Communication(e.to_string()));

                if status.is_success() {
                    return body;
                }

                let err = ModelError::Status {
                    status: status.as_u16(),
                    body: body.unwrap_or_default().chars().take(500).collect(),
                };
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                last_err = Some(ModelError::Communication(e.to_string()));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ModelError::Communication("retries exhausted".into())))
}

fn non_empty(text: String) -> Result<String, ModelError> {
    if text.trim().is_empty() {
        Err(ModelError::EmptyResponse)
    } else {
        Ok(text)
    }
}

fn required_model(config: &ModelConfig) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("model name required for provider '{}'", config.provider))
}

/// Create the appropriate [`GenerativeModel`] based on configuration.
///
/// | Config Value | Model | Credential |
/// |-------------|-------|------------|
/// | `"disabled"` | [`DisabledModel`] | — |
/// | `"gemini"` | [`GeminiModel`] | `GEMINI_API_KEY` |
/// | `"vertex"` | [`GeminiModel`] | `GOOGLE_ACCESS_TOKEN` |
/// | `"openai"` | [`OpenAiModel`] | `OPENAI_API_KEY` |
pub fn create_model(config: &ModelConfig) -> Result<Arc<dyn GenerativeModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "gemini" => {
            let key = env_var("GEMINI_API_KEY")?;
            Ok(Arc::new(GeminiModel::gemini(config, key)?))
        }
        "vertex" => {
            let token = env_var("GOOGLE_ACCESS_TOKEN")?;
            Ok(Arc::new(GeminiModel::vertex(config, token)?))
        }
        "openai" => {
            let key = env_var("OPENAI_API_KEY")?;
            Ok(Arc::new(OpenAiModel::new(config, key)?))
        }
        other => bail!("Unknown model provider: {}", other),
    }
}

fn env_var(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{} environment variable not set", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_config(provider: &str) -> ModelConfig {
        ModelConfig {
            provider: provider.to_string(),
            model: Some("test-model".to_string()),
            ..ModelConfig::analysis_defaults()
        }
    }

    #[test]
    fn sse_chunks_are_concatenated() {
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"# Functional\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\" requirements\"}]}}]}\r\n\r\n",
            "data: {\"usageMetadata\":{\"totalTokenCount\":12}}\r\n\r\n",
        );
        assert_eq!(accumulate_sse(body).unwrap(), "# Functional requirements");
    }

    #[test]
    fn sse_error_event_is_reported() {
        let body = "data: {\"error\":{\"code\":500,\"message\":\"overloaded\"}}\n\n";
        assert!(matches!(
            accumulate_sse(body),
            Err(ModelError::InvalidResponse(_))
        ));
    }

    #[test]
    fn chat_completion_content_is_extracted() {
        let json = json!({ "choices": [{ "message": { "role": "assistant", "content": "hello" } }] });
        assert_eq!(parse_chat_completion(&json).unwrap(), "hello");
        assert!(parse_chat_completion(&json!({ "choices": [] })).is_err());
    }

    #[test]
    fn gemini_body_carries_sampling_and_safety() {
        let model = GeminiModel::gemini(&model_config("gemini"), "k".into()).unwrap();
        let body = model.request_body(&Prompt::user("analyse this").with_system("be terse"));
        assert_eq!(body["contents"][0]["parts"][0]["text"], "analyse this");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 8192);
        assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
        assert!(model.url.ends_with("/v1beta/models/test-model:streamGenerateContent?alt=sse"));
    }

    #[test]
    fn vertex_url_uses_project_and_location() {
        let mut cfg = model_config("vertex");
        cfg.project = Some("acme".to_string());
        let model = GeminiModel::vertex(&cfg, "t".into()).unwrap();
        assert_eq!(
            model.url,
            "https://asia-northeast1-aiplatform.googleapis.com/v1/projects/acme/locations/asia-northeast1/publishers/google/models/test-model:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn openai_prompt_overrides_sampling() {
        let mut cfg = model_config("openai");
        cfg.endpoint = Some("https://example.openai.azure.com/openai/deployments/gpt4/".into());
        cfg.api_version = Some("2024-02-15-preview".into());
        let model = OpenAiModel::new(&cfg, "k".into()).unwrap();
        let prompt = Prompt {
            temperature: Some(0.7),
            ..Prompt::user("q")
        };
        let body = model.request_body(&prompt);
        assert!((body["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(body["max_tokens"], 8192);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(
            model.url,
            "https://example.openai.azure.com/openai/deployments/gpt4/chat/completions?api-version=2024-02-15-preview"
        );
    }

    #[tokio::test]
    async fn disabled_model_errors() {
        let err = DisabledModel.generate(&Prompt::user("x")).await.unwrap_err();
        assert!(matches!(err, ModelError::Disabled));
    }
}
