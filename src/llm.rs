//! Language-model providers.
//!
//! Implements [`LanguageModel`] for each `[llm.<name>]` provider:
//! - **[`DisabledModel`]**: always errors; the default for unconfigured names.
//! - **[`OpenAiModel`]**: OpenAI-compatible `POST {base_url}/chat/completions`
//!   with retry and backoff.
//! - **[`StaticModel`]**: replies with a fixed response, streamed word by
//!   word. Useful offline and in tests.
//!
//! Models are built once at startup into an [`LlmRegistry`] and looked up
//! by name when a request's chain is assembled.
//!
//! # Retry Strategy
//!
//! The OpenAI provider retries transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chat_engine_core::traits::{LanguageModel, TextStream};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, LlmConfig};

/// Named language models available to chains.
pub struct LlmRegistry {
    models: BTreeMap<String, Arc<dyn LanguageModel>>,
}

impl LlmRegistry {
    pub fn new() -> Self {
        Self {
            models: BTreeMap::new(),
        }
    }

    /// Build every `[llm.<name>]` entry.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for (name, llm) in &config.llm {
            registry.register(name, create_llm(name, llm)?);
        }
        Ok(registry)
    }

    pub fn register(&mut self, name: impl Into<String>, model: Arc<dyn LanguageModel>) {
        self.models.insert(name.into(), model);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn LanguageModel>> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no llm configured with name: {}", name))
    }

    pub fn names(&self) -> Vec<&str> {
        self.models.keys().map(|k| k.as_str()).collect()
    }
}

impl Default for LlmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn create_llm(name: &str, config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiModel::new(name, config)?)),
        "static" => {
            let response = config
                .response
                .clone()
                .ok_or_else(|| anyhow!("llm.{}.response required for static provider", name))?;
            Ok(Arc::new(StaticModel::new(name, response)))
        }
        "disabled" => Ok(Arc::new(DisabledModel::new(name))),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ Disabled ============

pub struct DisabledModel {
    name: String,
}

impl DisabledModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl LanguageModel for DisabledModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("llm '{}' is disabled", self.name)
    }
}

// ============ Static ============

/// Replies with the same text to every prompt.
pub struct StaticModel {
    name: String,
    response: String,
}

impl StaticModel {
    pub fn new(name: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response: response.into(),
        }
    }
}

#[async_trait]
impl LanguageModel for StaticModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(self.response.clone())
    }

    async fn complete_stream(&self, _prompt: &str) -> Result<TextStream> {
        let words: Vec<Result<String>> = self
            .response
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(words)))
    }
}

// ============ OpenAI-compatible ============

/// Chat-completions client for OpenAI and compatible servers.
///
/// The bearer key is read from `OPENAI_API_KEY` when the model is built.
/// Streaming uses the trait default: the full completion as one chunk.
pub struct OpenAiModel {
    name: String,
    model: String,
    endpoint: String,
    api_key: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiModel {
    pub fn new(name: &str, config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("llm.{}.model required for OpenAI provider", name))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            name: name.to_string(),
            model,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            client,
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = self.max_tokens {
            body["max_tokens"] = json!(m);
        }
        body
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = self.request_body(prompt);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(llm = %self.name, attempt, ?delay, "retrying completion");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return parse_completion(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("LLM API error {}: {}", status, body_text));
                        continue;
                    }
                    bail!("LLM API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Completion failed after retries")))
    }
}

/// Extract `choices[0].message.content`.
fn parse_completion(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Invalid completion response: missing choices[0].message.content"))
}
