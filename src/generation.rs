//! Text-generation backends used by the summarizer.
//!
//! Defines the [`TextGenerator`] trait and concrete implementations:
//! - **[`OpenAIGenerator`]**: calls the OpenAI chat completions API with retry and backoff.
//! - **[`ExtractiveGenerator`]**: offline, returns the leading sentences of the content.
//!
//! # Retry Strategy
//!
//! The OpenAI generator uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SummarizerConfig;

/// One generation call: fixed instructions plus the material to work on.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub instructions: String,
    /// Name of the document being summarized.
    pub subject: String,
    pub content: String,
    /// Upper bound on the length of the returned text, in characters.
    pub max_output_chars: usize,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Returns the backend identifier (e.g. `"gpt-4o-mini"`, `"extractive"`).
    fn model_name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

// ============ Extractive Generator ============

/// Generator that needs no backend: it returns whole leading sentences of
/// the content that fit in the output budget.
pub struct ExtractiveGenerator;

#[async_trait]
impl TextGenerator for ExtractiveGenerator {
    fn model_name(&self) -> &str {
        "extractive"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        Ok(leading_sentences(&request.content, request.max_output_chars))
    }
}

fn leading_sentences(text: &str, budget: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= budget {
        return flat;
    }
    let prefix: String = flat.chars().take(budget).collect();
    match prefix.rfind(['.', '!', '?']) {
        Some(end) if end > 0 => prefix[..=end].to_string(),
        _ => prefix,
    }
}

// ============ OpenAI Generator ============

/// Generator using the OpenAI chat completions API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIGenerator {
    model: String,
    api_key: String,
    config: SummarizerConfig,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    /// # Errors
    ///
    /// Returns an error if `model` is not set in config or `OPENAI_API_KEY`
    /// is not in the environment.
    pub fn new(config: &SummarizerConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("summarizer.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            api_key,
            config: config.clone(),
            client,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.config.temperature,
            // Roughly four characters per token, with headroom.
            "max_tokens": (request.max_output_chars / 3).max(16),
            "messages": [
                { "role": "system", "content": request.instructions },
                { "role": "user", "content": format!("Document: {}\n\n{}", request.subject, request.content) },
            ],
        });

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, ?delay, "retrying chat completion");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_chat_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, "OpenAI API transient error");
                        last_err = Some(anyhow::anyhow!(
                            "OpenAI API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Chat completion failed after retries")))
    }
}

/// Extract `choices[0].message.content` from a chat completions response.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

/// Create the configured [`TextGenerator`].
///
/// | Config Value | Generator |
/// |-------------|----------|
/// | `"extractive"` | [`ExtractiveGenerator`] |
/// | `"openai"` | [`OpenAIGenerator`] |
pub fn create_generator(config: &SummarizerConfig) -> Result<Arc<dyn TextGenerator>> {
    match config.provider.as_str() {
        "extractive" => Ok(Arc::new(ExtractiveGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        other => bail!("Unknown summarizer provider: {}", other),
    }
}
