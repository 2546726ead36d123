//! Generation service client.
//!
//! [`GenerationClient`] is the seam for the language model: production code
//! talks to an OpenAI-compatible chat-completions endpoint through
//! [`HttpGenerationClient`]; tests substitute scripted implementations.
//!
//! Two request shapes: [`generate_structured`](GenerationClient::generate_structured)
//! asks for a JSON object (used by query synthesis, where the reply must
//! parse into a fixed shape) and [`generate_text`](GenerationClient::generate_text)
//! asks for plain prose (used by the insight summary). Both report token
//! usage when the service provides it.
//!
//! HTTP 429 and 5xx responses and network errors retry with the same
//! exponential backoff as the embedding client, but fewer times: these
//! calls sit on the interactive path.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::models::UsageStats;

/// One completed generation: the raw text plus usage accounting.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub content: String,
    pub usage: UsageStats,
}

/// A service that turns a prompt into text.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Request a reply constrained to a single JSON object.
    async fn generate_structured(&self, prompt: &str) -> Result<GenerationOutput>;

    /// Request a plain prose reply.
    async fn generate_text(&self, prompt: &str) -> Result<GenerationOutput>;
}

/// Build the generation client from configuration.
pub fn create_client(config: &GenerationConfig) -> Result<Box<dyn GenerationClient>> {
    Ok(Box::new(HttpGenerationClient::new(config)?))
}

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct HttpGenerationClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f64,
    max_output_tokens: u32,
    max_retries: u32,
    api_key: String,
}

impl HttpGenerationClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            max_retries: config.max_retries,
            api_key,
        })
    }

    async fn generate(&self, prompt: &str, json_mode: bool) -> Result<GenerationOutput> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.temperature,
            max_tokens: self.max_output_tokens,
            response_format: json_mode.then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        };

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: ChatResponse = response
                            .json()
                            .await
                            .context("Invalid chat completions response body")?;
                        return extract_output(parsed);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Generation API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Generation API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Generation failed after retries")))
    }
}

/// Pull the first choice's content and the usage block out of a response.
fn extract_output(parsed: ChatResponse) -> Result<GenerationOutput> {
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Generation response contained no choices"))?;
    let content = choice
        .message
        .content
        .ok_or_else(|| anyhow::anyhow!("Generation response contained no content"))?;

    let usage = parsed
        .usage
        .map(|u| UsageStats {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    Ok(GenerationOutput { content, usage })
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn generate_structured(&self, prompt: &str) -> Result<GenerationOutput> {
        self.generate(prompt, true).await
    }

    async fn generate_text(&self, prompt: &str) -> Result<GenerationOutput> {
        self.generate(prompt, false).await
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    // Null for some models mid-reasoning; treated as a malformed reply.
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}
