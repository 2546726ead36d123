//! Embedding service client and vector utilities.
//!
//! [`EmbeddingClient`] is the seam between the pipeline and the external
//! embedding model: production code talks to an OpenAI-compatible
//! `/embeddings` endpoint through [`HttpEmbeddingClient`]; tests substitute
//! deterministic implementations.
//!
//! Vector utilities for the SQLite-backed index:
//! - [`vec_to_blob`] / [`blob_to_vec`] — little-endian f32 BLOB codec
//! - [`cosine_similarity`] — similarity between two embedding vectors
//!
//! # Retry strategy
//!
//! HTTP 429 and 5xx responses and network errors retry with exponential
//! backoff (1s, 2s, 4s, ... capped at 32s); other 4xx responses fail
//! immediately.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// A service that turns text into fixed-dimension float vectors.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Model identifier recorded alongside each index generation.
    fn model_name(&self) -> &str;

    /// Vector dimensionality, fixed for the lifetime of one index.
    fn dims(&self) -> usize;

    /// Embed a single text (e.g. a question at retrieval time).
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// Build the embedding client from configuration.
///
/// Fails early if the configured API-key environment variable is not set, so
/// commands report a missing key before any work starts.
pub fn create_client(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingClient>> {
    Ok(Box::new(HttpEmbeddingClient::new(config)?))
}

/// Client for an OpenAI-compatible embeddings endpoint.
pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            dims: config.dims,
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dims,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: EmbeddingsResponse = response
                            .json()
                            .await
                            .context("Invalid embeddings response body")?;
                        return extract_vectors(parsed, texts.len(), self.dims);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Embedding API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Order vectors by the response's `index` field and check dimensions.
fn extract_vectors(
    parsed: EmbeddingsResponse,
    expected_count: usize,
    expected_dims: usize,
) -> Result<Vec<Vec<f32>>> {
    if parsed.data.len() != expected_count {
        bail!(
            "Embedding response returned {} vectors for {} inputs",
            parsed.data.len(),
            expected_count
        );
    }

    let mut data = parsed.data;
    data.sort_by_key(|d| d.index);

    let mut vectors = Vec::with_capacity(data.len());
    for datum in data {
        if datum.embedding.len() != expected_dims {
            bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                expected_dims,
                datum.embedding.len()
            );
        }
        vectors.push(datum.embedding);
    }

    Ok(vectors)
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use talkdb::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two embedding vectors, in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
