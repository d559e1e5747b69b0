//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`OllamaProvider`]**: `POST {url}/api/embed` on a local Ollama.
//! - **[`OpenAIProvider`]**: the OpenAI embeddings API.
//! - **[`HashEmbedder`]**: deterministic feature hashing, fully offline.
//!
//! Providers make exactly one request per call. Retrying is layered on top
//! by [`embed_with_retry`], which only retries errors classified as
//! [`IndexError::TransientBackend`].
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: `retry_backoff_ms`, doubling per attempt (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::IndexError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    /// Embed `texts`, returning one vector per input in the same order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the provider named by `config.provider`. `model_override` replaces
/// `config.model` (used by `kidx ingest --embed-model`).
pub fn create_provider(
    config: &EmbeddingConfig,
    model_override: Option<&str>,
) -> Result<Arc<dyn EmbeddingProvider>> {
    let model = model_override
        .map(|m| m.to_string())
        .or_else(|| config.model.clone());

    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaProvider::new(config, model)?)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config, model)?)),
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dims.unwrap_or(256)))),
        "disabled" => Err(IndexError::config("embedding provider is disabled").into()),
        other => Err(IndexError::config(format!("Unknown embedding provider: {}", other)).into()),
    }
}

/// A provider plus the batching and retry policy used on the ingest path.
#[derive(Clone)]
pub struct Embedder {
    pub provider: Arc<dyn EmbeddingProvider>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Embedder {
    pub fn from_config(config: &EmbeddingConfig, model_override: Option<&str>) -> Result<Self> {
        Ok(Self {
            provider: create_provider(config, model_override)?,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed `texts` in batches of `batch_size`, retrying each batch.
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors =
                embed_with_retry(self.provider.as_ref(), batch, self.max_retries, self.retry_backoff)
                    .await?;
            out.extend(vectors);
        }
        Ok(out)
    }

    /// Embed a single query. No retries: the query path degrades instead.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.provider.embed(&[text.to_string()]).await?;
        check_dims(self.provider.as_ref(), &results)?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// Vectors of the wrong width would score 0 against everything in the store.
fn check_dims(provider: &dyn EmbeddingProvider, vectors: &[Vec<f32>]) -> Result<()> {
    let expected = provider.dims();
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        bail!(
            "{} returned a {}-dimensional vector, expected {} (check embedding.dims)",
            provider.model_name(),
            bad.len(),
            expected
        );
    }
    Ok(())
}

/// Call `provider.embed` with bounded retries and exponential backoff.
pub async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    max_retries: u32,
    backoff: Duration,
) -> Result<Vec<Vec<f32>>> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff * (1u32 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match provider.embed(texts).await {
            Ok(vectors) => {
                if vectors.len() != texts.len() {
                    bail!(
                        "embedding provider returned {} vectors for {} inputs",
                        vectors.len(),
                        texts.len()
                    );
                }
                check_dims(provider, &vectors)?;
                return Ok(vectors);
            }
            Err(e) if is_transient(&e) => {
                tracing::debug!(attempt, error = %e, "embedding attempt failed");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
}

fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<IndexError>(),
            Some(IndexError::TransientBackend(_))
        )
    })
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// Map a non-success HTTP status to a transient or permanent error.
fn status_error(service: &str, status: reqwest::StatusCode, body: String) -> anyhow::Error {
    if status.as_u16() == 429 || status.is_server_error() {
        IndexError::backend(format!("{} API error {}: {}", service, status, body)).into()
    } else {
        anyhow::anyhow!("{} API error {}: {}", service, status, body)
    }
}

fn parse_vector(value: &serde_json::Value, service: &str) -> Result<Vec<f32>> {
    Ok(value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Invalid {} response: embedding is not an array", service))?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured Ollama URL (default: `http://localhost:11434`).
/// Requires Ollama to be running with an embedding model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig, model: Option<String>) -> Result<Self> {
        let model = model.ok_or_else(|| IndexError::config("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| IndexError::config("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                IndexError::backend(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(status_error("Ollama", status, body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| IndexError::backend(format!("Ollama response body: {}", e)))?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings.iter().map(|e| parse_vector(e, "Ollama")).collect()
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls the `POST /v1/embeddings` endpoint with the configured model.
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig, model: Option<String>) -> Result<Self> {
        let model = model.ok_or_else(|| IndexError::config("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| IndexError::config("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| IndexError::config("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexError::backend(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(status_error("OpenAI", status, body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| IndexError::backend(format!("OpenAI response body: {}", e)))?;
        parse_openai_response(&json)
    }
}

/// Extracts the `data[].embedding` arrays, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, parse_vector(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Hash Embedder ============

/// Offline embedder: each lowercase alphanumeric token is hashed (FNV-1a)
/// into one of `dims` buckets with a hash-derived sign, then the vector is
/// L2-normalised. Texts sharing vocabulary land close together.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        h ^= *b as u64;
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian bytes for SQLite BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
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
