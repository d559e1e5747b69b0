//! TOML configuration.
//!
//! The configuration is loaded once by the `kidx` binary and passed by
//! reference into the [`Engine`](crate::engine::Engine). Core functions never
//! read environment variables or global state for their settings; everything
//! arrives as explicit parameters derived from this struct.
//!
//! Every section is optional; omitted values fall back to the defaults below.
//!
//! ```toml
//! [data]
//! dir = "./data"
//!
//! [chunking]
//! chunk_size = 1200
//! overlap = 200
//!
//! [retrieval]
//! top_k = 5
//! max_distance = 0.45
//! use_semantic = true
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [vector_store]
//! backend = "sqlite"
//!
//! [ingest]
//! exclude_globs = ["**/archive/**"]
//! fingerprint = "stat"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::IndexError;
use crate::models::FingerprintMode;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DataConfig {
    /// Root under which every corpus gets `corpora/<name>/`.
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1200
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Semantic hits farther than this are dropped. `None` keeps everything.
    #[serde(default)]
    pub max_distance: Option<f64>,
    #[serde(default)]
    pub use_semantic: bool,
    /// Upper bound for each embedding / vector store call on the query path.
    #[serde(default = "default_retrieval_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_distance: None,
            use_semantic: false,
            timeout_ms: default_retrieval_timeout_ms(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_retrieval_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for HTTP providers (Ollama defaults to `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VectorStoreConfig {
    /// `sqlite` (persistent, one file per corpus) or `memory`.
    #[serde(default = "default_vector_backend")]
    pub backend: String,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
        }
    }
}

fn default_vector_backend() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct IngestConfig {
    /// Extra exclude patterns, matched against paths relative to the root.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub fingerprint: FingerprintMode,
    /// Default for `IngestOptions::use_semantic` when the CLI flag is absent.
    #[serde(default)]
    pub use_semantic: bool,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(IndexError::config("chunking.chunk_size must be > 0").into());
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(IndexError::config("chunking.overlap must be < chunking.chunk_size").into());
        }

        if self.retrieval.top_k == 0 {
            return Err(IndexError::config("retrieval.top_k must be >= 1").into());
        }
        if let Some(d) = self.retrieval.max_distance {
            if !(d >= 0.0) {
                return Err(IndexError::config("retrieval.max_distance must be >= 0").into());
            }
        }

        if self.embedding.batch_size == 0 {
            return Err(IndexError::config("embedding.batch_size must be > 0").into());
        }

        match self.embedding.provider.as_str() {
            "disabled" | "hash" => {}
            "ollama" | "openai" => {
                if self.embedding.model.is_none() {
                    return Err(IndexError::config(format!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    ))
                    .into());
                }
                if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                    return Err(IndexError::config(format!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    ))
                    .into());
                }
            }
            other => {
                return Err(IndexError::config(format!(
                    "Unknown embedding provider: '{}'. Must be disabled, hash, ollama, or openai.",
                    other
                ))
                .into())
            }
        }

        if (self.retrieval.use_semantic || self.ingest.use_semantic) && !self.embedding.is_enabled()
        {
            return Err(IndexError::config(
                "use_semantic requires an [embedding] provider other than 'disabled'",
            )
            .into());
        }

        match self.vector_store.backend.as_str() {
            "sqlite" | "memory" => {}
            other => {
                return Err(IndexError::config(format!(
                    "Unknown vector_store.backend: '{}'. Must be sqlite or memory.",
                    other
                ))
                .into())
            }
        }

        Ok(())
    }
}
