//! Core data models shared by the ingestion and retrieval pipeline.
//!
//! Everything here that is persisted (chunks, manifest entries, failure
//! records) derives serde so the JSONL line formats stay defined in one place.

use serde::{Deserialize, Serialize};

/// How a document's fingerprint is computed for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// `stat:{mtime_nanos}:{size}`. Cheap, never reads content.
    #[default]
    Stat,
    /// `sha256:{hex}` over the file bytes.
    Sha256,
}

/// A bounded span of a document's text; one row of the chunk ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub source_path: String,
    pub text: String,
    pub ordinal: usize,
    /// Char offset of the chunk start within the parsed text.
    pub offset: usize,
    /// SHA-256 of `text`.
    pub hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ingested,
    Empty,
    ParseFailed,
}

/// One line of `manifest.jsonl`. Later lines for the same `doc_id` win.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub doc_id: String,
    pub fingerprint: String,
    /// RFC 3339.
    pub last_ingested_at: String,
    pub outcome: Outcome,
    pub chunks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Stat,
    /// Extension outside the allow-list. Logged once per document, never
    /// counted as a failed file.
    Unsupported,
    Parse,
    Embedding,
    Store,
    Io,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Stat => "stat",
            FailureKind::Unsupported => "unsupported",
            FailureKind::Parse => "parse",
            FailureKind::Embedding => "embedding",
            FailureKind::Store => "store",
            FailureKind::Io => "io",
        };
        f.write_str(s)
    }
}

/// One line of `ingest_failures.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestFailure {
    pub doc_id: String,
    pub source_path: String,
    pub kind: FailureKind,
    pub error: String,
    pub timestamp: String,
}

/// Which retrieval path produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalStrategy {
    Semantic,
    Lexical,
}

impl std::fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrievalStrategy::Semantic => f.write_str("semantic"),
            RetrievalStrategy::Lexical => f.write_str("lexical"),
        }
    }
}

/// A retrieval result, best-first within its result list.
#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    pub chunk_id: String,
    pub doc_id: String,
    pub source_path: String,
    pub text: String,
    pub score: f64,
    /// Set for semantic hits only.
    pub distance: Option<f64>,
    pub strategy: RetrievalStrategy,
}

/// Per-call ingest parameters. `None` fields fall back to the loaded config.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Clear ledger, manifest, doc map and failure log before ingesting.
    pub reset: bool,
    /// Clear the similarity store before ingesting.
    pub reset_vector_store: bool,
    pub use_semantic: bool,
    pub embed_model: Option<String>,
    pub chunk_size: Option<usize>,
    pub overlap: Option<usize>,
    /// Reprocess documents even when their fingerprint is unchanged.
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub files_discovered: usize,
    pub processed: usize,
    pub skipped: usize,
    pub unsupported: usize,
    pub empty: usize,
    pub failed: usize,
    pub removed: usize,
    pub chunks_written: usize,
    pub chunks_retracted: usize,
    pub duration_ms: u64,
}
