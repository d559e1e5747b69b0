//! Ingest failure log (`ingest_failures.jsonl`).
//!
//! Append-only; one line per document that could not be ingested in a run.
//! Failures never stop the run, they are only recorded here and counted in
//! the summary.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::jsonl;
use crate::models::{FailureKind, IngestFailure};

pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn record(&self, doc_id: &str, source_path: &str, kind: FailureKind, error: &str) -> Result<()> {
        tracing::warn!(doc_id, kind = %kind, error, "ingest failure");
        let failure = IngestFailure {
            doc_id: doc_id.to_string(),
            source_path: source_path.to_string(),
            kind,
            error: error.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        jsonl::append_line(&self.path, &failure)
    }

    pub fn load(&self) -> Result<Vec<IngestFailure>> {
        jsonl::read_lines(&self.path)
    }

    pub fn clear(&self) -> Result<()> {
        crate::ledger::remove_if_exists(&self.path)
    }
}
