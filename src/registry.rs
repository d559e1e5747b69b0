//! Corpus registry: name validation and per-corpus storage layout.
//!
//! Every corpus lives under `<data_dir>/corpora/<name>/` and owns its own
//! artifacts. Nothing is shared between corpora, so two corpora can be
//! ingested and queried independently.
//!
//! ```text
//! data/corpora/<name>/
//!   index.jsonl            chunk ledger
//!   manifest.jsonl         change-detection manifest
//!   ingest_failures.jsonl  failure log
//!   doc_chunk_map.json     doc id -> chunk ids
//!   vectors.sqlite         similarity store (sqlite backend)
//!   ingest.lock            held while `kidx ingest` runs
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::error::IndexError;

const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct CorpusRegistry {
    data_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CorpusHandle {
    pub name: String,
    pub dir: PathBuf,
    pub index: PathBuf,
    pub manifest: PathBuf,
    pub failures: PathBuf,
    pub docmap: PathBuf,
    pub vectors: PathBuf,
    pub lock: PathBuf,
}

/// `[A-Za-z0-9][A-Za-z0-9_-]{0,63}`; rejects anything that could escape
/// the corpora directory.
pub fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphanumeric()
                && name.len() <= MAX_NAME_LEN
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        None => false,
    };
    if !valid {
        return Err(IndexError::config(format!(
            "invalid corpus name '{}': use 1-64 letters, digits, '_' or '-', starting with a letter or digit",
            name
        ))
        .into());
    }
    Ok(())
}

impl CorpusRegistry {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
        }
    }

    pub fn corpora_dir(&self) -> PathBuf {
        self.data_dir.join("corpora")
    }

    /// Validate `name` and return its handle, creating the directory lazily.
    pub fn resolve(&self, name: &str) -> Result<CorpusHandle> {
        let handle = self.handle(name)?;
        std::fs::create_dir_all(&handle.dir)
            .with_context(|| format!("creating corpus directory {}", handle.dir.display()))?;
        Ok(handle)
    }

    /// Like [`resolve`](Self::resolve) but never touches the filesystem.
    pub fn handle(&self, name: &str) -> Result<CorpusHandle> {
        validate_name(name)?;
        let dir = self.corpora_dir().join(name);
        Ok(CorpusHandle {
            name: name.to_string(),
            index: dir.join("index.jsonl"),
            manifest: dir.join("manifest.jsonl"),
            failures: dir.join("ingest_failures.jsonl"),
            docmap: dir.join("doc_chunk_map.json"),
            vectors: dir.join("vectors.sqlite"),
            lock: dir.join("ingest.lock"),
            dir,
        })
    }

    /// Names of existing corpora, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let dir = self.corpora_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
