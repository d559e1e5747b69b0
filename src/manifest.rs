//! Change-detection manifest (`manifest.jsonl`).
//!
//! One JSON line per ingest decision; when a document id appears more than
//! once the last line wins. The in-memory view is a `HashMap` keyed by
//! document id. A missing or unreadable manifest is treated as empty, which
//! simply makes every document look new.

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::jsonl;
use crate::models::{FingerprintMode, ManifestEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip,
    Process,
}

pub struct Manifest {
    path: PathBuf,
    entries: HashMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn load(path: &Path) -> Self {
        let rows: Vec<ManifestEntry> = match jsonl::read_lines(path) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "manifest unreadable, treating all documents as new");
                Vec::new()
            }
        };
        let mut entries = HashMap::with_capacity(rows.len());
        for row in rows {
            entries.insert(row.doc_id.clone(), row);
        }
        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn get(&self, doc_id: &str) -> Option<&ManifestEntry> {
        self.entries.get(doc_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Skip only when the stored fingerprint matches and `force` is off.
    pub fn should_process(&self, doc_id: &str, fingerprint: &str, force: bool) -> Decision {
        if force {
            return Decision::Process;
        }
        match self.entries.get(doc_id) {
            Some(prev) if prev.fingerprint == fingerprint => Decision::Skip,
            _ => Decision::Process,
        }
    }

    pub fn record(&mut self, entry: ManifestEntry) -> Result<()> {
        jsonl::append_line(&self.path, &entry)?;
        self.entries.insert(entry.doc_id.clone(), entry);
        Ok(())
    }

    /// Drop a document from the in-memory view; persisted by [`compact`](Self::compact).
    pub fn forget(&mut self, doc_id: &str) -> bool {
        self.entries.remove(doc_id).is_some()
    }

    /// Rewrite the file with one line per live document.
    pub fn compact(&self) -> Result<()> {
        let mut rows: Vec<&ManifestEntry> = self.entries.values().collect();
        rows.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        jsonl::write_lines_atomic(&self.path, &rows)
    }
}

/// Compute the fingerprint of `path` in the given mode.
pub fn fingerprint(path: &Path, mode: FingerprintMode) -> std::io::Result<String> {
    match mode {
        FingerprintMode::Stat => {
            let meta = std::fs::metadata(path)?;
            let mtime = meta
                .modified()?
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            Ok(format!("stat:{}:{}", mtime, meta.len()))
        }
        FingerprintMode::Sha256 => {
            let mut file = std::fs::File::open(path)?;
            let mut hasher = Sha256::new();
            std::io::copy(&mut file, &mut hasher)?;
            Ok(format!("sha256:{:x}", hasher.finalize()))
        }
    }
}
