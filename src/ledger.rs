//! Chunk ledger (`index.jsonl`) and the document → chunk map
//! (`doc_chunk_map.json`).
//!
//! The ledger is the source of truth for lexical retrieval: one JSON line per
//! [`Chunk`]. New documents are appended; a document that already has rows is
//! replaced by an atomic whole-file rewrite. The map records which chunk ids
//! each document currently owns so retraction can reach the similarity store
//! without scanning the ledger.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::jsonl;
use crate::models::Chunk;

pub struct ChunkLedger {
    path: PathBuf,
}

impl ChunkLedger {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<Vec<Chunk>> {
        jsonl::read_lines(&self.path)
    }

    /// Document ids that currently own at least one row.
    pub fn doc_ids(&self) -> Result<HashSet<String>> {
        Ok(self.load()?.into_iter().map(|c| c.doc_id).collect())
    }

    pub fn append(&self, chunks: &[Chunk]) -> Result<()> {
        jsonl::append_lines(&self.path, chunks)
    }

    /// Drop every row owned by `doc_ids`, then add `new_chunks`, in one
    /// atomic rewrite. Returns the chunk ids that were removed.
    pub fn replace(&self, doc_ids: &HashSet<String>, new_chunks: &[Chunk]) -> Result<Vec<String>> {
        let rows = self.load()?;
        let mut removed = Vec::new();
        let mut kept: Vec<Chunk> = Vec::with_capacity(rows.len() + new_chunks.len());
        for row in rows {
            if doc_ids.contains(&row.doc_id) {
                removed.push(row.chunk_id);
            } else {
                kept.push(row);
            }
        }
        kept.extend_from_slice(new_chunks);
        jsonl::write_lines_atomic(&self.path, &kept)?;
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        remove_if_exists(&self.path)
    }
}

#[derive(Debug)]
pub struct DocChunkMap {
    path: PathBuf,
    map: BTreeMap<String, Vec<String>>,
}

impl DocChunkMap {
    /// Load the map; an unreadable or malformed file loads as empty.
    pub fn load(path: &Path) -> Self {
        let map = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "doc chunk map is malformed, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "doc chunk map unreadable, starting empty");
                BTreeMap::new()
            }
        };
        Self {
            path: path.to_path_buf(),
            map,
        }
    }

    pub fn get(&self, doc_id: &str) -> Option<&Vec<String>> {
        self.map.get(doc_id)
    }

    pub fn set(&mut self, doc_id: &str, chunk_ids: Vec<String>) {
        self.map.insert(doc_id.to_string(), chunk_ids);
    }

    pub fn remove(&mut self, doc_id: &str) -> Option<Vec<String>> {
        self.map.remove(doc_id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = &String> {
        self.map.keys()
    }

    pub fn chunk_ids(&self) -> impl Iterator<Item = &String> {
        self.map.values().flatten()
    }

    pub fn save(&self) -> Result<()> {
        let body = serde_json::to_vec_pretty(&self.map).context("serialising doc chunk map")?;
        jsonl::write_atomic(&self.path, &body)
    }
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}
