//! Corpus statistics and consistency report.
//!
//! Gives a quick picture of what a corpus holds: chunk and document counts,
//! failure log size, vector coverage, on-disk footprint and the sources that
//! contribute the most chunks. Also cross-checks the doc→chunk map against
//! the chunk ledger so drift can be repaired with a forced reingest.

use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::config::Config;
use crate::error::IndexError;
use crate::failures::FailureLog;
use crate::ledger::{ChunkLedger, DocChunkMap};
use crate::manifest::Manifest;
use crate::registry::CorpusHandle;
use crate::vector_store::SimilarityStore;

const TOP_SOURCES: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct SourceCount {
    pub source_path: String,
    pub chunks: usize,
}

/// Disagreements between the doc→chunk map and the chunk ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Chunk ids listed in the map with no ledger row.
    pub missing_from_ledger: Vec<String>,
    /// Documents with ledger rows but no map entry.
    pub unmapped_docs: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_from_ledger.is_empty() && self.unmapped_docs.is_empty()
    }

    /// The report as an [`IndexError::Consistency`], if anything is off.
    pub fn to_error(&self) -> Option<IndexError> {
        if self.is_consistent() {
            return None;
        }
        Some(IndexError::Consistency(format!(
            "{} mapped chunk(s) missing from ledger, {} ledger document(s) not in map; run `kidx ingest --force` to repair",
            self.missing_from_ledger.len(),
            self.unmapped_docs.len()
        )))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CorpusStats {
    pub corpus: String,
    pub chunk_count: usize,
    pub doc_count: usize,
    pub failure_count: usize,
    pub manifest_entries: usize,
    pub docmap_entries: usize,
    /// `None` when the corpus has no similarity store yet.
    pub vector_count: Option<usize>,
    pub store_location: Option<String>,
    pub effective_config: Config,
    /// Total size of the corpus directory.
    pub bytes: u64,
    pub top_sources: Vec<SourceCount>,
    pub consistency: ConsistencyReport,
}

pub async fn corpus_stats(
    handle: &CorpusHandle,
    config: &Config,
    store: Option<&dyn SimilarityStore>,
) -> Result<CorpusStats> {
    let chunks = ChunkLedger::new(&handle.index).load()?;
    let docmap = DocChunkMap::load(&handle.docmap);
    let manifest = Manifest::load(&handle.manifest);
    let failures = FailureLog::new(&handle.failures).load()?;

    let mut per_source: HashMap<&str, usize> = HashMap::new();
    let mut ledger_docs: BTreeSet<&str> = BTreeSet::new();
    let mut ledger_ids: HashSet<&str> = HashSet::new();
    for c in &chunks {
        *per_source.entry(c.source_path.as_str()).or_default() += 1;
        ledger_docs.insert(c.doc_id.as_str());
        ledger_ids.insert(c.chunk_id.as_str());
    }

    let mut top_sources: Vec<SourceCount> = per_source
        .into_iter()
        .map(|(source_path, chunks)| SourceCount {
            source_path: source_path.to_string(),
            chunks,
        })
        .collect();
    top_sources.sort_by(|a, b| b.chunks.cmp(&a.chunks).then_with(|| a.source_path.cmp(&b.source_path)));
    top_sources.truncate(TOP_SOURCES);

    let consistency = ConsistencyReport {
        missing_from_ledger: docmap
            .chunk_ids()
            .filter(|id| !ledger_ids.contains(id.as_str()))
            .cloned()
            .collect(),
        unmapped_docs: ledger_docs
            .iter()
            .filter(|doc| docmap.get(doc).is_none())
            .map(|doc| doc.to_string())
            .collect(),
    };

    let (vector_count, store_location) = match store {
        Some(s) => (Some(s.count().await?), Some(s.location())),
        None => (None, None),
    };

    Ok(CorpusStats {
        corpus: handle.name.clone(),
        chunk_count: chunks.len(),
        doc_count: ledger_docs.len(),
        failure_count: failures.len(),
        manifest_entries: manifest.len(),
        docmap_entries: docmap.len(),
        vector_count,
        store_location,
        effective_config: config.clone(),
        bytes: dir_size(handle),
        top_sources,
        consistency,
    })
}

fn dir_size(handle: &CorpusHandle) -> u64 {
    walkdir::WalkDir::new(&handle.dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

/// Print `stats` in the terminal layout used by `kidx stats`.
pub fn print_stats(stats: &CorpusStats) {
    println!("Corpus '{}'", stats.corpus);
    println!("================================");
    println!();
    println!("  Size:        {}", format_bytes(stats.bytes));
    println!("  Documents:   {}", stats.doc_count);
    println!("  Chunks:      {}", stats.chunk_count);
    println!("  Manifest:    {} entries", stats.manifest_entries);
    println!("  Doc map:     {} entries", stats.docmap_entries);
    println!("  Failures:    {}", stats.failure_count);
    match (stats.vector_count, &stats.store_location) {
        (Some(n), Some(loc)) => println!("  Vectors:     {} ({})", n, loc),
        _ => println!("  Vectors:     none"),
    }
    println!(
        "  Chunking:    size {} / overlap {}",
        stats.effective_config.chunking.chunk_size, stats.effective_config.chunking.overlap
    );
    println!("  Embedding:   {}", stats.effective_config.embedding.provider);

    if !stats.top_sources.is_empty() {
        println!();
        println!("  Top sources:");
        println!("  {:<64} {:>8}", "SOURCE", "CHUNKS");
        println!("  {}", "-".repeat(73));
        for s in &stats.top_sources {
            println!("  {:<64} {:>8}", s.source_path, s.chunks);
        }
    }

    println!();
    match stats.consistency.to_error() {
        None => println!("  Consistency: ok"),
        Some(e) => {
            println!("  Consistency: {}", e);
            for id in stats.consistency.missing_from_ledger.iter().take(TOP_SOURCES) {
                println!("    missing chunk  {}", id);
            }
            for doc in stats.consistency.unmapped_docs.iter().take(TOP_SOURCES) {
                println!("    unmapped doc   {}", doc);
            }
        }
    }
    println!();
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
