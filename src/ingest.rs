//! Ingestion pipeline orchestration.
//!
//! Coordinates one batch run over a corpus root: discovery → fingerprint →
//! parse → chunk → (embed → similarity store) → ledger → doc map → manifest,
//! followed by reconciliation of documents that disappeared from the scan.
//!
//! Per-document problems never abort the run. They are written to the
//! failure log, counted in the [`IngestSummary`], and the loop moves on.
//! Only configuration errors (bad chunk parameters, missing root) stop the
//! call, and they are raised before anything on disk is touched.
//!
//! For a changed document the old chunk set is retracted as a whole and the
//! new one written in its place; the manifest is updated last, so a crash
//! mid-document leaves it to be reprocessed on the next run.
//!
//! When semantic indexing runs against a similarity store that was just reset
//! (or is empty), unchanged documents are re-embedded from their ledger rows
//! instead of being skipped outright, so the store again covers the ledger.

use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Instant;

use crate::chunk;
use crate::discover::{self, DiscoveredFile};
use crate::embedding::Embedder;
use crate::error::IndexError;
use crate::extract;
use crate::failures::FailureLog;
use crate::ledger::{self, ChunkLedger, DocChunkMap};
use crate::manifest::{self, Decision, Manifest};
use crate::models::{Chunk, FailureKind, FingerprintMode, IngestSummary, ManifestEntry, Outcome};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::registry::CorpusHandle;
use crate::vector_store::{SimilarityStore, VectorRecord};

/// Fully resolved parameters for one ingest run.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub chunk_size: usize,
    pub overlap: usize,
    pub force: bool,
    pub reset: bool,
    pub reset_vector_store: bool,
    pub fingerprint: FingerprintMode,
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
}

/// Run one ingest pass over `root` into `handle`.
///
/// `store` is the corpus similarity store when one exists; stale vectors are
/// retracted from it even when `embedder` is `None`. New vectors are written
/// only when `embedder` is set.
pub async fn ingest_corpus(
    handle: &CorpusHandle,
    root: &Path,
    settings: &IngestSettings,
    store: Option<&dyn SimilarityStore>,
    embedder: Option<&Embedder>,
    reporter: &dyn ProgressReporter,
) -> Result<IngestSummary> {
    let started = Instant::now();

    chunk::validate_params(settings.chunk_size, settings.overlap)?;
    if !root.is_dir() {
        bail!(IndexError::config(format!(
            "ingest root does not exist or is not a directory: {}",
            root.display()
        )));
    }
    if embedder.is_some() && store.is_none() {
        bail!(IndexError::config("semantic indexing requires a vector store"));
    }

    // Discovery only reads, and it rejects bad exclude globs before the resets below.
    reporter.report(ProgressEvent::Discovering {
        corpus: handle.name.clone(),
    });
    let files = discover::discover(root, &settings.exclude_globs, settings.follow_symlinks)?;

    let failures = FailureLog::new(&handle.failures);
    let ledger = ChunkLedger::new(&handle.index);

    if settings.reset {
        tracing::info!(corpus = %handle.name, "resetting ledger, manifest, doc map and failure log");
        ledger.clear()?;
        failures.clear()?;
        ledger::remove_if_exists(&handle.manifest)?;
        ledger::remove_if_exists(&handle.docmap)?;
    }
    if settings.reset_vector_store {
        if let Some(store) = store {
            tracing::info!(corpus = %handle.name, location = %store.location(), "resetting vector store");
            store.reset().await?;
        }
    }

    let known_unsupported: HashSet<String> = failures
        .load()?
        .into_iter()
        .filter(|f| f.kind == FailureKind::Unsupported)
        .map(|f| f.doc_id)
        .collect();

    let backfill = match (embedder, store) {
        (Some(embedder), Some(store)) => {
            let empty_store = settings.reset_vector_store
                || match store.count().await {
                    Ok(n) => n == 0,
                    Err(e) => {
                        tracing::warn!(corpus = %handle.name, error = %format!("{:#}", e), "could not count vectors");
                        false
                    }
                };
            if empty_store {
                let rows = group_by_doc(ledger.load()?);
                if !rows.is_empty() {
                    tracing::info!(
                        corpus = %handle.name,
                        model = embedder.model_name(),
                        documents = rows.len(),
                        "similarity store is empty, re-embedding unchanged documents"
                    );
                }
                rows
            } else {
                HashMap::new()
            }
        }
        _ => HashMap::new(),
    };

    let mut run = Run {
        settings,
        store,
        embedder,
        backfill,
        manifest: Manifest::load(&handle.manifest),
        docmap: DocChunkMap::load(&handle.docmap),
        ledger_docs: ledger.doc_ids()?,
        ledger,
        failures,
        summary: IngestSummary {
            files_discovered: files.len(),
            ..Default::default()
        },
    };

    let (supported, unsupported): (Vec<&DiscoveredFile>, Vec<&DiscoveredFile>) =
        files.iter().partition(|f| f.supported);

    for file in &unsupported {
        run.summary.unsupported += 1;
        run.summary.skipped += 1;
        if !known_unsupported.contains(&file.doc_id) {
            let ext = extract::extension_of(&file.path).unwrap_or_default();
            run.failures.record(
                &file.doc_id,
                &file.source_path,
                FailureKind::Unsupported,
                &format!("unsupported extension '{}'", ext),
            )?;
        }
    }

    let total = supported.len() as u64;
    for (i, file) in supported.iter().enumerate() {
        run.ingest_file(file).await?;
        reporter.report(ProgressEvent::Ingesting {
            corpus: handle.name.clone(),
            n: i as u64 + 1,
            total,
        });
    }

    let seen: HashSet<String> = supported.iter().map(|f| f.doc_id.clone()).collect();
    run.reconcile(&seen).await?;
    run.manifest.compact()?;

    let mut summary = run.summary;
    summary.duration_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        corpus = %handle.name,
        discovered = summary.files_discovered,
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        removed = summary.removed,
        chunks_written = summary.chunks_written,
        duration_ms = summary.duration_ms,
        "ingest finished"
    );
    Ok(summary)
}

struct Run<'a> {
    settings: &'a IngestSettings,
    store: Option<&'a dyn SimilarityStore>,
    embedder: Option<&'a Embedder>,
    /// Ledger rows of documents whose vectors must be rebuilt if they turn
    /// out unchanged.
    backfill: HashMap<String, Vec<Chunk>>,
    manifest: Manifest,
    docmap: DocChunkMap,
    ledger: ChunkLedger,
    /// Documents that own rows in the ledger right now.
    ledger_docs: HashSet<String>,
    failures: FailureLog,
    summary: IngestSummary,
}

impl Run<'_> {
    async fn ingest_file(&mut self, file: &DiscoveredFile) -> Result<()> {
        let fingerprint = match manifest::fingerprint(&file.path, self.settings.fingerprint) {
            Ok(fp) => fp,
            Err(e) => return self.fail(file, FailureKind::Stat, &e.to_string()),
        };

        if self
            .manifest
            .should_process(&file.doc_id, &fingerprint, self.settings.force)
            == Decision::Skip
        {
            if let Some(chunks) = self.backfill.remove(&file.doc_id) {
                return self.restore_vectors(file, &chunks).await;
            }
            tracing::debug!(doc_id = %file.doc_id, "unchanged, skipping");
            self.summary.skipped += 1;
            return Ok(());
        }

        let path = file.path.clone();
        let parsed = tokio::task::spawn_blocking(move || extract::parse_document(&path)).await;
        let text = match parsed {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return self.parse_failed(file, fingerprint, IndexError::from(e)).await,
            Err(join_err) => {
                let err = IndexError::Parse(format!("parser panicked: {}", join_err));
                return self.parse_failed(file, fingerprint, err).await;
            }
        };

        let chunks = chunk::chunk_text(
            &file.doc_id,
            &file.source_path,
            &text,
            self.settings.chunk_size,
            self.settings.overlap,
        )?;

        if chunks.is_empty() {
            let doc: HashSet<String> = std::iter::once(file.doc_id.clone()).collect();
            let retracted = match self.retract(&doc).await {
                Ok(n) => n,
                Err(e) => return self.fail(file, FailureKind::Store, &format!("{:#}", e)),
            };
            tracing::info!(doc_id = %file.doc_id, retracted, "no extractable text");
            self.summary.processed += 1;
            self.summary.empty += 1;
            self.summary.chunks_retracted += retracted;
            return self.record_manifest(file, fingerprint, Outcome::Empty, 0);
        }

        let vectors = match self.embedder {
            Some(embedder) => {
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                match embedder.embed_documents(&texts).await {
                    Ok(v) => Some(v),
                    Err(e) => return self.fail(file, FailureKind::Embedding, &format!("{:#}", e)),
                }
            }
            None => None,
        };

        if let Err(e) = self.write_vectors(&file.doc_id, &chunks, vectors).await {
            return self.fail(file, FailureKind::Store, &format!("{:#}", e));
        }

        let retracted = match self.write_ledger(&file.doc_id, &chunks) {
            Ok(n) => n,
            Err(e) => return self.fail(file, FailureKind::Io, &format!("{:#}", e)),
        };

        self.docmap
            .set(&file.doc_id, chunks.iter().map(|c| c.chunk_id.clone()).collect());
        if let Err(e) = self.docmap.save() {
            return self.fail(file, FailureKind::Io, &format!("{:#}", e));
        }

        tracing::info!(doc_id = %file.doc_id, chunks = chunks.len(), retracted, "ingested");
        self.summary.processed += 1;
        self.summary.chunks_written += chunks.len();
        self.summary.chunks_retracted += retracted;
        self.record_manifest(file, fingerprint, Outcome::Ingested, chunks.len())
    }

    /// Embed an unchanged document's ledger rows into the store. The ledger
    /// and map are left alone. On failure the manifest entry is dropped so
    /// the document is fully reprocessed next run.
    async fn restore_vectors(&mut self, file: &DiscoveredFile, chunks: &[Chunk]) -> Result<()> {
        let embedder = match self.embedder {
            Some(embedder) => embedder,
            None => return Ok(()),
        };
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = match embedder.embed_documents(&texts).await {
            Ok(v) => v,
            Err(e) => {
                self.manifest.forget(&file.doc_id);
                return self.fail(file, FailureKind::Embedding, &format!("{:#}", e));
            }
        };
        if let Err(e) = self.write_vectors(&file.doc_id, chunks, Some(vectors)).await {
            self.manifest.forget(&file.doc_id);
            return self.fail(file, FailureKind::Store, &format!("{:#}", e));
        }
        tracing::info!(doc_id = %file.doc_id, chunks = chunks.len(), "re-embedded unchanged document");
        self.summary.skipped += 1;
        Ok(())
    }

    /// Delete the document's previous vectors, then upsert the new ones.
    async fn write_vectors(
        &self,
        doc_id: &str,
        chunks: &[Chunk],
        vectors: Option<Vec<Vec<f32>>>,
    ) -> Result<()> {
        let store = match self.store {
            Some(store) => store,
            None => return Ok(()),
        };

        let stale = self.stale_ids(&std::iter::once(doc_id.to_string()).collect())?;
        if !stale.is_empty() {
            store.delete(&stale).await?;
        }

        if let Some(vectors) = vectors {
            let records: Vec<VectorRecord> = chunks
                .iter()
                .zip(vectors)
                .map(|(c, embedding)| VectorRecord {
                    id: c.chunk_id.clone(),
                    doc_id: c.doc_id.clone(),
                    source_path: c.source_path.clone(),
                    text: c.text.clone(),
                    embedding,
                })
                .collect();
            store.upsert(&records).await?;
        }
        Ok(())
    }

    /// Replace the document's ledger rows. Returns how many rows were dropped.
    fn write_ledger(&mut self, doc_id: &str, chunks: &[Chunk]) -> Result<usize> {
        let removed = if self.ledger_docs.contains(doc_id) {
            let doc: HashSet<String> = std::iter::once(doc_id.to_string()).collect();
            self.ledger.replace(&doc, chunks)?.len()
        } else {
            self.ledger.append(chunks)?;
            0
        };
        self.ledger_docs.insert(doc_id.to_string());
        Ok(removed)
    }

    /// Chunk ids currently owned by `docs`, from the map and, for documents
    /// the map does not know, from the ledger.
    fn stale_ids(&self, docs: &HashSet<String>) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut unmapped = HashSet::new();
        for doc in docs {
            match self.docmap.get(doc) {
                Some(chunk_ids) => ids.extend(chunk_ids.iter().cloned()),
                None if self.ledger_docs.contains(doc) => {
                    unmapped.insert(doc.clone());
                }
                None => {}
            }
        }
        if !unmapped.is_empty() {
            ids.extend(
                self.ledger
                    .load()?
                    .into_iter()
                    .filter(|c| unmapped.contains(&c.doc_id))
                    .map(|c| c.chunk_id),
            );
        }
        Ok(ids)
    }

    /// Remove every trace of `docs` from store, ledger and map.
    /// Returns the number of ledger rows dropped.
    async fn retract(&mut self, docs: &HashSet<String>) -> Result<usize> {
        if let Some(store) = self.store {
            let stale = self.stale_ids(docs)?;
            if !stale.is_empty() {
                store.delete(&stale).await?;
            }
        }

        let mut removed = 0;
        if docs.iter().any(|d| self.ledger_docs.contains(d)) {
            removed = self.ledger.replace(docs, &[])?.len();
            self.ledger_docs.retain(|d| !docs.contains(d));
        }

        let mut map_changed = false;
        for doc in docs {
            map_changed |= self.docmap.remove(doc).is_some();
        }
        if map_changed {
            self.docmap.save()?;
        }
        Ok(removed)
    }

    /// Retract documents that are no longer under the root and drop their
    /// manifest entries.
    async fn reconcile(&mut self, seen: &HashSet<String>) -> Result<()> {
        let gone: HashSet<String> = self
            .docmap
            .doc_ids()
            .chain(self.ledger_docs.iter())
            .filter(|d| !seen.contains(*d))
            .cloned()
            .collect();

        if !gone.is_empty() {
            match self.retract(&gone).await {
                Ok(retracted) => {
                    tracing::info!(documents = gone.len(), retracted, "removed deleted documents");
                    self.summary.removed += gone.len();
                    self.summary.chunks_retracted += retracted;
                }
                Err(e) => {
                    // Entries stay in map and ledger so the next run retries.
                    tracing::warn!(error = %format!("{:#}", e), "reconciliation failed");
                    return Ok(());
                }
            }
        }

        let stale_manifest: Vec<String> = self
            .manifest
            .doc_ids()
            .filter(|d| !seen.contains(*d))
            .cloned()
            .collect();
        for doc in stale_manifest {
            self.manifest.forget(&doc);
        }
        Ok(())
    }

    /// The previous version's chunks no longer describe the file, so they are
    /// retracted before the failure is recorded.
    async fn parse_failed(&mut self, file: &DiscoveredFile, fingerprint: String, error: IndexError) -> Result<()> {
        let doc: HashSet<String> = std::iter::once(file.doc_id.clone()).collect();
        let retracted = match self.retract(&doc).await {
            Ok(n) => n,
            Err(e) => return self.fail(file, FailureKind::Store, &format!("{:#}", e)),
        };
        tracing::warn!(doc_id = %file.doc_id, retracted, error = %error, "parse failed");
        self.summary.chunks_retracted += retracted;
        self.fail(file, FailureKind::Parse, &error.to_string())?;
        self.record_manifest(file, fingerprint, Outcome::ParseFailed, 0)
    }

    fn fail(&mut self, file: &DiscoveredFile, kind: FailureKind, error: &str) -> Result<()> {
        self.summary.failed += 1;
        self.failures.record(&file.doc_id, &file.source_path, kind, error)
    }

    fn record_manifest(
        &mut self,
        file: &DiscoveredFile,
        fingerprint: String,
        outcome: Outcome,
        chunks: usize,
    ) -> Result<()> {
        self.manifest.record(ManifestEntry {
            doc_id: file.doc_id.clone(),
            fingerprint,
            last_ingested_at: chrono::Utc::now().to_rfc3339(),
            outcome,
            chunks,
        })
    }
}

fn group_by_doc(chunks: Vec<Chunk>) -> HashMap<String, Vec<Chunk>> {
    let mut by_doc: HashMap<String, Vec<Chunk>> = HashMap::new();
    for chunk in chunks {
        by_doc.entry(chunk.doc_id.clone()).or_default().push(chunk);
    }
    by_doc
}
