//! End-to-end tests for ingest, reconciliation and retrieval through the
//! library API.

use anyhow::Result;
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use knowledge_index::embedding::{Embedder, EmbeddingProvider, HashEmbedder};
use knowledge_index::error::IndexError;
use knowledge_index::failures::FailureLog;
use knowledge_index::ingest::{ingest_corpus, IngestSettings};
use knowledge_index::ledger::{ChunkLedger, DocChunkMap};
use knowledge_index::manifest::Manifest;
use knowledge_index::models::{Chunk, FailureKind, FingerprintMode, IngestOptions, Outcome, RetrievalStrategy};
use knowledge_index::progress::NoProgress;
use knowledge_index::registry::{CorpusHandle, CorpusRegistry};
use knowledge_index::retrieve::{retrieve, SemanticSearch};
use knowledge_index::vector_store::{InMemoryVectorStore, SimilarityStore, VectorHit, VectorRecord};
use knowledge_index::Engine;

const SEMANTIC: &str = r#"
[embedding]
provider = "hash"
dims = 512

[vector_store]
backend = "memory"

[retrieval]
use_semantic = true

[ingest]
use_semantic = true
"#;

fn setup_docs(tmp: &TempDir) -> PathBuf {
    let root = tmp.path().join("docs");
    fs::create_dir_all(&root).unwrap();
    fs::write(
        root.join("alpha.md"),
        "# Alpha\n\nThe alpha document covers Rust programming, cargo and crates.",
    )
    .unwrap();
    fs::write(
        root.join("beta.md"),
        "# Beta\n\nThis document discusses Python and machine learning frameworks.",
    )
    .unwrap();
    fs::write(
        root.join("gamma.txt"),
        "Gamma notes about deployment, Kubernetes and Docker infrastructure.",
    )
    .unwrap();
    root
}

fn engine(tmp: &TempDir, extra: &str) -> Engine {
    let data = tmp.path().join("data");
    let toml_str = format!("[data]\ndir = {:?}\n{}", data.display().to_string(), extra);
    Engine::new(toml::from_str(&toml_str).unwrap()).unwrap()
}

fn handle(tmp: &TempDir, corpus: &str) -> CorpusHandle {
    CorpusRegistry::new(&tmp.path().join("data")).handle(corpus).unwrap()
}

fn doc_id(path: &Path) -> String {
    fs::canonicalize(path).unwrap().to_string_lossy().to_string()
}

fn settings() -> IngestSettings {
    IngestSettings {
        chunk_size: 400,
        overlap: 40,
        force: false,
        reset: false,
        reset_vector_store: false,
        fingerprint: FingerprintMode::Stat,
        exclude_globs: Vec::new(),
        follow_symlinks: false,
    }
}

fn ledger_rows(h: &CorpusHandle) -> Vec<Chunk> {
    ChunkLedger::new(&h.index).load().unwrap()
}

/// Serialized ledger rows of every document except `changed`, in ledger order.
fn untouched_rows(h: &CorpusHandle, changed: &str) -> Vec<String> {
    ledger_rows(h)
        .iter()
        .filter(|c| c.doc_id != changed)
        .map(|c| serde_json::to_string(c).unwrap())
        .collect()
}

fn docx_with(text: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        write!(
            zip,
            "<w:document xmlns:w=\"w\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            text
        )
        .unwrap();
        zip.finish().unwrap();
    }
    buf
}

// ============ Incremental ingest ============

#[tokio::test]
async fn reingest_without_changes_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let root = setup_docs(&tmp);
    let engine = engine(&tmp, "");

    let first = engine.ingest("docs", &root, &IngestOptions::default()).await.unwrap();
    assert_eq!(first.files_discovered, 3);
    assert_eq!(first.processed, 3);
    assert_eq!(first.failed, 0);
    assert!(first.chunks_written >= 3);

    let h = handle(&tmp, "docs");
    let ledger_before = fs::read(&h.index).unwrap();
    let map_before = fs::read(&h.docmap).unwrap();

    let second = engine.ingest("docs", &root, &IngestOptions::default()).await.unwrap();
    assert_eq!(second.processed, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(second.chunks_written, 0);
    assert_eq!(second.removed, 0);

    assert_eq!(fs::read(&h.index).unwrap(), ledger_before);
    assert_eq!(fs::read(&h.docmap).unwrap(), map_before);
    assert_eq!(Manifest::load(&h.manifest).len(), 3);
}

#[tokio::test]
async fn changed_document_replaces_its_chunks() {
    let tmp = TempDir::new().unwrap();
    let root = setup_docs(&tmp);
    let engine = engine(&tmp, SEMANTIC);

    engine.ingest("docs", &root, &IngestOptions::default()).await.unwrap();
    let h = handle(&tmp, "docs");
    let beta = doc_id(&root.join("beta.md"));
    let old_ids = DocChunkMap::load(&h.docmap).get(&beta).unwrap().clone();
    let untouched_before = untouched_rows(&h, &beta);

    fs::write(
        root.join("beta.md"),
        "# Beta\n\nRewritten: the beta document now describes gardening, compost and tomatoes in detail.",
    )
    .unwrap();

    let summary = engine.ingest("docs", &root, &IngestOptions::default()).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.chunks_retracted, old_ids.len());

    let rows = ledger_rows(&h);
    let beta_rows: Vec<_> = rows.iter().filter(|c| c.doc_id == beta).collect();
    assert!(!beta_rows.is_empty());
    assert!(beta_rows.iter().all(|c| c.text.contains("gardening")));
    assert!(!rows.iter().any(|c| c.text.contains("Python")));
    assert_eq!(untouched_rows(&h, &beta), untouched_before);

    let map = DocChunkMap::load(&h.docmap);
    let new_ids = map.get(&beta).unwrap();
    assert_eq!(new_ids.len(), beta_rows.len());
    for id in new_ids {
        assert!(rows.iter().any(|c| &c.chunk_id == id));
    }

    let stats = engine.stats("docs").await.unwrap();
    assert!(stats.consistency.is_consistent());
    assert_eq!(stats.vector_count, Some(stats.chunk_count));
}

#[tokio::test]
async fn deleted_document_is_reconciled_everywhere() {
    let tmp = TempDir::new().unwrap();
    let root = setup_docs(&tmp);
    let engine = engine(&tmp, SEMANTIC);

    engine.ingest("docs", &root, &IngestOptions::default()).await.unwrap();
    let h = handle(&tmp, "docs");
    let gamma = doc_id(&root.join("gamma.txt"));
    fs::remove_file(root.join("gamma.txt")).unwrap();

    let summary = engine.ingest("docs", &root, &IngestOptions::default()).await.unwrap();
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.files_discovered, 2);
    assert!(summary.chunks_retracted >= 1);

    assert!(!ledger_rows(&h).iter().any(|c| c.doc_id == gamma));
    assert!(DocChunkMap::load(&h.docmap).get(&gamma).is_none());
    assert!(Manifest::load(&h.manifest).get(&gamma).is_none());

    let stats = engine.stats("docs").await.unwrap();
    assert_eq!(stats.vector_count, Some(stats.chunk_count));
    let hits = engine.retrieve("docs", "Kubernetes Docker", None, None).await.unwrap();
    assert!(hits.iter().all(|hit| hit.doc_id != gamma));
}

#[tokio::test]
async fn deletion_retracts_persistent_vectors_without_semantic_flag() {
    let tmp = TempDir::new().unwrap();
    let root = setup_docs(&tmp);
    let semantic = engine(&tmp, "[embedding]\nprovider = \"hash\"\n");

    let options = IngestOptions {
        use_semantic: true,
        ..Default::default()
    };
    let first = semantic.ingest("docs", &root, &options).await.unwrap();
    let h = handle(&tmp, "docs");
    assert!(h.vectors.exists());

    fs::remove_file(root.join("alpha.md")).unwrap();
    let lexical_only = engine(&tmp, "");
    lexical_only.ingest("docs", &root, &IngestOptions::default()).await.unwrap();

    let stats = lexical_only.stats("docs").await.unwrap();
    assert!(stats.chunk_count < first.chunks_written);
    assert_eq!(stats.vector_count, Some(stats.chunk_count));
}

// ============ Failures ============

#[tokio::test]
async fn corrupt_file_does_not_block_valid_file() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("docs");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("broken.pdf"), b"%PDF-1.4\nthis is not a real pdf body").unwrap();
    fs::write(root.join("notes.txt"), "Valid notes about the quarterly budget.").unwrap();
    let engine = engine(&tmp, "");

    let summary = engine.ingest("mixed", &root, &IngestOptions::default()).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 1);

    let h = handle(&tmp, "mixed");
    let notes = doc_id(&root.join("notes.txt"));
    let broken = doc_id(&root.join("broken.pdf"));
    let rows = ledger_rows(&h);
    assert!(rows.iter().any(|c| c.doc_id == notes));
    assert!(!rows.iter().any(|c| c.doc_id == broken));

    let failures = FailureLog::new(&h.failures).load().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::Parse);
    assert_eq!(failures[0].doc_id, broken);
    assert_eq!(
        Manifest::load(&h.manifest).get(&broken).unwrap().outcome,
        Outcome::ParseFailed
    );

    // Unchanged broken file is not retried.
    let again = engine.ingest("mixed", &root, &IngestOptions::default()).await.unwrap();
    assert_eq!(again.failed, 0);
    assert_eq!(again.skipped, 2);
}

#[tokio::test]
async fn document_that_stops_parsing_loses_its_old_chunks() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("docs");
    fs::create_dir_all(&root).unwrap();
    let memo = root.join("memo.docx");
    fs::write(&memo, docx_with("Project Falcon launches in March.")).unwrap();
    let engine = engine(&tmp, SEMANTIC);

    let first = engine.ingest("memos", &root, &IngestOptions::default()).await.unwrap();
    assert_eq!(first.processed, 1);
    let h = handle(&tmp, "memos");
    assert_eq!(engine.retrieve("memos", "Falcon", None, None).await.unwrap().len(), 1);

    fs::write(&memo, b"no longer a zip archive").unwrap();
    let broken = engine.ingest("memos", &root, &IngestOptions::default()).await.unwrap();
    assert_eq!(broken.failed, 1);
    assert_eq!(broken.chunks_retracted, first.chunks_written);

    let id = doc_id(&memo);
    assert!(!ledger_rows(&h).iter().any(|c| c.doc_id == id));
    assert!(DocChunkMap::load(&h.docmap).get(&id).is_none());
    let stats = engine.stats("memos").await.unwrap();
    assert_eq!(stats.vector_count, Some(0));
    assert!(stats.consistency.is_consistent());

    let failures = FailureLog::new(&h.failures).load().unwrap();
    assert_eq!(failures.last().unwrap().kind, FailureKind::Parse);
    assert!(failures.last().unwrap().error.starts_with("parse error"));

    let again = engine.ingest("memos", &root, &IngestOptions::default()).await.unwrap();
    assert_eq!(again.failed, 0);
    assert_eq!(again.skipped, 1);
    assert!(engine.retrieve("memos", "Falcon", None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn root_without_supported_files_discovers_but_processes_nothing() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("media");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("photo.png"), [0u8, 1, 2]).unwrap();
    fs::write(root.join("clip.mp4"), [0u8; 8]).unwrap();
    fs::write(root.join("archive.tar"), [0u8; 8]).unwrap();
    let engine = engine(&tmp, "");

    let summary = engine.ingest("media", &root, &IngestOptions::default()).await.unwrap();
    assert_eq!(summary.files_discovered, 3);
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.chunks_written, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.unsupported, 3);
    assert_eq!(summary.skipped, 3);
}

struct AlwaysDown;

#[async_trait]
impl EmbeddingProvider for AlwaysDown {
    fn model_name(&self) -> &str {
        "down"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(IndexError::backend("503 service unavailable").into())
    }
}

#[tokio::test]
async fn exhausted_embedding_retries_are_recorded_and_retried_next_run() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("docs");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("a.txt"), "some text to embed").unwrap();
    let h = CorpusRegistry::new(&tmp.path().join("data")).resolve("c").unwrap();

    let store = InMemoryVectorStore::new();
    let embedder = Embedder {
        provider: Arc::new(AlwaysDown),
        batch_size: 8,
        max_retries: 2,
        retry_backoff: Duration::from_millis(1),
    };

    for _ in 0..2 {
        let summary = ingest_corpus(&h, &root, &settings(), Some(&store), Some(&embedder), &NoProgress)
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.processed, 0);
    }

    let failures = FailureLog::new(&h.failures).load().unwrap();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|f| f.kind == FailureKind::Embedding));
    assert!(ledger_rows(&h).is_empty());
    assert!(Manifest::load(&h.manifest).is_empty());
    assert_eq!(store.count().await.unwrap(), 0);
}

// ============ Resets ============

#[tokio::test]
async fn reset_flags_are_independent() {
    let tmp = TempDir::new().unwrap();
    let root = setup_docs(&tmp);
    let engine = engine(&tmp, SEMANTIC);

    let first = engine.ingest("docs", &root, &IngestOptions::default()).await.unwrap();
    let vectors = engine.stats("docs").await.unwrap().vector_count;
    assert_eq!(vectors, Some(first.chunks_written));

    // Vector store reset alone keeps ledger and manifest: nothing is reparsed,
    // but unchanged documents are re-embedded from their ledger rows.
    let ledger_before = fs::read(&handle(&tmp, "docs").index).unwrap();
    let only_store = IngestOptions {
        reset_vector_store: true,
        ..Default::default()
    };
    let s = engine.ingest("docs", &root, &only_store).await.unwrap();
    assert_eq!(s.processed, 0);
    assert_eq!(s.skipped, 3);
    assert_eq!(s.failed, 0);
    let stats = engine.stats("docs").await.unwrap();
    assert_eq!(stats.chunk_count, first.chunks_written);
    assert_eq!(stats.vector_count, Some(stats.chunk_count));
    assert_eq!(fs::read(&handle(&tmp, "docs").index).unwrap(), ledger_before);

    // A document added afterwards does not hide the rebuilt ones.
    fs::write(root.join("delta.txt"), "Delta covers gardening, compost and tomatoes.").unwrap();
    engine.ingest("docs", &root, &IngestOptions::default()).await.unwrap();
    let hits = engine
        .retrieve("docs", "Kubernetes Docker deployment", Some(1), None)
        .await
        .unwrap();
    assert_eq!(hits[0].strategy, RetrievalStrategy::Semantic);
    assert!(hits[0].text.contains("Kubernetes"));

    // Ledger reset alone reprocesses every document.
    let only_ledger = IngestOptions {
        reset: true,
        ..Default::default()
    };
    let s = engine.ingest("docs", &root, &only_ledger).await.unwrap();
    assert_eq!(s.processed, 4);
    assert_eq!(s.chunks_retracted, 0);
    let stats = engine.stats("docs").await.unwrap();
    assert_eq!(stats.chunk_count, s.chunks_written);
    assert!(stats.consistency.is_consistent());
}

#[tokio::test]
async fn enabling_semantic_later_embeds_existing_documents() {
    let tmp = TempDir::new().unwrap();
    let root = setup_docs(&tmp);
    let config = "[embedding]\nprovider = \"hash\"\ndims = 512\n";

    let lexical = engine(&tmp, config);
    let first = lexical.ingest("docs", &root, &IngestOptions::default()).await.unwrap();
    assert_eq!(first.processed, 3);

    let semantic = engine(&tmp, config);
    let options = IngestOptions {
        use_semantic: true,
        ..Default::default()
    };
    let s = semantic.ingest("docs", &root, &options).await.unwrap();
    assert_eq!(s.processed, 0);
    assert_eq!(s.skipped, 3);
    let stats = semantic.stats("docs").await.unwrap();
    assert_eq!(stats.vector_count, Some(first.chunks_written));
}

#[tokio::test]
async fn forced_reingest_repairs_consistency_drift() {
    let tmp = TempDir::new().unwrap();
    let root = setup_docs(&tmp);
    let engine = engine(&tmp, "");
    engine.ingest("docs", &root, &IngestOptions::default()).await.unwrap();

    let h = handle(&tmp, "docs");
    fs::write(&h.index, "").unwrap();

    let drifted = engine.stats("docs").await.unwrap();
    assert!(!drifted.consistency.is_consistent());
    assert!(!drifted.consistency.missing_from_ledger.is_empty());
    assert!(drifted.consistency.to_error().is_some());

    let force = IngestOptions {
        force: true,
        ..Default::default()
    };
    let s = engine.ingest("docs", &root, &force).await.unwrap();
    assert_eq!(s.processed, 3);

    let repaired = engine.stats("docs").await.unwrap();
    assert!(repaired.consistency.is_consistent());
    assert_eq!(repaired.doc_count, 3);
}

// ============ Retrieval ============

fn ledger_with(h: &CorpusHandle, rows: &[(&str, &str, &str)]) {
    let chunks: Vec<Chunk> = rows
        .iter()
        .enumerate()
        .map(|(i, (chunk_id, doc_id, text))| Chunk {
            chunk_id: chunk_id.to_string(),
            doc_id: doc_id.to_string(),
            source_path: format!("/docs/{}.txt", doc_id),
            text: text.to_string(),
            ordinal: i,
            offset: 0,
            hash: String::new(),
        })
        .collect();
    ChunkLedger::new(&h.index).append(&chunks).unwrap();
}

#[tokio::test]
async fn lexical_scenario_returns_only_the_matching_chunk() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(&tmp, "");
    let h = engine.registry().resolve("people").unwrap();
    ledger_with(
        &h,
        &[
            ("doc1::0", "doc1", "Manuel was Head of Architecture at Bridgewater 2012-2017"),
            ("doc2::0", "doc2", "Unrelated gardening content"),
        ],
    );

    let hits = engine.retrieve("people", "Bridgewater", Some(3), None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "doc1::0");
    assert_eq!(hits[0].strategy, RetrievalStrategy::Lexical);
}

/// Store that always answers with a fixed hit list, optionally slowly.
struct FixedStore {
    hits: Vec<VectorHit>,
    delay: Option<Duration>,
}

#[async_trait]
impl SimilarityStore for FixedStore {
    async fn upsert(&self, _records: &[VectorRecord]) -> Result<()> {
        Ok(())
    }
    async fn query(&self, _vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        Ok(self.hits.iter().take(top_k).cloned().collect())
    }
    async fn delete(&self, _ids: &[String]) -> Result<()> {
        Ok(())
    }
    async fn reset(&self) -> Result<()> {
        Ok(())
    }
    async fn count(&self) -> Result<usize> {
        Ok(1)
    }
    fn location(&self) -> String {
        "fixed".to_string()
    }
}

fn far_hit(distance: f64) -> VectorHit {
    VectorHit {
        id: "doc2::0".to_string(),
        distance,
        doc_id: "doc2".to_string(),
        source_path: "/docs/doc2.txt".to_string(),
        text: "Unrelated gardening content".to_string(),
    }
}

fn hash_embedder() -> Embedder {
    Embedder {
        provider: Arc::new(HashEmbedder::new(64)),
        batch_size: 8,
        max_retries: 0,
        retry_backoff: Duration::from_millis(1),
    }
}

fn scenario_corpus(tmp: &TempDir) -> CorpusHandle {
    let h = CorpusRegistry::new(tmp.path()).resolve("fallback").unwrap();
    ledger_with(
        &h,
        &[
            ("doc1::0", "doc1", "Manuel was Head of Architecture at Bridgewater 2012-2017"),
            ("doc2::0", "doc2", "Unrelated gardening content"),
        ],
    );
    h
}

#[tokio::test]
async fn empty_semantic_result_falls_back_to_lexical() {
    let tmp = TempDir::new().unwrap();
    let h = scenario_corpus(&tmp);
    let embedder = hash_embedder();
    let store = FixedStore {
        hits: Vec::new(),
        delay: None,
    };
    let semantic = SemanticSearch {
        embedder: &embedder,
        store: &store,
        timeout: Duration::from_secs(5),
    };

    let hits = retrieve(&h, "Bridgewater", 3, None, Some(semantic)).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "doc1::0");
    assert_eq!(hits[0].strategy, RetrievalStrategy::Lexical);
}

#[tokio::test]
async fn semantic_hits_beyond_max_distance_fall_back() {
    let tmp = TempDir::new().unwrap();
    let h = scenario_corpus(&tmp);
    let embedder = hash_embedder();
    let store = FixedStore {
        hits: vec![far_hit(0.9)],
        delay: None,
    };
    let semantic = SemanticSearch {
        embedder: &embedder,
        store: &store,
        timeout: Duration::from_secs(5),
    };

    let hits = retrieve(&h, "Bridgewater", 3, Some(0.3), Some(semantic)).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "doc1::0");
    assert_eq!(hits[0].strategy, RetrievalStrategy::Lexical);

    // Within the threshold the semantic hit is returned as-is.
    let hits = retrieve(&h, "Bridgewater", 3, Some(0.95), Some(semantic)).await;
    assert_eq!(hits[0].chunk_id, "doc2::0");
    assert_eq!(hits[0].strategy, RetrievalStrategy::Semantic);
    assert!((hits[0].score - 0.1).abs() < 1e-9);
    assert_eq!(hits[0].distance, Some(0.9));
}

#[tokio::test]
async fn slow_semantic_backend_times_out_to_lexical() {
    let tmp = TempDir::new().unwrap();
    let h = scenario_corpus(&tmp);
    let embedder = hash_embedder();
    let store = FixedStore {
        hits: vec![far_hit(0.1)],
        delay: Some(Duration::from_secs(30)),
    };
    let semantic = SemanticSearch {
        embedder: &embedder,
        store: &store,
        timeout: Duration::from_millis(50),
    };

    let hits = retrieve(&h, "Bridgewater", 3, None, Some(semantic)).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].strategy, RetrievalStrategy::Lexical);
}

#[tokio::test]
async fn failing_query_embedding_falls_back_to_lexical() {
    let tmp = TempDir::new().unwrap();
    let h = scenario_corpus(&tmp);
    let embedder = Embedder {
        provider: Arc::new(AlwaysDown),
        batch_size: 8,
        max_retries: 0,
        retry_backoff: Duration::from_millis(1),
    };
    let store = FixedStore {
        hits: vec![far_hit(0.1)],
        delay: None,
    };
    let semantic = SemanticSearch {
        embedder: &embedder,
        store: &store,
        timeout: Duration::from_secs(5),
    };

    let hits = retrieve(&h, "bridgewater", 3, None, Some(semantic)).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "doc1::0");
}

#[tokio::test]
async fn semantic_retrieval_after_semantic_ingest() {
    let tmp = TempDir::new().unwrap();
    let root = setup_docs(&tmp);
    let engine = engine(&tmp, SEMANTIC);
    engine.ingest("docs", &root, &IngestOptions::default()).await.unwrap();

    let hits = engine
        .retrieve("docs", "Kubernetes Docker deployment infrastructure", Some(2), None)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].strategy, RetrievalStrategy::Semantic);
    assert!(hits[0].text.contains("Kubernetes"));
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[tokio::test]
async fn sqlite_vectors_survive_a_new_engine() {
    let tmp = TempDir::new().unwrap();
    let root = setup_docs(&tmp);
    let config = "[embedding]\nprovider = \"hash\"\ndims = 512\n\n[retrieval]\nuse_semantic = true\n";
    let options = IngestOptions {
        use_semantic: true,
        ..Default::default()
    };
    engine(&tmp, config).ingest("docs", &root, &options).await.unwrap();

    let fresh = engine(&tmp, config);
    let hits = fresh.retrieve("docs", "Rust cargo crates", Some(1), None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].strategy, RetrievalStrategy::Semantic);
    assert!(hits[0].text.contains("cargo"));
}

// ============ Corpora ============

#[tokio::test]
async fn corpora_are_isolated() {
    let tmp = TempDir::new().unwrap();
    let left = tmp.path().join("left");
    let right = tmp.path().join("right");
    fs::create_dir_all(&left).unwrap();
    fs::create_dir_all(&right).unwrap();
    fs::write(left.join("l.txt"), "apples and pears").unwrap();
    fs::write(right.join("r.txt"), "bolts and nuts").unwrap();
    let engine = engine(&tmp, "");

    engine.ingest("left", &left, &IngestOptions::default()).await.unwrap();
    engine.ingest("right", &right, &IngestOptions::default()).await.unwrap();

    assert_eq!(engine.corpora().unwrap(), vec!["left", "right"]);
    assert_eq!(engine.retrieve("left", "apples", None, None).await.unwrap().len(), 1);
    assert!(engine.retrieve("left", "bolts", None, None).await.unwrap().is_empty());
    assert!(engine.retrieve("right", "apples", None, None).await.unwrap().is_empty());

    let err = engine
        .ingest("../escape", &left, &IngestOptions::default())
        .await
        .unwrap_err();
    assert!(IndexError::is_configuration(&err));
}

#[tokio::test]
async fn exclude_globs_and_defaults_are_honoured() {
    let tmp = TempDir::new().unwrap();
    let root = setup_docs(&tmp);
    fs::create_dir_all(root.join("drafts")).unwrap();
    fs::write(root.join("drafts/wip.md"), "unfinished draft").unwrap();
    fs::create_dir_all(root.join(".git")).unwrap();
    fs::write(root.join(".git/HEAD.txt"), "ref: main").unwrap();
    fs::write(root.join("~$locked.txt"), "office lock").unwrap();

    let engine = engine(&tmp, "[ingest]\nexclude_globs = [\"**/drafts/**\"]\n");
    let summary = engine.ingest("docs", &root, &IngestOptions::default()).await.unwrap();
    assert_eq!(summary.files_discovered, 3);
    assert!(engine.retrieve("docs", "draft", None, None).await.unwrap().is_empty());
}
