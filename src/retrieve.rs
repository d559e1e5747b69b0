//! Retrieval with semantic → lexical fallback.
//!
//! Strategies are tried in order at one dispatch point ([`retrieve`]); the
//! first strategy that yields at least one hit wins:
//!
//! 1. [`RetrievalStrategy::Semantic`]: embed the query, ask the similarity
//!    store for the `top_k` nearest chunks and keep those within
//!    `max_distance`. Only attempted when a semantic backend is supplied and
//!    its store holds at least one vector.
//! 2. [`RetrievalStrategy::Lexical`]: token containment over the chunk
//!    ledger.
//!
//! Backend errors and timeouts are logged and treated as "no hits", so the
//! caller always gets a (possibly empty) list and never an error.

use anyhow::Result;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use crate::embedding::Embedder;
use crate::error::IndexError;
use crate::ledger::ChunkLedger;
use crate::models::{Hit, RetrievalStrategy};
use crate::registry::CorpusHandle;
use crate::vector_store::SimilarityStore;

/// Semantic backend for one query: query embedder, corpus store, and the
/// bound applied to each backend call.
#[derive(Clone, Copy)]
pub struct SemanticSearch<'a> {
    pub embedder: &'a Embedder,
    pub store: &'a dyn SimilarityStore,
    pub timeout: Duration,
}

pub async fn retrieve(
    handle: &CorpusHandle,
    query: &str,
    top_k: usize,
    max_distance: Option<f64>,
    semantic: Option<SemanticSearch<'_>>,
) -> Vec<Hit> {
    if query.trim().is_empty() || top_k == 0 {
        return Vec::new();
    }

    let plan: &[RetrievalStrategy] = if semantic.is_some() {
        &[RetrievalStrategy::Semantic, RetrievalStrategy::Lexical]
    } else {
        &[RetrievalStrategy::Lexical]
    };

    for strategy in plan {
        let result = match (strategy, semantic) {
            (RetrievalStrategy::Semantic, Some(backend)) => {
                semantic_hits(backend, query, top_k, max_distance).await
            }
            (RetrievalStrategy::Semantic, None) => Ok(Vec::new()),
            (RetrievalStrategy::Lexical, _) => lexical_hits(&ChunkLedger::new(&handle.index), query, top_k),
        };

        match result {
            Ok(hits) if !hits.is_empty() => {
                tracing::debug!(corpus = %handle.name, strategy = ?strategy, hits = hits.len(), "retrieved");
                return hits;
            }
            Ok(_) => {
                tracing::debug!(corpus = %handle.name, strategy = ?strategy, "no hits, falling through");
            }
            Err(e) => {
                tracing::warn!(corpus = %handle.name, strategy = ?strategy, error = %format!("{:#}", e), "retrieval backend failed, degrading");
            }
        }
    }

    Vec::new()
}

async fn bounded<T>(timeout: Duration, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(IndexError::backend(format!("{} timed out after {:?}", what, timeout)).into()),
    }
}

async fn semantic_hits(
    backend: SemanticSearch<'_>,
    query: &str,
    top_k: usize,
    max_distance: Option<f64>,
) -> Result<Vec<Hit>> {
    let populated = bounded(backend.timeout, "vector store count", backend.store.count()).await?;
    if populated == 0 {
        return Ok(Vec::new());
    }

    let vector = bounded(backend.timeout, "query embedding", backend.embedder.embed_query(query)).await?;
    let nearest = bounded(backend.timeout, "vector store query", backend.store.query(&vector, top_k)).await?;

    Ok(nearest
        .into_iter()
        .filter(|h| max_distance.map_or(true, |max| h.distance <= max))
        .map(|h| Hit {
            chunk_id: h.id,
            doc_id: h.doc_id,
            source_path: h.source_path,
            text: h.text,
            score: 1.0 - h.distance,
            distance: Some(h.distance),
            strategy: RetrievalStrategy::Semantic,
        })
        .collect())
}

/// Lowercased alphanumeric runs.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Score every ledger chunk by the fraction of distinct query tokens it
/// contains. Ties keep ledger order.
fn lexical_hits(ledger: &ChunkLedger, query: &str, top_k: usize) -> Result<Vec<Hit>> {
    let query_tokens: HashSet<String> = tokenize(query).collect();
    if query_tokens.is_empty() {
        return Ok(Vec::new());
    }

    let mut hits: Vec<Hit> = ledger
        .load()?
        .into_iter()
        .filter_map(|chunk| {
            let chunk_tokens: HashSet<String> = tokenize(&chunk.text).collect();
            let matched = query_tokens.iter().filter(|t| chunk_tokens.contains(*t)).count();
            if matched == 0 {
                return None;
            }
            Some(Hit {
                score: matched as f64 / query_tokens.len() as f64,
                chunk_id: chunk.chunk_id,
                doc_id: chunk.doc_id,
                source_path: chunk.source_path,
                text: chunk.text,
                distance: None,
                strategy: RetrievalStrategy::Lexical,
            })
        })
        .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(top_k);
    Ok(hits)
}
