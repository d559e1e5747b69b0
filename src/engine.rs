//! Engine facade.
//!
//! [`Engine`] is the single entry point the binary (and the integration
//! tests) use. It owns the validated [`Config`] and the [`CorpusRegistry`],
//! resolves per-call options against the config, and wires the right
//! collaborators (embedder, similarity store, progress reporter) into the
//! ingest and retrieval pipelines.
//!
//! In-memory similarity stores are cached per corpus for the lifetime of the
//! engine so that an ingest followed by a retrieve in the same process sees
//! the same vectors.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::chunk;
use crate::config::Config;
use crate::discover;
use crate::embedding::Embedder;
use crate::error::IndexError;
use crate::ingest::{self, IngestSettings};
use crate::models::{Hit, IngestOptions, IngestSummary};
use crate::progress::{NoProgress, ProgressReporter};
use crate::registry::{CorpusHandle, CorpusRegistry};
use crate::retrieve::{self, SemanticSearch};
use crate::stats::{self, CorpusStats};
use crate::vector_store::{open_store, InMemoryVectorStore, SimilarityStore};

pub struct Engine {
    config: Config,
    registry: CorpusRegistry,
    memory_stores: Mutex<HashMap<String, Arc<dyn SimilarityStore>>>,
    progress: Box<dyn ProgressReporter>,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let registry = CorpusRegistry::new(&config.data.dir);
        Ok(Self {
            config,
            registry,
            memory_stores: Mutex::new(HashMap::new()),
            progress: Box::new(NoProgress),
        })
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &CorpusRegistry {
        &self.registry
    }

    /// Check everything `ingest` would reject as a configuration error,
    /// without touching the data directory. The CLI calls this before it
    /// creates the corpus directory and takes the ingest lock.
    pub fn validate_ingest(&self, corpus: &str, root: &Path, options: &IngestOptions) -> Result<()> {
        self.registry.handle(corpus)?;
        let settings = self.ingest_settings(options);
        chunk::validate_params(settings.chunk_size, settings.overlap)?;
        if !root.is_dir() {
            bail!(IndexError::config(format!(
                "ingest root does not exist or is not a directory: {}",
                root.display()
            )));
        }
        discover::exclude_set(&settings.exclude_globs)?;
        self.ingest_embedder(options)?;
        Ok(())
    }

    pub async fn ingest(&self, corpus: &str, root: &Path, options: &IngestOptions) -> Result<IngestSummary> {
        self.validate_ingest(corpus, root, options)?;
        let settings = self.ingest_settings(options);
        let embedder = self.ingest_embedder(options)?;
        let handle = self.registry.resolve(corpus)?;

        let needs_store = embedder.is_some() || options.reset_vector_store;
        let store = self.store_for(&handle, needs_store).await?;

        ingest::ingest_corpus(
            &handle,
            root,
            &settings,
            store.as_deref(),
            embedder.as_ref(),
            self.progress.as_ref(),
        )
        .await
    }

    /// Query a corpus. `top_k` and `max_distance` default to `[retrieval]`.
    ///
    /// Only an invalid corpus name or `top_k == 0` is an error; backend
    /// trouble degrades to lexical retrieval and an unknown corpus yields no
    /// hits.
    pub async fn retrieve(
        &self,
        corpus: &str,
        query: &str,
        top_k: Option<usize>,
        max_distance: Option<f64>,
    ) -> Result<Vec<Hit>> {
        let top_k = top_k.unwrap_or(self.config.retrieval.top_k);
        if top_k == 0 {
            bail!(IndexError::config("top_k must be >= 1"));
        }
        let max_distance = max_distance.or(self.config.retrieval.max_distance);
        let handle = self.registry.handle(corpus)?;

        let (embedder, store) = if self.config.retrieval.use_semantic {
            self.semantic_backend(&handle).await
        } else {
            (None, None)
        };

        let semantic = match (&embedder, &store) {
            (Some(embedder), Some(store)) => Some(SemanticSearch {
                embedder,
                store: store.as_ref(),
                timeout: Duration::from_millis(self.config.retrieval.timeout_ms),
            }),
            _ => None,
        };

        Ok(retrieve::retrieve(&handle, query, top_k, max_distance, semantic).await)
    }

    pub async fn stats(&self, corpus: &str) -> Result<CorpusStats> {
        let handle = self.registry.handle(corpus)?;
        if !handle.dir.is_dir() {
            bail!(IndexError::config(format!("corpus '{}' does not exist", corpus)));
        }
        let store = self.store_for(&handle, false).await?;
        stats::corpus_stats(&handle, &self.config, store.as_deref()).await
    }

    pub fn corpora(&self) -> Result<Vec<String>> {
        self.registry.list()
    }

    fn ingest_settings(&self, options: &IngestOptions) -> IngestSettings {
        IngestSettings {
            chunk_size: options.chunk_size.unwrap_or(self.config.chunking.chunk_size),
            overlap: options.overlap.unwrap_or(self.config.chunking.overlap),
            force: options.force,
            reset: options.reset,
            reset_vector_store: options.reset_vector_store,
            fingerprint: self.config.ingest.fingerprint,
            exclude_globs: self.config.ingest.exclude_globs.clone(),
            follow_symlinks: self.config.ingest.follow_symlinks,
        }
    }

    /// The ingest-path embedder, or `None` when semantic indexing is off.
    fn ingest_embedder(&self, options: &IngestOptions) -> Result<Option<Embedder>> {
        let use_semantic = options.use_semantic || self.config.ingest.use_semantic;
        if !use_semantic {
            return Ok(None);
        }
        if !self.config.embedding.is_enabled() {
            bail!(IndexError::config(
                "semantic ingest requested but [embedding] provider is 'disabled'"
            ));
        }
        Ok(Some(Embedder::from_config(
            &self.config.embedding,
            options.embed_model.as_deref(),
        )?))
    }

    /// Embedder and store for the query path. Any failure here is logged and
    /// leaves retrieval lexical-only.
    async fn semantic_backend(&self, handle: &CorpusHandle) -> (Option<Embedder>, Option<Arc<dyn SimilarityStore>>) {
        let embedder = match Embedder::from_config(&self.config.embedding, None) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "query embedder unavailable, using lexical retrieval");
                return (None, None);
            }
        };
        match self.store_for(handle, false).await {
            Ok(Some(store)) => (Some(embedder), Some(store)),
            Ok(None) => (None, None),
            Err(e) => {
                tracing::warn!(corpus = %handle.name, error = %format!("{:#}", e), "vector store unavailable, using lexical retrieval");
                (None, None)
            }
        }
    }

    /// The corpus similarity store. A persistent store is only opened when
    /// it already exists or `create` is set.
    async fn store_for(&self, handle: &CorpusHandle, create: bool) -> Result<Option<Arc<dyn SimilarityStore>>> {
        if self.config.vector_store.backend == "memory" {
            let mut stores = self.memory_stores.lock().unwrap_or_else(PoisonError::into_inner);
            let store = stores
                .entry(handle.name.clone())
                .or_insert_with(|| Arc::new(InMemoryVectorStore::new()))
                .clone();
            return Ok(Some(store));
        }
        if create || handle.vectors.exists() {
            return Ok(Some(open_store(handle, &self.config.vector_store).await?));
        }
        Ok(None)
    }
}
