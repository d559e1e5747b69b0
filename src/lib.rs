//! # Knowledge Index
//!
//! A local-first ingestion and retrieval engine for private knowledge bases.
//!
//! Documents under a root directory are parsed, chunked and recorded in a
//! per-corpus chunk ledger; optionally they are also embedded into a
//! similarity store. Reruns are incremental: a manifest of fingerprints skips
//! unchanged files, changed files have their old chunks retracted, and files
//! that disappeared are reconciled away. Retrieval tries semantic search
//! first and falls back to lexical token matching over the ledger.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────────────┐
//! │ discover   │──▶│ extract      │──▶│ ledger + doc map     │
//! │ walk/globs │   │ chunk, embed │   │ manifest, failures   │
//! └────────────┘   └──────┬───────┘   └──────────┬───────────┘
//!                         ▼                      │
//!                  ┌──────────────┐              │
//!                  │ vector store │              │
//!                  └──────┬───────┘              │
//!                         └──────┐   ┌───────────┘
//!                                ▼   ▼
//!                             ┌──────────┐
//!                             │ retrieve │  semantic → lexical
//!                             └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kidx ingest handbook ./docs
//! kidx retrieve handbook "parental leave policy"
//! kidx stats handbook
//! kidx corpora
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`engine`] | Facade used by the CLI |
//! | [`registry`] | Corpus names and on-disk layout |
//! | [`discover`] | Directory walk with exclude globs |
//! | [`extract`] | Document parsers (text, PDF, DOCX, PPTX, XLSX) |
//! | [`chunk`] | Overlapping char-window chunker |
//! | [`manifest`] | Fingerprint-based change detection |
//! | [`ledger`] | Chunk ledger and doc→chunk map |
//! | [`ingest`] | Ingest pipeline and reconciliation |
//! | [`embedding`] | Embedding providers with retry |
//! | [`vector_store`] | Similarity store backends |
//! | [`retrieve`] | Semantic and lexical retrieval |
//! | [`stats`] | Corpus statistics and consistency report |

pub mod chunk;
pub mod config;
pub mod db;
pub mod discover;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod failures;
pub mod ingest;
pub mod jsonl;
pub mod ledger;
pub mod lock;
pub mod manifest;
pub mod models;
pub mod progress;
pub mod registry;
pub mod retrieve;
pub mod stats;
pub mod vector_store;

pub use config::{load_config, Config};
pub use engine::Engine;
pub use error::IndexError;
pub use models::{Hit, IngestOptions, IngestSummary, RetrievalStrategy};
