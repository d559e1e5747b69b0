//! # Knowledge Index CLI (`kidx`)
//!
//! The `kidx` binary ingests document trees into named corpora and queries
//! them.
//!
//! ## Usage
//!
//! ```bash
//! kidx --config ./config/kidx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kidx ingest <corpus> <root>` | Ingest (or incrementally re-ingest) a directory |
//! | `kidx retrieve <corpus> "<query>"` | Top-k chunks, semantic first then lexical |
//! | `kidx stats <corpus>` | Counts, sizes and a consistency report |
//! | `kidx corpora` | List existing corpora |
//!
//! Results go to stdout; logs (`RUST_LOG`) and progress go to stderr.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use knowledge_index::config::{self, Config};
use knowledge_index::lock::IngestLock;
use knowledge_index::models::{Hit, IngestOptions, IngestSummary};
use knowledge_index::progress::ProgressMode;
use knowledge_index::stats;
use knowledge_index::Engine;

const DEFAULT_CONFIG: &str = "./config/kidx.toml";

/// Knowledge Index CLI: local document ingestion and retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kidx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kidx",
    about = "Knowledge Index: local-first document ingestion and retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/kidx.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest every supported file under a directory into a corpus.
    ///
    /// Unchanged files are skipped, changed files have their chunks
    /// replaced, and files that disappeared are removed from the corpus.
    Ingest {
        /// Corpus name (letters, digits, `_`, `-`).
        corpus: String,

        /// Directory to scan.
        root: PathBuf,

        /// Clear ledger, manifest, doc map and failure log first.
        #[arg(long)]
        reset: bool,

        /// Clear the similarity store first.
        #[arg(long)]
        reset_vector_store: bool,

        /// Embed chunks into the similarity store.
        #[arg(long)]
        use_semantic: bool,

        /// Override `[embedding].model` for this run.
        #[arg(long)]
        embed_model: Option<String>,

        /// Override `[chunking].chunk_size`.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Override `[chunking].overlap`.
        #[arg(long)]
        overlap: Option<usize>,

        /// Reprocess files even when their fingerprint is unchanged.
        #[arg(long)]
        force: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Retrieve the chunks that best match a query.
    Retrieve {
        corpus: String,

        query: String,

        /// Maximum number of hits (default `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Drop semantic hits farther than this cosine distance.
        #[arg(long)]
        max_distance: Option<f64>,

        /// Print hits as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show corpus statistics and consistency report.
    Stats {
        corpus: String,

        /// Print stats as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List corpora under the data directory.
    Corpora,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => config::load_config(p),
        None if Path::new(DEFAULT_CONFIG).exists() => config::load_config(Path::new(DEFAULT_CONFIG)),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = load(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest {
            corpus,
            root,
            reset,
            reset_vector_store,
            use_semantic,
            embed_model,
            chunk_size,
            overlap,
            force,
            progress,
            json,
        } => {
            let mode = progress.map(ProgressMode::from).unwrap_or_else(ProgressMode::default_for_tty);
            let engine = Engine::new(cfg)?.with_progress(mode.reporter());
            let options = IngestOptions {
                reset,
                reset_vector_store,
                use_semantic,
                embed_model,
                chunk_size,
                overlap,
                force,
            };
            engine.validate_ingest(&corpus, &root, &options)?;

            let handle = engine.registry().resolve(&corpus)?;
            let _lock = IngestLock::acquire(&handle.lock)?;
            let summary = engine.ingest(&corpus, &root, &options).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&corpus, &summary);
            }
        }
        Commands::Retrieve {
            corpus,
            query,
            top_k,
            max_distance,
            json,
        } => {
            let engine = Engine::new(cfg)?;
            let hits = engine.retrieve(&corpus, &query, top_k, max_distance).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                print_hits(&hits);
            }
        }
        Commands::Stats { corpus, json } => {
            let engine = Engine::new(cfg)?;
            let corpus_stats = engine.stats(&corpus).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&corpus_stats)?);
            } else {
                stats::print_stats(&corpus_stats);
            }
        }
        Commands::Corpora => {
            let engine = Engine::new(cfg)?;
            for name in engine.corpora()? {
                println!("{}", name);
            }
        }
    }

    Ok(())
}

fn print_summary(corpus: &str, s: &IngestSummary) {
    println!("Ingest '{}' complete", corpus);
    println!("  discovered:  {}", s.files_discovered);
    println!("  processed:   {}", s.processed);
    println!("  skipped:     {} ({} unsupported)", s.skipped, s.unsupported);
    println!("  empty:       {}", s.empty);
    println!("  failed:      {}", s.failed);
    println!("  removed:     {}", s.removed);
    println!("  chunks:      +{} / -{}", s.chunks_written, s.chunks_retracted);
    println!("  duration:    {} ms", s.duration_ms);
}

fn print_hits(hits: &[Hit]) {
    if hits.is_empty() {
        println!("No results.");
        return;
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({})",
            i + 1,
            hit.score,
            hit.source_path,
            hit.strategy
        );
        println!("    id: {}", hit.chunk_id);
        let snippet: String = hit.text.chars().take(240).collect();
        println!("    {}", snippet.replace('\n', " "));
        println!();
    }
}
