//! # drive-rag CLI
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `drive-rag init` | Create the SQLite database and run schema migrations |
//! | `drive-rag sync` | Ingest new and changed files from the source tree |
//! | `drive-rag search "<query>"` | Semantic search over indexed chunks |
//! | `drive-rag status` | Document counts, last ingest time, folders |
//!
//! ## Examples
//!
//! ```bash
//! drive-rag init --config ./config/drive-rag.toml
//! DRIVE_ROOT_ID=1AbC... drive-rag sync --since-days 30
//! drive-rag sync --force-all --progress json
//! drive-rag search "insulin infusion" --folder Endocrine --top-k 3
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use drive_rag::config::{self, Config};
use drive_rag::ingest::{self, IngestOptions};
use drive_rag::progress::ProgressMode;
use drive_rag::{db, logging, migrate, search};

/// drive-rag: incremental document ingestion for retrieval-augmented QA.
#[derive(Parser)]
#[command(name = "drive-rag", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/drive-rag.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest new and changed files from the source tree.
    ///
    /// Unchanged files are skipped; files that fail are recorded and
    /// retried on the next run.
    Sync {
        /// Root folder id (Drive) or sub-directory (local).
        #[arg(long, env = "DRIVE_ROOT_ID")]
        root_id: Option<String>,

        /// Reprocess every supported file.
        #[arg(long)]
        force_all: bool,

        /// Reprocess only this file id; all others are skipped.
        #[arg(long)]
        force_file_id: Option<String>,

        /// Recency window for the unchanged-file shortcut.
        #[arg(long, env = "INGEST_SINCE_DAYS")]
        since_days: Option<u32>,

        /// Native text shorter than this triggers OCR.
        #[arg(long)]
        text_min_chars: Option<usize>,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Classify files without extracting, embedding, or writing.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr. Defaults to human on a TTY, else off.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Semantic search over indexed chunks.
    Search {
        query: String,

        /// Restrict to this folder and its sub-folders.
        #[arg(long)]
        folder: Option<String>,

        /// Number of results (default: retrieval.top_k).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Show index status: document counts, last ingest, folders.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Sync {
            root_id,
            force_all,
            force_file_id,
            since_days,
            text_min_chars,
            chunk_size,
            chunk_overlap,
            dry_run,
            progress,
        } => {
            apply_sync_overrides(
                &mut cfg,
                root_id,
                since_days,
                text_min_chars,
                chunk_size,
                chunk_overlap,
            )?;
            let opts = IngestOptions {
                force_all,
                force_file_id,
                dry_run,
            };
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_sync(&cfg, opts, progress).await?;
        }
        Commands::Search {
            query,
            folder,
            top_k,
        } => {
            search::run_search(&cfg, &query, folder, top_k).await?;
        }
        Commands::Status => {
            search::run_status(&cfg).await?;
        }
    }

    Ok(())
}

/// Fold per-run CLI flags into the loaded config and re-validate.
fn apply_sync_overrides(
    cfg: &mut Config,
    root_id: Option<String>,
    since_days: Option<u32>,
    text_min_chars: Option<usize>,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
) -> Result<()> {
    if let Some(root_id) = root_id {
        cfg.ingest.root_id = Some(root_id);
    }
    if let Some(days) = since_days {
        cfg.ingest.since_days = days;
    }
    if let Some(n) = text_min_chars {
        cfg.extraction.text_min_chars = n;
    }
    if let Some(n) = chunk_size {
        cfg.chunking.chunk_size = n;
    }
    if let Some(n) = chunk_overlap {
        cfg.chunking.chunk_overlap = n;
    }
    cfg.validate()
}
