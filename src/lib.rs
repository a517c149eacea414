//! # drive-rag
//!
//! Incremental ingestion of a document tree (PDF and PowerPoint) into a
//! vector index for retrieval-augmented question answering.
//!
//! Each run walks the source tree, decides per file whether anything
//! changed since the last run, extracts text page by page (falling back to
//! OCR where native text is sparse), splits it into overlapping chunks,
//! embeds them, and atomically replaces the document's chunks in SQLite.
//! One bad file never stops a run.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────────────┐   ┌──────────┐
//! │ File tree    │──▶│ change → extract → chunk →   │──▶│  SQLite  │
//! │ Drive/local  │   │ embed → replace (per file)   │   │ docs+vec │
//! └──────────────┘   └──────────────────────────────┘   └────┬─────┘
//!                                                            ▼
//!                                                   ┌────────────────┐
//!                                                   │ search/status  │
//!                                                   └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! drive-rag init                       # create database
//! drive-rag sync                       # ingest changed files
//! drive-rag sync --force-file-id <id>  # reprocess one file
//! drive-rag search "neonatal sepsis" --folder Neonatology
//! drive-rag status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`drive`] | File-tree providers (public Drive folder, local directory) |
//! | [`change`] | Content hashing and staleness decisions |
//! | [`extract`] | Per-page/slide native text vs. OCR arbitration |
//! | [`ocr`] | OCR engine, page renderer, image quality gate |
//! | [`chunk`] | Fixed-window text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Document/chunk persistence (SQLite, in-memory) |
//! | [`ingest`] | The per-file pipeline and run orchestration |
//! | [`progress`] | Sync progress reporting |
//! | [`search`] | Read path: semantic search and status |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | Tracing subscriber setup |

pub mod change;
pub mod chunk;
pub mod config;
pub mod db;
pub mod drive;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod progress;
pub mod search;
pub mod store;
