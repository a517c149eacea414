//! Storage abstraction for document state and chunk vectors.
//!
//! The [`Store`] trait is the persistence seam of the ingestion pipeline
//! and the read path. [`SqliteStore`] is the production backend;
//! [`InMemoryStore`] backs tests that do not need a database file.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`get_document`](Store::get_document) | Last recorded outcome for a file |
//! | [`upsert_document`](Store::upsert_document) | Insert or overwrite a document record |
//! | [`replace_chunks`](Store::replace_chunks) | Atomically swap a document's chunks |
//! | [`chunk_count`](Store::chunk_count) | Number of chunks stored for a document |
//! | [`search`](Store::search) | Cosine-ranked chunks, optionally within a folder |
//! | [`status_summary`](Store::status_summary) | Counts and last ingest time |
//! | [`folder_prefixes`](Store::folder_prefixes) | Every folder (and parent folder) holding chunks |

pub mod memory;
pub mod sqlite;

use std::collections::BTreeSet;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{ChunkDraft, DocumentRecord, SearchHit};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Ingestion health as seen by the read path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub last_ingested_at: Option<DateTime<Utc>>,
    pub indexed: u64,
    pub failed: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>>;

    /// Insert or overwrite the record keyed by `record.id`.
    async fn upsert_document(&self, record: &DocumentRecord) -> Result<()>;

    /// Delete every chunk of `document_id` and insert `chunks`, index-aligned
    /// with `embeddings`, as one unit of work. On error nothing changes.
    ///
    /// Returns the number of chunks inserted.
    async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: &[ChunkDraft],
        embeddings: &[Vec<f32>],
    ) -> Result<u64>;

    async fn chunk_count(&self, document_id: &str) -> Result<u64>;

    /// Top `top_k` chunks by cosine similarity to `query_vec`.
    ///
    /// `folder` restricts results to that folder and its sub-folders.
    async fn search(
        &self,
        query_vec: &[f32],
        top_k: usize,
        folder: Option<&str>,
    ) -> Result<Vec<SearchHit>>;

    async fn status_summary(&self) -> Result<StatusSummary>;

    async fn folder_prefixes(&self) -> Result<Vec<String>>;
}

/// Reject a replace whose inputs are not aligned or have the wrong width.
pub(crate) fn check_replace_inputs(
    chunks: &[ChunkDraft],
    embeddings: &[Vec<f32>],
    dims: usize,
) -> Result<()> {
    if chunks.len() != embeddings.len() {
        bail!(
            "{} chunks but {} embeddings",
            chunks.len(),
            embeddings.len()
        );
    }
    check_dims(embeddings.iter().map(Vec::len), dims)
}

pub(crate) fn check_dims(widths: impl IntoIterator<Item = usize>, dims: usize) -> Result<()> {
    for (i, width) in widths.into_iter().enumerate() {
        if width != dims {
            bail!(
                "embedding {} has {} dimensions, store expects {}",
                i,
                width,
                dims
            );
        }
    }
    Ok(())
}

/// True when `path` is `folder` or lies beneath it.
pub(crate) fn in_folder(path: &str, folder: &str) -> bool {
    path == folder
        || path
            .strip_prefix(folder)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Every `/`-prefix of every non-empty path, deduplicated and sorted.
pub(crate) fn expand_prefixes<I, S>(paths: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = BTreeSet::new();
    for path in paths {
        let path = path.as_ref();
        if path.is_empty() {
            continue;
        }
        let mut prefix = String::new();
        for part in path.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            out.insert(prefix.clone());
        }
    }
    out.into_iter().collect()
}

/// Sort scored hits best-first and keep `top_k`.
pub(crate) fn rank(mut hits: Vec<SearchHit>, top_k: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(top_k);
    hits
}
