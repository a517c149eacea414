//! In-memory [`Store`] implementation for tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. A replace is
//! validated in full before the chunk list is touched, so a rejected
//! replace leaves the previous generation in place just like the SQLite
//! transaction does.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{ChunkDraft, ChunkRecord, DocumentRecord, DocumentStatus, SearchHit};

use super::{check_replace_inputs, expand_prefixes, in_folder, rank, StatusSummary, Store};

pub struct InMemoryStore {
    dims: usize,
    docs: RwLock<HashMap<String, DocumentRecord>>,
    chunks: RwLock<Vec<ChunkRecord>>,
}

impl InMemoryStore {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            docs: RwLock::new(HashMap::new()),
            chunks: RwLock::new(Vec::new()),
        }
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        Ok(self.docs.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn upsert_document(&self, record: &DocumentRecord) -> Result<()> {
        self.docs
            .write()
            .map_err(poisoned)?
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: &[ChunkDraft],
        embeddings: &[Vec<f32>],
    ) -> Result<u64> {
        check_replace_inputs(chunks, embeddings, self.dims)?;

        let fresh = chunks.iter().zip(embeddings).map(|(c, v)| ChunkRecord {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            doc_title: c.doc_title.clone(),
            folder_path: c.folder_path.clone(),
            doc_modified_time: c.doc_modified_time,
            doc_url: c.doc_url.clone(),
            source_type: c.source_type,
            position: c.position,
            origin: c.origin,
            text: c.text.clone(),
            embedding: v.clone(),
        });

        let mut stored = self.chunks.write().map_err(poisoned)?;
        stored.retain(|c| c.document_id != document_id);
        stored.extend(fresh);
        Ok(chunks.len() as u64)
    }

    async fn chunk_count(&self, document_id: &str) -> Result<u64> {
        let stored = self.chunks.read().map_err(poisoned)?;
        Ok(stored.iter().filter(|c| c.document_id == document_id).count() as u64)
    }

    async fn search(
        &self,
        query_vec: &[f32],
        top_k: usize,
        folder: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let stored = self.chunks.read().map_err(poisoned)?;
        let hits = stored
            .iter()
            .filter(|c| folder.map_or(true, |f| in_folder(&c.folder_path, f)))
            .map(|c| SearchHit {
                score: cosine_similarity(query_vec, &c.embedding),
                chunk: c.clone(),
            })
            .collect();
        Ok(rank(hits, top_k))
    }

    async fn status_summary(&self) -> Result<StatusSummary> {
        let docs = self.docs.read().map_err(poisoned)?;
        let count = |status: DocumentStatus| {
            docs.values().filter(|d| d.status == status).count() as u64
        };
        Ok(StatusSummary {
            last_ingested_at: docs.values().map(|d| d.last_ingested_at).max(),
            indexed: count(DocumentStatus::Indexed),
            failed: count(DocumentStatus::Failed),
        })
    }

    async fn folder_prefixes(&self) -> Result<Vec<String>> {
        let stored = self.chunks.read().map_err(poisoned)?;
        Ok(expand_prefixes(stored.iter().map(|c| c.folder_path.as_str())))
    }
}
