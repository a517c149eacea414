//! SQLite-backed [`Store`] implementation.
//!
//! Vectors live in `chunks.embedding` as little-endian `f32` BLOBs and
//! search is a brute-force cosine scan, which is plenty for a single
//! department's document tree.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{ChunkDraft, ChunkRecord, DocumentRecord, SearchHit};

use super::{check_replace_inputs, expand_prefixes, rank, StatusSummary, Store};

const CHUNK_COLUMNS: &str = "id, document_id, doc_title, folder_path, doc_modified_time, \
     doc_url, source_type, position, text_origin, text, embedding";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    dims: usize,
}

impl SqliteStore {
    /// `dims` is the embedding width every stored vector must have.
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }
}

fn ts_to_datetime(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| DateTime::from_timestamp(t, 0))
}

fn row_to_document(row: &SqliteRow) -> Result<DocumentRecord> {
    let status: String = row.get("status");
    let last: i64 = row.get("last_ingested_at");
    Ok(DocumentRecord {
        id: row.get("id"),
        name: row.get("name"),
        mime_type: row.get("mime_type"),
        folder_path: row.get("folder_path"),
        modified_time: ts_to_datetime(row.get("modified_time")),
        content_hash: row.get("content_hash"),
        status: status.parse()?,
        last_ingested_at: ts_to_datetime(Some(last)).unwrap_or_default(),
        error: row.get("error"),
    })
}

fn row_to_chunk(row: &SqliteRow) -> Result<ChunkRecord> {
    let source_type: String = row.get("source_type");
    let origin: String = row.get("text_origin");
    let position: i64 = row.get("position");
    let blob: Vec<u8> = row.get("embedding");
    Ok(ChunkRecord {
        id: row.get("id"),
        document_id: row.get("document_id"),
        doc_title: row.get("doc_title"),
        folder_path: row.get("folder_path"),
        doc_modified_time: ts_to_datetime(row.get("doc_modified_time")),
        doc_url: row.get("doc_url"),
        source_type: source_type.parse()?,
        position: u32::try_from(position)?,
        origin: origin.parse()?,
        text: row.get("text"),
        embedding: blob_to_vec(&blob),
    })
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT id, name, mime_type, folder_path, modified_time, content_hash, status, \
             last_ingested_at, error FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn upsert_document(&self, record: &DocumentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, name, mime_type, folder_path, modified_time,
                                   content_hash, status, last_ingested_at, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                mime_type = excluded.mime_type,
                folder_path = excluded.folder_path,
                modified_time = excluded.modified_time,
                content_hash = excluded.content_hash,
                status = excluded.status,
                last_ingested_at = excluded.last_ingested_at,
                error = excluded.error
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.mime_type)
        .bind(&record.folder_path)
        .bind(record.modified_time.map(|t| t.timestamp()))
        .bind(&record.content_hash)
        .bind(record.status.as_str())
        .bind(record.last_ingested_at.timestamp())
        .bind(&record.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: &[ChunkDraft],
        embeddings: &[Vec<f32>],
    ) -> Result<u64> {
        check_replace_inputs(chunks, embeddings, self.dims)?;

        // Any early return drops `tx`, which rolls back.
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(embeddings) {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, doc_title, folder_path, doc_modified_time,
                                    doc_url, source_type, position, text_origin, text, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(document_id)
            .bind(&chunk.doc_title)
            .bind(&chunk.folder_path)
            .bind(chunk.doc_modified_time.map(|t| t.timestamp()))
            .bind(&chunk.doc_url)
            .bind(chunk.source_type.as_str())
            .bind(i64::from(chunk.position))
            .bind(chunk.origin.as_str())
            .bind(&chunk.text)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(chunks.len() as u64)
    }

    async fn chunk_count(&self, document_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn search(
        &self,
        query_vec: &[f32],
        top_k: usize,
        folder: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let rows = match folder {
            Some(f) => {
                sqlx::query(&format!(
                    "SELECT {} FROM chunks WHERE folder_path = ? OR folder_path LIKE ? ESCAPE '\\'",
                    CHUNK_COLUMNS
                ))
                .bind(f)
                .bind(format!("{}/%", like_escape(f)))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("SELECT {} FROM chunks", CHUNK_COLUMNS))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = row_to_chunk(row)?;
            let score = cosine_similarity(query_vec, &chunk.embedding);
            hits.push(SearchHit { score, chunk });
        }

        Ok(rank(hits, top_k))
    }

    async fn status_summary(&self) -> Result<StatusSummary> {
        let (last, indexed, failed): (Option<i64>, i64, i64) = sqlx::query_as(
            r#"
            SELECT MAX(last_ingested_at),
                   COALESCE(SUM(CASE WHEN status = 'indexed' THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
            FROM documents
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StatusSummary {
            last_ingested_at: ts_to_datetime(last),
            indexed: indexed as u64,
            failed: failed as u64,
        })
    }

    async fn folder_prefixes(&self) -> Result<Vec<String>> {
        let paths: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT folder_path FROM chunks WHERE folder_path != ''")
                .fetch_all(&self.pool)
                .await?;
        Ok(expand_prefixes(paths))
    }
}
