use anyhow::Result;
use sqlx::SqlitePool;

/// Create the `documents` and `chunks` tables. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per source file, keyed by the provider's identity.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            folder_path TEXT NOT NULL DEFAULT '',
            modified_time INTEGER,
            content_hash TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('indexed', 'failed')),
            last_ingested_at INTEGER NOT NULL,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunks carry document metadata so retrieval never joins.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            doc_title TEXT NOT NULL,
            folder_path TEXT NOT NULL DEFAULT '',
            doc_modified_time INTEGER,
            doc_url TEXT NOT NULL,
            source_type TEXT NOT NULL CHECK (source_type IN ('page', 'slide')),
            position INTEGER NOT NULL,
            text_origin TEXT NOT NULL CHECK (text_origin IN ('native', 'ocr')),
            text TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_folder_path ON chunks(folder_path)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)")
        .execute(pool)
        .await?;

    Ok(())
}
