//! Read path: semantic search and index status.
//!
//! Queries are embedded with the configured provider and ranked by cosine
//! similarity against every stored chunk, optionally restricted to one
//! folder and its sub-folders. Answer generation on top of the hits is
//! left to the caller.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::embedding::{self, embed_query, EmbeddingProvider};
use crate::models::SearchHit;
use crate::store::{SqliteStore, Store};

/// Top `top_k` chunks for `query`. A blank query returns nothing without
/// calling the embedder.
pub async fn search_chunks(
    store: &dyn Store,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    top_k: usize,
    folder: Option<&str>,
) -> Result<Vec<SearchHit>> {
    let query = query.trim();
    if query.is_empty() || top_k == 0 {
        return Ok(Vec::new());
    }
    let folder = folder.map(|f| f.trim_matches('/')).filter(|f| !f.is_empty());

    let query_vec = embed_query(embedder, query).await?;
    store.search(&query_vec, top_k, folder).await
}

/// Entry point for `drive-rag search`.
pub async fn run_search(
    config: &Config,
    query: &str,
    folder: Option<String>,
    top_k: Option<usize>,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }
    let embedder = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone(), config.embedding.dims_or_zero());

    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let hits = search_chunks(&store, embedder.as_ref(), query, top_k, folder.as_deref()).await;
    pool.close().await;
    let hits = hits?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let chunk = &hit.chunk;
        let folder = if chunk.folder_path.is_empty() {
            "/"
        } else {
            chunk.folder_path.as_str()
        };
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            hit.score,
            folder,
            chunk.doc_title
        );
        println!(
            "    {} {} ({})",
            chunk.source_type.as_str(),
            chunk.position,
            chunk.origin.as_str()
        );
        if let Some(modified) = chunk.doc_modified_time {
            println!("    modified: {}", modified.format("%Y-%m-%d"));
        }
        println!("    url: {}", chunk.doc_url);
        println!("    excerpt: \"{}\"", excerpt(&chunk.text, 240));
        println!();
    }

    Ok(())
}

/// Entry point for `drive-rag status`.
pub async fn run_status(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone(), config.embedding.dims_or_zero());

    let summary = store.status_summary().await;
    let folders = store.folder_prefixes().await;
    pool.close().await;
    let (summary, folders) = (summary?, folders?);

    let last = summary
        .last_ingested_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());

    println!("drive-rag status");
    println!("  Database:       {}", config.db.path.display());
    println!("  Last ingest:    {}", last);
    println!("  Indexed docs:   {}", summary.indexed);
    println!("  Failed docs:    {}", summary.failed);
    if !folders.is_empty() {
        println!();
        println!("  Folders:");
        for folder in &folders {
            println!("    {}", folder);
        }
    }

    Ok(())
}

/// Single-line excerpt of at most `max_chars` characters.
fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
