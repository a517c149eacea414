//! Incremental ingestion pipeline.
//!
//! Drives every file of the source tree through
//! fetch → hash → change detection → extract → chunk → embed → replace,
//! one file at a time. Each file ends in exactly one of three states:
//!
//! | Outcome | When |
//! |---------|------|
//! | Skipped | not the forced file, unsupported type, old and unchanged, or unchanged |
//! | Ingested | chunks replaced and the document recorded as `indexed` |
//! | Failed | any error after the type check; recorded as `failed` with the error |
//!
//! A failed file never stops the run. Only a failure to list the source
//! tree is fatal.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::change::{content_hash, is_stale_unchanged, recency_cutoff, should_ingest};
use crate::chunk::build_chunks;
use crate::config::Config;
use crate::db;
use crate::drive::{self, FileTreeProvider};
use crate::embedding::{self, embed_batch, EmbeddingProvider};
use crate::extract::{self, ExtractionSettings, Extractor};
use crate::migrate;
use crate::models::{DocumentRecord, DocumentStatus, RunSummary, SourceFile};
use crate::ocr;
use crate::progress::{ProgressMode, SyncProgressEvent, SyncProgressReporter};
use crate::store::{SqliteStore, Store};

/// Per-run switches. Thresholds and chunk sizes come from [`Config`].
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Re-ingest every supported file regardless of stored state.
    pub force_all: bool,
    /// Process only this file, as if forced; every other file is skipped.
    pub force_file_id: Option<String>,
    /// Classify files without extracting, embedding, or writing.
    pub dry_run: bool,
}

impl IngestOptions {
    fn is_forced(&self) -> bool {
        self.force_all || self.force_file_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotTargeted,
    UnsupportedType,
    OutsideWindow,
    Unchanged,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotTargeted => "not the forced file",
            SkipReason::UnsupportedType => "unsupported content type",
            SkipReason::OutsideWindow => "older than recency window and unchanged",
            SkipReason::Unchanged => "unchanged",
        }
    }
}

/// Terminal state of one file in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Skipped(SkipReason),
    Ingested { chunks: u64 },
    Failed(String),
}

impl FileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FileOutcome::Skipped(_) => "skipped",
            FileOutcome::Ingested { .. } => "ingested",
            FileOutcome::Failed(_) => "failed",
        }
    }
}

/// The collaborators one run works against.
pub struct Pipeline<'a> {
    pub config: &'a Config,
    pub provider: &'a dyn FileTreeProvider,
    pub store: &'a dyn Store,
    pub embedder: &'a dyn EmbeddingProvider,
    pub extractor: &'a Extractor,
    pub reporter: &'a dyn SyncProgressReporter,
}

impl Pipeline<'_> {
    /// Run the pipeline over every file under `root_id`.
    pub async fn run(&self, root_id: &str, opts: &IngestOptions) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        self.reporter.report(SyncProgressEvent::Listing {
            root: root_id.to_string(),
        });
        let files = self
            .provider
            .list_files_recursive(root_id)
            .await
            .context("Failed to list source tree")?;
        let total = files.len() as u64;
        info!("Listed {} files under '{}'", total, root_id);

        let cutoff = recency_cutoff(Utc::now(), self.config.ingest.since_days);

        for (i, file) in files.iter().enumerate() {
            summary.scanned += 1;
            let outcome = self.process_file(file, opts, cutoff, &mut summary).await;

            match &outcome {
                FileOutcome::Skipped(reason) => {
                    summary.skipped += 1;
                    debug!("Skipped {} ({}): {}", file.name, file.id, reason.as_str());
                }
                FileOutcome::Ingested { chunks } => {
                    summary.ingested += 1;
                    summary.chunks_inserted += chunks;
                    info!("Ingested {} ({}): {} chunks", file.name, file.id, chunks);
                }
                FileOutcome::Failed(_) => summary.failed += 1,
            }

            self.reporter.report(SyncProgressEvent::File {
                n: i as u64 + 1,
                total,
                name: file.name.clone(),
                outcome: outcome.label(),
            });
        }

        info!("Ingestion summary: {}", summary);
        Ok(summary)
    }

    /// Classify and, if stale, ingest one file. Never returns an error:
    /// failures become [`FileOutcome::Failed`] and are recorded.
    pub async fn process_file(
        &self,
        file: &SourceFile,
        opts: &IngestOptions,
        cutoff: DateTime<Utc>,
        summary: &mut RunSummary,
    ) -> FileOutcome {
        if let Some(target) = &opts.force_file_id {
            if &file.id != target {
                return FileOutcome::Skipped(SkipReason::NotTargeted);
            }
        }
        if !extract::is_supported(&file.mime_type) {
            return FileOutcome::Skipped(SkipReason::UnsupportedType);
        }

        let bytes = match self.provider.fetch(file).await {
            Ok(bytes) => bytes,
            // No bytes, no hash: an empty hash guarantees a retry next run.
            Err(e) => return self.record_failure(file, "", e, opts).await,
        };
        let hash = content_hash(&bytes);

        let existing = match self.store.get_document(&file.id).await {
            Ok(existing) => existing,
            Err(e) => return self.record_failure(file, &hash, e, opts).await,
        };

        let forced = opts.is_forced();
        if !forced && is_stale_unchanged(existing.as_ref(), file.modified_time, &hash, cutoff) {
            return FileOutcome::Skipped(SkipReason::OutsideWindow);
        }
        // A failed document is retried even when nothing about it changed.
        let retry_failed = matches!(&existing, Some(r) if r.status == DocumentStatus::Failed);
        if !retry_failed
            && !should_ingest(
                existing.as_ref(),
                file.modified_time,
                &file.folder_path,
                &hash,
                forced,
            )
        {
            return FileOutcome::Skipped(SkipReason::Unchanged);
        }

        if opts.dry_run {
            return FileOutcome::Ingested { chunks: 0 };
        }

        match self.ingest_file(file, bytes, &hash, summary).await {
            Ok(chunks) => FileOutcome::Ingested { chunks },
            Err(e) => self.record_failure(file, &hash, e, opts).await,
        }
    }

    async fn ingest_file(
        &self,
        file: &SourceFile,
        bytes: Vec<u8>,
        hash: &str,
        summary: &mut RunSummary,
    ) -> Result<u64> {
        // PDF parsing and the OCR subprocesses block; keep them off the runtime.
        let extractor = self.extractor.clone();
        let mime_type = file.mime_type.clone();
        let extraction =
            tokio::task::spawn_blocking(move || extractor.extract(&bytes, &mime_type))
                .await
                .context("extraction task did not complete")??;
        summary.ocr_pages += extraction.ocr_pages;

        let chunking = &self.config.chunking;
        let chunks = build_chunks(
            file,
            &extraction.units,
            chunking.chunk_size,
            chunking.chunk_overlap,
        );
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = embed_batch(self.embedder, &texts).await?;

        let inserted = self
            .store
            .replace_chunks(&file.id, &chunks, &embeddings)
            .await?;
        self.store
            .upsert_document(&DocumentRecord::for_attempt(
                file,
                hash,
                DocumentStatus::Indexed,
                None,
            ))
            .await?;

        Ok(inserted)
    }

    async fn record_failure(
        &self,
        file: &SourceFile,
        hash: &str,
        err: anyhow::Error,
        opts: &IngestOptions,
    ) -> FileOutcome {
        let message = format!("{:#}", err);
        warn!("Failed to ingest {} ({}): {}", file.name, file.id, message);

        if !opts.dry_run {
            let record = DocumentRecord::for_attempt(
                file,
                hash,
                DocumentStatus::Failed,
                Some(message.clone()),
            );
            if let Err(e) = self.store.upsert_document(&record).await {
                error!("Could not record failure for {}: {:#}", file.id, e);
            }
        }

        FileOutcome::Failed(message)
    }
}

/// Entry point for `drive-rag sync`: wire up the production collaborators,
/// run, and print the summary on stdout.
pub async fn run_sync(config: &Config, opts: IngestOptions, progress: ProgressMode) -> Result<()> {
    let root_id = drive::resolve_root_id(config)?;
    let embedder = embedding::create_provider(&config.embedding)?;
    let provider = drive::create_provider(&config.source)?;

    if embedder.dims() > 0 {
        info!(
            "Embedding with {} ({} dimensions)",
            embedder.model_name(),
            embedder.dims()
        );
    }

    let extractor = Extractor::new(
        ExtractionSettings::from_config(&config.extraction),
        ocr::create_ocr_engine(&config.extraction),
        ocr::create_page_renderer(&config.extraction),
    );

    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let store = SqliteStore::new(pool.clone(), config.embedding.dims_or_zero());
    let reporter = progress.reporter();

    let pipeline = Pipeline {
        config,
        provider: provider.as_ref(),
        store: &store,
        embedder: embedder.as_ref(),
        extractor: &extractor,
        reporter: reporter.as_ref(),
    };
    let summary = pipeline.run(&root_id, &opts).await;
    pool.close().await;
    let summary = summary?;

    let root_label = if root_id.is_empty() { "<root>" } else { &root_id };
    if opts.dry_run {
        println!("sync {} (dry-run)", root_label);
    } else {
        println!("sync {}", root_label);
    }
    println!("  {}", summary);
    println!("ok");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(FileOutcome::Skipped(SkipReason::Unchanged).label(), "skipped");
        assert_eq!(FileOutcome::Ingested { chunks: 3 }.label(), "ingested");
        assert_eq!(FileOutcome::Failed("x".to_string()).label(), "failed");
    }

    #[test]
    fn test_force_file_id_counts_as_forced() {
        assert!(!IngestOptions::default().is_forced());
        let opts = IngestOptions {
            force_file_id: Some("abc".to_string()),
            ..IngestOptions::default()
        };
        assert!(opts.is_forced());
    }
}
