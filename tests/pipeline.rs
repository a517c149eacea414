//! End-to-end ingestion runs against an on-disk SQLite store with an
//! in-memory file tree, a deterministic embedder, and a fake OCR engine.

mod common;

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;

use common::{deck, png, scanned_deck, source_file, BrokenTree, FixedOcr, HashEmbedder, MemoryTree, DIMS};
use drive_rag::config::Config;
use drive_rag::embedding::{DisabledProvider, EmbeddingProvider};
use drive_rag::extract::{ExtractionSettings, Extractor};
use drive_rag::ingest::{IngestOptions, Pipeline};
use drive_rag::models::{ChunkDraft, DocumentStatus, RunSummary, SourceType, TextOrigin};
use drive_rag::ocr::NoRender;
use drive_rag::progress::NoProgress;
use drive_rag::store::{SqliteStore, Store};
use drive_rag::{db, migrate};

const OCR_TEXT: &str = "Scanned algorithm: give adrenaline every four minutes";

struct Harness {
    _tmp: TempDir,
    config: Config,
    store: SqliteStore,
}

async fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::with_db_path(tmp.path().join("data/index.sqlite"));
    config.chunking.chunk_size = 60;
    config.chunking.chunk_overlap = 10;
    config.extraction.text_min_chars = 20;

    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let store = SqliteStore::new(pool, DIMS);

    Harness {
        _tmp: tmp,
        config,
        store,
    }
}

async fn run_with(
    h: &Harness,
    tree: &dyn drive_rag::drive::FileTreeProvider,
    embedder: &dyn EmbeddingProvider,
    opts: IngestOptions,
) -> Result<RunSummary> {
    let extractor = Extractor::new(
        ExtractionSettings::from_config(&h.config.extraction),
        Arc::new(FixedOcr(OCR_TEXT)),
        Arc::new(NoRender),
    );
    let pipeline = Pipeline {
        config: &h.config,
        provider: tree,
        store: &h.store,
        embedder,
        extractor: &extractor,
        reporter: &NoProgress,
    };
    pipeline.run("root", &opts).await
}

async fn run(h: &Harness, tree: &MemoryTree, embedder: &HashEmbedder) -> RunSummary {
    run_with(h, tree, embedder, IngestOptions::default())
        .await
        .unwrap()
}

fn days_ago(days: i64) -> Option<DateTime<Utc>> {
    Some(Utc::now() - Duration::days(days))
}

/// Two decks: `a` (two slides, two chunks) and `b` (one chunk).
fn two_deck_tree() -> MemoryTree {
    let tree = MemoryTree::new();
    tree.put(
        source_file("a", "Hypoglycaemia.pptx", "Paeds/Endocrine", days_ago(1)),
        Some(deck(&[
            "Hypoglycaemia: check glucose hourly and feed early",
            "Sepsis bundle: cultures, lactate and antibiotics",
        ])),
    );
    tree.put(
        source_file("b", "Seizures.pptx", "Neuro", days_ago(2)),
        Some(deck(&["Seizure management: lorazepam first line"])),
    );
    tree
}

async fn texts_of(store: &SqliteStore, doc: &str) -> Vec<String> {
    let mut texts: Vec<String> = store
        .search(&[1.0, 0.0, 0.0], 100, None)
        .await
        .unwrap()
        .into_iter()
        .filter(|h| h.chunk.document_id == doc)
        .map(|h| h.chunk.text)
        .collect();
    texts.sort();
    texts
}

#[tokio::test]
async fn unchanged_files_are_skipped_on_rerun() {
    let h = harness().await;
    let tree = two_deck_tree();
    let embedder = HashEmbedder::default();

    let first = run(&h, &tree, &embedder).await;
    assert_eq!(first.scanned, 2);
    assert_eq!(first.ingested, 2);
    assert_eq!(first.chunks_inserted, 3);
    assert_eq!(first.failed, 0);

    let doc = h.store.get_document("a").await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Indexed);
    assert_eq!(doc.content_hash.len(), 64);
    assert!(doc.error.is_none());

    let calls = embedder.calls.load(std::sync::atomic::Ordering::SeqCst);
    let second = run(&h, &tree, &embedder).await;
    assert_eq!(second.scanned, 2);
    assert_eq!(second.ingested, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(second.chunks_inserted, 0);
    assert_eq!(h.store.chunk_count("a").await.unwrap(), 2);
    assert_eq!(h.store.chunk_count("b").await.unwrap(), 1);
    assert_eq!(embedder.calls.load(std::sync::atomic::Ordering::SeqCst), calls);
}

#[tokio::test]
async fn changed_content_replaces_all_chunks() {
    let h = harness().await;
    let tree = two_deck_tree();
    let embedder = HashEmbedder::default();
    run(&h, &tree, &embedder).await;

    // Same id, folder and modification time; different bytes.
    let original = source_file("a", "Hypoglycaemia.pptx", "Paeds/Endocrine", None);
    let mtime = h.store.get_document("a").await.unwrap().unwrap().modified_time;
    tree.put(
        drive_rag::models::SourceFile {
            modified_time: mtime,
            ..original
        },
        Some(deck(&["Updated hypoglycaemia guidance for neonates"])),
    );

    let summary = run(&h, &tree, &embedder).await;
    assert_eq!(summary.ingested, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(
        texts_of(&h.store, "a").await,
        vec!["Updated hypoglycaemia guidance for neonates".to_string()]
    );
}

#[tokio::test]
async fn moved_document_is_reingested() {
    let h = harness().await;
    let tree = two_deck_tree();
    let embedder = HashEmbedder::default();
    run(&h, &tree, &embedder).await;

    let mtime = h.store.get_document("b").await.unwrap().unwrap().modified_time;
    tree.put(
        source_file("b", "Seizures.pptx", "Neuro/Status epilepticus", mtime),
        Some(deck(&["Seizure management: lorazepam first line"])),
    );

    let summary = run(&h, &tree, &embedder).await;
    assert_eq!(summary.ingested, 1);
    let hits = h
        .store
        .search(&[1.0, 0.0, 0.0], 10, Some("Neuro/Status epilepticus"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.document_id, "b");
}

#[tokio::test]
async fn parse_failure_is_isolated_and_retried() {
    let h = harness().await;
    let tree = two_deck_tree();
    tree.put(
        source_file("c", "Broken.pptx", "Neuro", days_ago(1)),
        Some(b"not a zip archive".to_vec()),
    );
    let embedder = HashEmbedder::default();

    let first = run(&h, &tree, &embedder).await;
    assert_eq!(first.scanned, 3);
    assert_eq!(first.ingested, 2);
    assert_eq!(first.failed, 1);

    let failed = h.store.get_document("c").await.unwrap().unwrap();
    assert_eq!(failed.status, DocumentStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("PPTX"));
    assert_eq!(failed.content_hash.len(), 64);

    // Nothing changed, but a failed document is attempted again.
    let second = run(&h, &tree, &embedder).await;
    assert_eq!(second.failed, 1);
    assert_eq!(second.skipped, 2);

    tree.put(
        source_file("c", "Broken.pptx", "Neuro", days_ago(1)),
        Some(deck(&["Fixed deck: febrile convulsion advice leaflet"])),
    );
    let third = run(&h, &tree, &embedder).await;
    assert_eq!(third.ingested, 1);
    assert_eq!(third.failed, 0);
    let fixed = h.store.get_document("c").await.unwrap().unwrap();
    assert_eq!(fixed.status, DocumentStatus::Indexed);
    assert!(fixed.error.is_none());
}

#[tokio::test]
async fn old_failed_document_is_not_shortcut_by_recency() {
    let h = harness().await;
    let tree = MemoryTree::new();
    tree.put(
        source_file("old", "Archive.pptx", "", days_ago(60)),
        Some(b"corrupt".to_vec()),
    );
    let embedder = HashEmbedder::default();

    assert_eq!(run(&h, &tree, &embedder).await.failed, 1);
    assert_eq!(run(&h, &tree, &embedder).await.failed, 1);
}

#[tokio::test]
async fn recency_window_skips_old_unchanged_but_not_old_changed() {
    let h = harness().await;
    let tree = MemoryTree::new();
    let old = source_file("old", "Archive.pptx", "Archive", days_ago(60));
    tree.put(old.clone(), Some(deck(&["Archived protocol for bronchiolitis care"])));
    let embedder = HashEmbedder::default();

    assert_eq!(run(&h, &tree, &embedder).await.ingested, 1);
    assert_eq!(run(&h, &tree, &embedder).await.skipped, 1);

    tree.put(old, Some(deck(&["Archived protocol, amended oxygen thresholds"])));
    let summary = run(&h, &tree, &embedder).await;
    assert_eq!(summary.ingested, 1);
}

#[tokio::test]
async fn force_file_id_processes_only_that_file() {
    let h = harness().await;
    let tree = two_deck_tree();
    let embedder = HashEmbedder::default();
    run(&h, &tree, &embedder).await;

    let opts = IngestOptions {
        force_file_id: Some("b".to_string()),
        ..IngestOptions::default()
    };
    let summary = run_with(&h, &tree, &embedder, opts).await.unwrap();
    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.ingested, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.chunks_inserted, 1);
    assert_eq!(h.store.chunk_count("b").await.unwrap(), 1);
}

#[tokio::test]
async fn force_all_reingests_everything() {
    let h = harness().await;
    let tree = two_deck_tree();
    let embedder = HashEmbedder::default();
    run(&h, &tree, &embedder).await;

    let opts = IngestOptions {
        force_all: true,
        ..IngestOptions::default()
    };
    let summary = run_with(&h, &tree, &embedder, opts).await.unwrap();
    assert_eq!(summary.ingested, 2);
    assert_eq!(summary.chunks_inserted, 3);
    assert_eq!(h.store.chunk_count("a").await.unwrap(), 2);
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let h = harness().await;
    let tree = two_deck_tree();
    let embedder = HashEmbedder::default();

    let opts = IngestOptions {
        dry_run: true,
        ..IngestOptions::default()
    };
    let summary = run_with(&h, &tree, &embedder, opts).await.unwrap();
    assert_eq!(summary.ingested, 2);
    assert_eq!(summary.chunks_inserted, 0);
    assert_eq!(embedder.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(h.store.get_document("a").await.unwrap().is_none());
    assert_eq!(h.store.status_summary().await.unwrap().indexed, 0);
}

#[tokio::test]
async fn empty_extraction_clears_old_chunks() {
    let h = harness().await;
    let tree = two_deck_tree();
    let embedder = HashEmbedder::default();
    run(&h, &tree, &embedder).await;
    assert_eq!(h.store.chunk_count("a").await.unwrap(), 2);

    tree.put(
        source_file("a", "Hypoglycaemia.pptx", "Paeds/Endocrine", days_ago(1)),
        Some(deck(&["", ""])),
    );
    let summary = run(&h, &tree, &embedder).await;
    assert_eq!(summary.ingested, 1);
    assert_eq!(summary.chunks_inserted, 0);
    assert_eq!(h.store.chunk_count("a").await.unwrap(), 0);
    assert_eq!(
        h.store.get_document("a").await.unwrap().unwrap().status,
        DocumentStatus::Indexed
    );
}

#[tokio::test]
async fn zero_text_threshold_stores_no_blank_chunks() {
    let mut h = harness().await;
    h.config.extraction.text_min_chars = 0;
    let tree = MemoryTree::new();
    tree.put(
        source_file("z", "Mixed.pptx", "ED", days_ago(1)),
        Some(deck(&["", "Triage: airway first", "   "])),
    );
    let embedder = HashEmbedder::default();

    let summary = run(&h, &tree, &embedder).await;
    assert_eq!(summary.ingested, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.chunks_inserted, 1);
    assert_eq!(texts_of(&h.store, "z").await, vec!["Triage: airway first".to_string()]);
}

#[tokio::test]
async fn huge_recency_window_does_not_abort_the_run() {
    let mut h = harness().await;
    h.config.ingest.since_days = u32::MAX;
    let tree = two_deck_tree();
    let embedder = HashEmbedder::default();

    let first = run(&h, &tree, &embedder).await;
    assert_eq!(first.ingested, 2);
    let second = run(&h, &tree, &embedder).await;
    assert_eq!(second.skipped, 2);
}

#[tokio::test]
async fn download_failure_fails_only_that_file() {
    let h = harness().await;
    let tree = two_deck_tree();
    tree.put(source_file("gone", "Missing.pptx", "", days_ago(1)), None);
    let embedder = HashEmbedder::default();

    let summary = run(&h, &tree, &embedder).await;
    assert_eq!(summary.ingested, 2);
    assert_eq!(summary.failed, 1);

    let record = h.store.get_document("gone").await.unwrap().unwrap();
    assert_eq!(record.status, DocumentStatus::Failed);
    assert_eq!(record.content_hash, "");
    assert!(record.error.unwrap().contains("download"));
}

#[tokio::test]
async fn unsupported_types_are_skipped_without_download() {
    let h = harness().await;
    let tree = MemoryTree::new();
    tree.put(source_file("t", "notes.txt", "", days_ago(1)), Some(b"hi".to_vec()));
    let embedder = HashEmbedder::default();

    let summary = run(&h, &tree, &embedder).await;
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(tree.fetch_count(), 0);
    assert!(h.store.get_document("t").await.unwrap().is_none());
}

#[tokio::test]
async fn listing_failure_aborts_the_run() {
    let h = harness().await;
    let err = run_with(&h, &BrokenTree, &HashEmbedder::default(), IngestOptions::default())
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("not reachable"));
}

#[tokio::test]
async fn disabled_embeddings_fail_documents_with_text() {
    let h = harness().await;
    let tree = two_deck_tree();
    tree.put(
        source_file("blank", "Blank.pptx", "", days_ago(1)),
        Some(deck(&[""])),
    );

    let summary = run_with(&h, &tree, &DisabledProvider, IngestOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.ingested, 1, "a document without chunks needs no embeddings");
    let record = h.store.get_document("a").await.unwrap().unwrap();
    assert!(record.error.unwrap().contains("disabled"));
}

#[tokio::test]
async fn scanned_slide_goes_through_ocr() {
    let h = harness().await;
    let tree = MemoryTree::new();
    tree.put(
        source_file("scan", "Resus.pptx", "ED", days_ago(1)),
        Some(scanned_deck("Fig. 1", png(800, 600))),
    );
    tree.put(
        source_file("thumb", "Thumb.pptx", "ED", days_ago(1)),
        Some(scanned_deck("Logo", png(120, 80))),
    );
    let embedder = HashEmbedder::default();

    let summary = run(&h, &tree, &embedder).await;
    assert_eq!(summary.ingested, 2);
    assert_eq!(summary.ocr_pages, 1);

    let hits = h.store.search(&[1.0, 0.0, 0.0], 10, Some("ED")).await.unwrap();
    let scan = hits.iter().find(|h| h.chunk.document_id == "scan").unwrap();
    assert_eq!(scan.chunk.origin, TextOrigin::Ocr);
    assert_eq!(scan.chunk.source_type, SourceType::Slide);
    assert_eq!(scan.chunk.position, 1);
    assert_eq!(scan.chunk.text, OCR_TEXT);

    // The thumbnail fails the size gate; the short caption is kept.
    let thumb = hits.iter().find(|h| h.chunk.document_id == "thumb").unwrap();
    assert_eq!(thumb.chunk.origin, TextOrigin::Native);
    assert_eq!(thumb.chunk.text, "Logo");
}

#[tokio::test]
async fn failed_insert_keeps_previous_generation() {
    let h = harness().await;
    let draft = |text: &str| ChunkDraft {
        document_id: "doc".to_string(),
        doc_title: "Doc.pdf".to_string(),
        folder_path: "X".to_string(),
        doc_modified_time: None,
        doc_url: "https://example.test/doc".to_string(),
        source_type: SourceType::Page,
        position: 1,
        origin: TextOrigin::Native,
        text: text.to_string(),
    };

    let inserted = h
        .store
        .replace_chunks(
            "doc",
            &[draft("old one"), draft("old two")],
            &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 2);

    // Third embedding has the wrong width: rejected before anything is deleted.
    let err = h
        .store
        .replace_chunks(
            "doc",
            &[draft("new one"), draft("new two"), draft("new three")],
            &[vec![1.0, 0.0, 0.0], vec![1.0, 0.0, 0.0], vec![1.0, 0.0]],
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("embedding 2 has 2 dimensions"));

    // Misaligned inputs are rejected too.
    assert!(h
        .store
        .replace_chunks("doc", &[draft("lonely")], &[])
        .await
        .is_err());

    assert_eq!(
        texts_of(&h.store, "doc").await,
        vec!["old one".to_string(), "old two".to_string()]
    );
}

#[tokio::test]
async fn read_path_reports_status_and_folders() {
    let h = harness().await;
    let tree = two_deck_tree();
    tree.put(
        source_file("c", "Broken.pptx", "Neuro", days_ago(1)),
        Some(b"garbage".to_vec()),
    );
    run(&h, &tree, &HashEmbedder::default()).await;

    let status = h.store.status_summary().await.unwrap();
    assert_eq!(status.indexed, 2);
    assert_eq!(status.failed, 1);
    assert!(status.last_ingested_at.is_some());

    assert_eq!(
        h.store.folder_prefixes().await.unwrap(),
        vec!["Neuro", "Paeds", "Paeds/Endocrine"]
    );

    let hits = h
        .store
        .search(&[1.0, 0.0, 0.0], 10, Some("Paeds"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.chunk.folder_path == "Paeds/Endocrine"));
    assert!(hits.iter().all(|h| h.chunk.doc_url.ends_with("/a/view")));
}
