//! Core data models used throughout drive-rag.
//!
//! These types represent the source files, document records, extracted
//! units, and chunks that flow through the ingestion pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

/// A leaf file produced by a file-tree provider.
///
/// Produced fresh on every enumeration pass. The bytes themselves are
/// fetched separately through the provider so that a download failure
/// only affects this file.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Stable identity from the source tree.
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// Folder names from the root, joined by `/`. Empty at the root.
    pub folder_path: String,
    pub modified_time: Option<DateTime<Utc>>,
    /// Canonical URL used for citations.
    pub url: String,
}

/// Outcome of the last ingestion attempt for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Indexed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "indexed" => Ok(DocumentStatus::Indexed),
            "failed" => Ok(DocumentStatus::Failed),
            other => anyhow::bail!("unknown document status: '{}'", other),
        }
    }
}

/// Persisted per-document state, keyed by [`SourceFile::id`].
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub folder_path: String,
    pub modified_time: Option<DateTime<Utc>>,
    /// Lowercase hex SHA-256 of the raw file bytes.
    pub content_hash: String,
    pub status: DocumentStatus,
    pub last_ingested_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl DocumentRecord {
    /// Build the record for an ingestion attempt on `file`.
    pub fn for_attempt(
        file: &SourceFile,
        content_hash: &str,
        status: DocumentStatus,
        error: Option<String>,
    ) -> Self {
        Self {
            id: file.id.clone(),
            name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            folder_path: file.folder_path.clone(),
            modified_time: file.modified_time,
            content_hash: content_hash.to_string(),
            status,
            last_ingested_at: Utc::now(),
            error,
        }
    }
}

/// Where in the document a unit of text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Page,
    Slide,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Page => "page",
            SourceType::Slide => "slide",
        }
    }
}

impl FromStr for SourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "page" => Ok(SourceType::Page),
            "slide" => Ok(SourceType::Slide),
            other => anyhow::bail!("unknown source type: '{}'", other),
        }
    }
}

/// How a unit's text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOrigin {
    Native,
    Ocr,
}

impl TextOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextOrigin::Native => "native",
            TextOrigin::Ocr => "ocr",
        }
    }
}

impl FromStr for TextOrigin {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(TextOrigin::Native),
            "ocr" => Ok(TextOrigin::Ocr),
            other => anyhow::bail!("unknown text origin: '{}'", other),
        }
    }
}

/// Text of one page or slide. `text` is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedUnit {
    pub source_type: SourceType,
    /// 1-based position within the document.
    pub position: u32,
    pub text: String,
    pub origin: TextOrigin,
}

/// A chunk ready to be embedded and stored.
///
/// Carries the owning document's metadata so the read path never joins
/// against `documents`. The surrogate id is assigned at insert time.
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    pub document_id: String,
    pub doc_title: String,
    pub folder_path: String,
    pub doc_modified_time: Option<DateTime<Utc>>,
    pub doc_url: String,
    pub source_type: SourceType,
    pub position: u32,
    pub origin: TextOrigin,
    pub text: String,
}

/// A chunk read back from the store.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub doc_title: String,
    pub folder_path: String,
    pub doc_modified_time: Option<DateTime<Utc>>,
    pub doc_url: String,
    pub source_type: SourceType,
    pub position: u32,
    pub origin: TextOrigin,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Counters accumulated over one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub scanned: u64,
    pub ingested: u64,
    pub skipped: u64,
    pub failed: u64,
    pub chunks_inserted: u64,
    pub ocr_pages: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned={} ingested={} skipped={} failed={} chunks_inserted={} ocr_pages={}",
            self.scanned,
            self.ingested,
            self.skipped,
            self.failed,
            self.chunks_inserted,
            self.ocr_pages
        )
    }
}

/// A scored chunk returned from the read path.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub score: f32,
    pub chunk: ChunkRecord,
}
