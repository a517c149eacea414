//! Shared test doubles and document builders.
#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use drive_rag::drive::FileTreeProvider;
use drive_rag::embedding::EmbeddingProvider;
use drive_rag::extract::{MIME_PDF, MIME_PPTX};
use drive_rag::models::SourceFile;
use drive_rag::ocr::{OcrEngine, OcrError};

pub fn source_file(
    id: &str,
    name: &str,
    folder: &str,
    modified: Option<DateTime<Utc>>,
) -> SourceFile {
    let mime = if name.ends_with(".pdf") {
        MIME_PDF
    } else if name.ends_with(".pptx") {
        MIME_PPTX
    } else {
        "text/plain"
    };
    SourceFile {
        id: id.to_string(),
        name: name.to_string(),
        mime_type: mime.to_string(),
        folder_path: folder.to_string(),
        modified_time: modified,
        url: format!("https://drive.google.com/file/d/{}/view", id),
    }
}

/// In-memory file tree. Entries without bytes fail to download.
#[derive(Default)]
pub struct MemoryTree {
    files: Mutex<Vec<(SourceFile, Option<Vec<u8>>)>>,
    pub fetches: AtomicUsize,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a file.
    pub fn put(&self, file: SourceFile, bytes: Option<Vec<u8>>) {
        let mut files = self.files.lock().unwrap();
        files.retain(|(f, _)| f.id != file.id);
        files.push((file, bytes));
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileTreeProvider for MemoryTree {
    async fn list_files_recursive(&self, _root_id: &str) -> Result<Vec<SourceFile>> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .map(|(f, _)| f.clone())
            .collect())
    }

    async fn fetch(&self, file: &SourceFile) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let files = self.files.lock().unwrap();
        match files.iter().find(|(f, _)| f.id == file.id) {
            Some((_, Some(bytes))) => Ok(bytes.clone()),
            _ => bail!("download of {} failed: connection reset", file.id),
        }
    }
}

/// A tree whose listing always fails.
pub struct BrokenTree;

#[async_trait]
impl FileTreeProvider for BrokenTree {
    async fn list_files_recursive(&self, root_id: &str) -> Result<Vec<SourceFile>> {
        bail!("folder {} not reachable", root_id)
    }

    async fn fetch(&self, _file: &SourceFile) -> Result<Vec<u8>> {
        bail!("unreachable")
    }
}

pub const DIMS: usize = 3;

/// Deterministic 3-dimensional embeddings derived from the text itself.
#[derive(Default)]
pub struct HashEmbedder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let vowels = t.chars().filter(|c| "aeiou".contains(*c)).count();
                vec![1.0, t.chars().count() as f32, vowels as f32]
            })
            .collect())
    }
}

/// OCR double that "reads" a fixed sentence from any image.
pub struct FixedOcr(pub &'static str);

impl OcrEngine for FixedOcr {
    fn recognize(&self, _image: &[u8]) -> Result<String, OcrError> {
        Ok(self.0.to_string())
    }
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::new(width, height);
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}

const SLIDE_NS: &str = "xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\" xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\" xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\"";

fn slide_xml(text: &str, picture: bool) -> String {
    let body = if text.is_empty() {
        String::new()
    } else {
        format!(
            "<p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp>",
            text
        )
    };
    let pic = if picture {
        "<p:pic><p:blipFill><a:blip r:embed=\"rIdImg\"/></p:blipFill></p:pic>"
    } else {
        ""
    };
    format!(
        "<?xml version=\"1.0\"?><p:sld {}><p:cSld><p:spTree>{}{}</p:spTree></p:cSld></p:sld>",
        SLIDE_NS, body, pic
    )
}

/// A PPTX whose slides hold the given texts, one text box each.
pub fn deck(slides: &[&str]) -> Vec<u8> {
    let entries: Vec<(String, Vec<u8>)> = slides
        .iter()
        .enumerate()
        .map(|(i, text)| {
            (
                format!("ppt/slides/slide{}.xml", i + 1),
                slide_xml(text, false).into_bytes(),
            )
        })
        .collect();
    zip_entries(&entries)
}

/// A one-slide PPTX with a short caption and a picture of the given size.
pub fn scanned_deck(caption: &str, image: Vec<u8>) -> Vec<u8> {
    let rels = "<?xml version=\"1.0\"?><Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\"><Relationship Id=\"rIdImg\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/image\" Target=\"../media/image1.png\"/></Relationships>";
    zip_entries(&[
        (
            "ppt/slides/slide1.xml".to_string(),
            slide_xml(caption, true).into_bytes(),
        ),
        (
            "ppt/slides/_rels/slide1.xml.rels".to_string(),
            rels.as_bytes().to_vec(),
        ),
        ("ppt/media/image1.png".to_string(), image),
    ])
}

fn zip_entries(entries: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        for (name, data) in entries {
            zip.start_file(name.as_str(), zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}
