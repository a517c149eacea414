//! Per-page and per-slide text extraction with OCR fallback.
//!
//! Every page (PDF) or slide (PPTX) is arbitrated on its own:
//!
//! 1. Non-blank native text at least `text_min_chars` long is used as-is.
//! 2. Otherwise the unit's images are gathered (the rendered page for a
//!    PDF, the embedded pictures for a slide), filtered through the
//!    [`ImageGate`], and recognised by the [`OcrEngine`].
//! 3. Non-empty OCR text wins; failing that, any native text is kept;
//!    failing that, the unit produces nothing.
//!
//! Images are only gathered when step 1 fails, so a text-rich document
//! never touches the renderer or the OCR engine. A render or OCR error on
//! one unit is logged and treated as "no OCR text"; only a document that
//! cannot be parsed at all is an [`ExtractError`].

use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use quick_xml::events::Event;
use thiserror::Error;
use tracing::warn;

use crate::config::ExtractionConfig;
use crate::models::{ExtractedUnit, SourceType, TextOrigin};
use crate::ocr::{ImageGate, OcrEngine, PageRenderer, RenderSession};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_ZIP_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const SLIDE_PREFIX: &str = "ppt/slides/slide";
const PRESENTATION_PART: &str = "ppt/presentation.xml";
const PRESENTATION_RELS: &str = "ppt/_rels/presentation.xml.rels";
const REL_TYPE_IMAGE: &str = "/image";
const REL_TYPE_SLIDE: &str = "/slide";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("PPTX extraction failed: {0}")]
    Pptx(String),
}

/// True for the MIME types [`Extractor::extract`] understands.
pub fn is_supported(mime_type: &str) -> bool {
    matches!(mime_type, MIME_PDF | MIME_PPTX)
}

/// Thresholds for the native-text vs. OCR decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionSettings {
    pub text_min_chars: usize,
    pub gate: ImageGate,
}

impl ExtractionSettings {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            text_min_chars: config.text_min_chars,
            gate: ImageGate::from_config(config),
        }
    }
}

/// Units of one document plus how many of them came from OCR.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub units: Vec<ExtractedUnit>,
    pub ocr_pages: u64,
}

impl Extraction {
    fn push(&mut self, unit: Option<ExtractedUnit>) {
        if let Some(unit) = unit {
            if unit.origin == TextOrigin::Ocr {
                self.ocr_pages += 1;
            }
            self.units.push(unit);
        }
    }
}

/// Decide the text of a single page or slide.
///
/// `images` is only called when the native text is below the threshold.
pub fn arbitrate_unit<F>(
    source_type: SourceType,
    position: u32,
    native_text: &str,
    images: F,
    settings: &ExtractionSettings,
    ocr: &dyn OcrEngine,
) -> Option<ExtractedUnit>
where
    F: FnOnce() -> Vec<Vec<u8>>,
{
    let native = native_text.trim();
    let unit = |text: String, origin: TextOrigin| ExtractedUnit {
        source_type,
        position,
        text,
        origin,
    };

    if !native.is_empty() && native.chars().count() >= settings.text_min_chars {
        return Some(unit(native.to_string(), TextOrigin::Native));
    }

    let fragments: Vec<String> = images()
        .iter()
        .filter(|img| settings.gate.accepts(img))
        .filter_map(|img| match ocr.recognize(img) {
            Ok(text) => Some(text.trim().to_string()),
            Err(e) => {
                warn!("OCR failed on {} {}: {}", source_type.as_str(), position, e);
                None
            }
        })
        .filter(|text| !text.is_empty())
        .collect();

    if !fragments.is_empty() {
        return Some(unit(fragments.join("\n"), TextOrigin::Ocr));
    }

    if !native.is_empty() {
        return Some(unit(native.to_string(), TextOrigin::Native));
    }

    None
}

/// Document-level extraction over the supported formats.
///
/// Cheap to clone, so a copy can be moved onto a blocking thread.
#[derive(Clone)]
pub struct Extractor {
    settings: ExtractionSettings,
    ocr: Arc<dyn OcrEngine>,
    renderer: Arc<dyn PageRenderer>,
}

impl Extractor {
    pub fn new(
        settings: ExtractionSettings,
        ocr: Arc<dyn OcrEngine>,
        renderer: Arc<dyn PageRenderer>,
    ) -> Self {
        Self {
            settings,
            ocr,
            renderer,
        }
    }

    pub fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<Extraction, ExtractError> {
        match mime_type {
            MIME_PDF => self.extract_pdf(bytes),
            MIME_PPTX => self.extract_pptx(bytes),
            _ => Err(ExtractError::UnsupportedContentType(mime_type.to_string())),
        }
    }

    fn extract_pdf(&self, bytes: &[u8]) -> Result<Extraction, ExtractError> {
        let pages = pdf_pages(bytes)?;
        let mut out = Extraction::default();
        let mut render = LazyRender {
            renderer: self.renderer.as_ref(),
            pdf: bytes,
            session: None,
        };

        for (idx, native) in pages.iter().enumerate() {
            let position = idx as u32 + 1;
            let unit = arbitrate_unit(
                SourceType::Page,
                position,
                native,
                || render.page_images(position),
                &self.settings,
                self.ocr.as_ref(),
            );
            out.push(unit);
        }

        Ok(out)
    }

    fn extract_pptx(&self, bytes: &[u8]) -> Result<Extraction, ExtractError> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| ExtractError::Pptx(e.to_string()))?;
        let slide_names = list_slide_names(&mut archive)?;
        let mut out = Extraction::default();

        for (idx, name) in slide_names.iter().enumerate() {
            let xml = read_zip_entry_bounded(&mut archive, name, MAX_ZIP_ENTRY_BYTES)?;
            let native = slide_native_text(&xml)?;
            let unit = arbitrate_unit(
                SourceType::Slide,
                idx as u32 + 1,
                &native,
                || match slide_images(&mut archive, name, &xml) {
                    Ok(images) => images,
                    Err(e) => {
                        warn!("could not read images of {}: {}", name, e);
                        Vec::new()
                    }
                },
                &self.settings,
                self.ocr.as_ref(),
            );
            out.push(unit);
        }

        Ok(out)
    }
}

// ============ PDF ============

/// Opens the document for rendering on the first sparse page, so a
/// text-rich PDF never reaches the renderer.
struct LazyRender<'r> {
    renderer: &'r dyn PageRenderer,
    pdf: &'r [u8],
    session: Option<Option<Box<dyn RenderSession>>>,
}

impl LazyRender<'_> {
    fn page_images(&mut self, page: u32) -> Vec<Vec<u8>> {
        let (renderer, pdf) = (self.renderer, self.pdf);
        let session = self.session.get_or_insert_with(|| match renderer.open(pdf) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("could not prepare PDF for OCR rendering: {}", e);
                None
            }
        });
        let Some(session) = session else {
            return Vec::new();
        };

        match session.render_page(page) {
            Ok(png) if png.is_empty() => Vec::new(),
            Ok(png) => vec![png],
            Err(e) => {
                warn!("could not render page {} for OCR: {}", page, e);
                Vec::new()
            }
        }
    }
}

fn pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    // pdf-extract panics on some malformed inputs instead of returning an error.
    match catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    })) {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("parser panicked on malformed input".to_string())),
    }
}

// ============ PPTX ============

type Archive<'b> = zip::ZipArchive<std::io::Cursor<&'b [u8]>>;

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Pptx(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Pptx(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Pptx(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn has_entry(archive: &Archive<'_>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

/// Slide parts in presentation order.
///
/// The order comes from `p:sldIdLst` in `ppt/presentation.xml`. A package
/// without that part or its relationships falls back to `slideN.xml`
/// number order.
fn list_slide_names(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    if has_entry(archive, PRESENTATION_PART) && has_entry(archive, PRESENTATION_RELS) {
        let presentation = read_zip_entry_bounded(archive, PRESENTATION_PART, MAX_ZIP_ENTRY_BYTES)?;
        let rels_xml = read_zip_entry_bounded(archive, PRESENTATION_RELS, MAX_ZIP_ENTRY_BYTES)?;
        let rels = relationships(&rels_xml)?;

        let names = slide_list_rel_ids(&presentation)?
            .iter()
            .filter_map(|id| {
                rels.iter()
                    .find(|r| &r.id == id && r.is_internal(REL_TYPE_SLIDE))
            })
            .map(|r| resolve_part_path("ppt", &r.target))
            .filter(|part| has_entry(archive, part))
            .collect();
        return Ok(names);
    }

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(SLIDE_PREFIX) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| slide_number(name).unwrap_or(u32::MAX));
    Ok(names)
}

/// `r:id` of every `p:sldId` in document order.
fn slide_list_rel_ids(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut ids = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sldId" => {
                // `id` is the numeric slide id; the relationship id is the prefixed `r:id`.
                let rel_id = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.prefix().is_some() && a.key.local_name().as_ref() == b"id")
                    .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()));
                ids.extend(rel_id);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Pptx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(ids)
}

fn slide_number(name: &str) -> Option<u32> {
    name.strip_prefix(SLIDE_PREFIX)?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

/// Text runs of a slide, one line per paragraph, blank lines dropped.
fn slide_native_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => flush(&mut current, &mut lines),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"br" => {
                flush(&mut current, &mut lines)
            }
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Pptx(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Pptx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    flush(&mut current, &mut lines);

    Ok(lines.join("\n"))
}

fn flush(current: &mut String, lines: &mut Vec<String>) {
    let line = current.trim();
    if !line.is_empty() {
        lines.push(line.to_string());
    }
    current.clear();
}

/// Bytes of every picture placed on the slide.
fn slide_images(
    archive: &mut Archive<'_>,
    slide_name: &str,
    slide_xml: &[u8],
) -> Result<Vec<Vec<u8>>, ExtractError> {
    let rel_ids = picture_rel_ids(slide_xml)?;
    if rel_ids.is_empty() {
        return Ok(Vec::new());
    }

    let (dir, file) = slide_name.rsplit_once('/').unwrap_or(("", slide_name));
    let rels_name = format!("{}/_rels/{}.rels", dir, file);
    if archive.by_name(&rels_name).is_err() {
        return Ok(Vec::new());
    }
    let rels_xml = read_zip_entry_bounded(archive, &rels_name, MAX_ZIP_ENTRY_BYTES)?;
    let rels = relationships(&rels_xml)?;

    let mut images = Vec::new();
    for id in rel_ids {
        let Some(rel) = rels
            .iter()
            .find(|r| r.id == id && r.is_internal(REL_TYPE_IMAGE))
        else {
            continue;
        };
        let part = resolve_part_path(dir, &rel.target);
        images.push(read_zip_entry_bounded(archive, &part, MAX_ZIP_ENTRY_BYTES)?);
    }
    Ok(images)
}

/// `r:embed` ids of `a:blip` elements inside `p:pic` shapes.
fn picture_rel_ids(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut ids = Vec::new();
    let mut pic_depth = 0usize;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"pic" => pic_depth += 1,
                b"blip" if pic_depth > 0 => ids.extend(attr_value(&e, b"embed")),
                _ => {}
            },
            Ok(Event::Empty(e)) if pic_depth > 0 && e.local_name().as_ref() == b"blip" => {
                ids.extend(attr_value(&e, b"embed"))
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"pic" => {
                pic_depth = pic_depth.saturating_sub(1)
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Pptx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(ids)
}

/// One `Relationship` entry of a `.rels` part.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Relationship {
    id: String,
    rel_type: String,
    target: String,
    external: bool,
}

impl Relationship {
    /// In-package target whose type URI ends with `type_suffix`.
    fn is_internal(&self, type_suffix: &str) -> bool {
        !self.external && self.rel_type.ends_with(type_suffix)
    }
}

fn relationships(xml: &[u8]) -> Result<Vec<Relationship>, ExtractError> {
    let mut rels = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attr_value(&e, b"Id"), attr_value(&e, b"Target")) {
                    rels.push(Relationship {
                        id,
                        rel_type: attr_value(&e, b"Type").unwrap_or_default(),
                        target,
                        external: attr_value(&e, b"TargetMode").as_deref() == Some("External"),
                    });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Pptx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Resolve a relationship target against the directory of its source part.
fn resolve_part_path(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}
