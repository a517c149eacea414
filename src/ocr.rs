//! OCR and page rasterisation backends.
//!
//! OCR is a black box behind [`OcrEngine`]: bytes of an encoded image in,
//! recognised text out. PDF pages reach it through a [`PageRenderer`]: a
//! document is opened once into a [`RenderSession`], which then rasterises
//! pages to PNG one at a time. The default implementations shell out to
//! `tesseract` and `pdftoppm`; tests substitute in-process fakes.
//!
//! [`ImageGate`] is the quality gate applied before any OCR call: images
//! smaller than the configured width and height are too small to hold
//! scanned text and are rejected without being recognised.

use std::io::Cursor;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ExtractionConfig;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("{tool} not found on PATH")]
    ToolNotFound { tool: String },

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Recognises text in an encoded raster image.
pub trait OcrEngine: Send + Sync {
    /// Returns recognised text, trimmed. Empty when nothing was found.
    fn recognize(&self, image: &[u8]) -> Result<String, OcrError>;
}

/// Prepares PDF documents for page rasterisation.
pub trait PageRenderer: Send + Sync {
    /// Called at most once per document, and only when a page needs OCR.
    fn open(&self, pdf: &[u8]) -> Result<Box<dyn RenderSession>, OcrError>;
}

/// One opened PDF.
pub trait RenderSession {
    /// `page` is 1-based. An empty result means "no image".
    fn render_page(&self, page: u32) -> Result<Vec<u8>, OcrError>;
}

/// Minimum image dimensions worth sending to OCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageGate {
    pub min_width: u32,
    pub min_height: u32,
}

impl ImageGate {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            min_width: config.ocr_min_width,
            min_height: config.ocr_min_height,
        }
    }

    /// True when the image is at least `min_width` x `min_height`.
    /// Undecodable bytes never pass.
    pub fn accepts(&self, image: &[u8]) -> bool {
        match image_dimensions(image) {
            Some((w, h)) => w >= self.min_width && h >= self.min_height,
            None => false,
        }
    }
}

/// Width and height read from the image header, without decoding pixels.
pub fn image_dimensions(image: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(image))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

// ============ Tesseract ============

/// OCR through the `tesseract` command-line tool.
pub struct TesseractOcr {
    command: String,
}

impl TesseractOcr {
    /// Fails when the binary cannot be located.
    pub fn new(command: &str) -> Result<Self, OcrError> {
        which::which(command).map_err(|_| OcrError::ToolNotFound {
            tool: command.to_string(),
        })?;
        Ok(Self {
            command: command.to_string(),
        })
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
        let input = tempfile::NamedTempFile::new()?;
        std::fs::write(input.path(), image)?;

        debug!("Running OCR on {} bytes", image.len());

        let output = Command::new(&self.command)
            .arg(input.path())
            .arg("stdout")
            .args(["--oem", "3"])
            .args(["--psm", "1"])
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Tesseract reports warnings on stderr but may still succeed.
            if output.stdout.is_empty() {
                return Err(OcrError::ToolFailed {
                    tool: self.command.clone(),
                    message: stderr.trim().to_string(),
                });
            }
            debug!("tesseract warning: {}", stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Used when OCR is disabled or unavailable: never recognises anything.
pub struct NoOcr;

impl OcrEngine for NoOcr {
    fn recognize(&self, _image: &[u8]) -> Result<String, OcrError> {
        Ok(String::new())
    }
}

/// Pick the OCR engine for this run. Falls back to [`NoOcr`] with a
/// warning when the configured tool is missing.
pub fn create_ocr_engine(config: &ExtractionConfig) -> Arc<dyn OcrEngine> {
    if !config.ocr_enabled {
        return Arc::new(NoOcr);
    }
    match TesseractOcr::new(&config.ocr_command) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            warn!("OCR disabled for this run: {}", e);
            Arc::new(NoOcr)
        }
    }
}

// ============ pdftoppm ============

/// Page rasterisation through poppler's `pdftoppm`.
pub struct PdftoppmRenderer {
    command: String,
    dpi: u32,
}

impl PdftoppmRenderer {
    pub fn new(command: &str, dpi: u32) -> Self {
        Self {
            command: command.to_string(),
            dpi,
        }
    }
}

impl PdftoppmRenderer {
    fn prepare(&self, pdf: &[u8]) -> Result<PdftoppmSession, OcrError> {
        let workdir = tempfile::TempDir::new()?;
        let input = workdir.path().join("input.pdf");
        std::fs::write(&input, pdf)?;
        debug!("Prepared {} byte PDF for rendering", pdf.len());

        Ok(PdftoppmSession {
            command: self.command.clone(),
            dpi: self.dpi,
            input,
            workdir,
        })
    }
}

impl PageRenderer for PdftoppmRenderer {
    fn open(&self, pdf: &[u8]) -> Result<Box<dyn RenderSession>, OcrError> {
        Ok(Box::new(self.prepare(pdf)?))
    }
}

/// The document is written to `workdir` once; every page renders from it.
struct PdftoppmSession {
    command: String,
    dpi: u32,
    input: PathBuf,
    workdir: tempfile::TempDir,
}

impl RenderSession for PdftoppmSession {
    fn render_page(&self, page: u32) -> Result<Vec<u8>, OcrError> {
        let out_root = self.workdir.path().join(format!("page-{}", page));

        let page_arg = page.to_string();
        let output = Command::new(&self.command)
            .args(["-f", &page_arg, "-l", &page_arg])
            .args(["-r", &self.dpi.to_string()])
            .args(["-png", "-singlefile"])
            .arg(&self.input)
            .arg(&out_root)
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => OcrError::ToolNotFound {
                    tool: self.command.clone(),
                },
                _ => OcrError::Io(e),
            })?;

        if !output.status.success() {
            return Err(OcrError::ToolFailed {
                tool: self.command.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let png_path = out_root.with_extension("png");
        let png = std::fs::read(&png_path)?;
        // Pages are rendered once each; free the space as we go.
        let _ = std::fs::remove_file(&png_path);
        Ok(png)
    }
}

/// Used when PDF pages cannot or need not be rasterised: renders nothing.
pub struct NoRender;

impl PageRenderer for NoRender {
    fn open(&self, _pdf: &[u8]) -> Result<Box<dyn RenderSession>, OcrError> {
        Ok(Box::new(NoRender))
    }
}

impl RenderSession for NoRender {
    fn render_page(&self, _page: u32) -> Result<Vec<u8>, OcrError> {
        Ok(Vec::new())
    }
}

/// Pick the page renderer for this run. Rendering is skipped entirely
/// when OCR is disabled; a missing renderer is warned about once.
pub fn create_page_renderer(config: &ExtractionConfig) -> Arc<dyn PageRenderer> {
    if !config.ocr_enabled {
        return Arc::new(NoRender);
    }
    if which::which(&config.render_command).is_err() {
        warn!(
            "{} not found on PATH; scanned PDF pages will not be OCR'd",
            config.render_command
        );
        return Arc::new(NoRender);
    }
    Arc::new(PdftoppmRenderer::new(
        &config.render_command,
        config.render_dpi,
    ))
}
