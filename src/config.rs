use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

/// Thresholds for the native-text vs. OCR decision.
#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Native text at least this long (in chars) is used without OCR.
    #[serde(default = "default_text_min_chars")]
    pub text_min_chars: usize,
    #[serde(default = "default_ocr_min_width")]
    pub ocr_min_width: u32,
    #[serde(default = "default_ocr_min_height")]
    pub ocr_min_height: u32,
    /// Rasterisation resolution for PDF pages sent to OCR (144 = 2x).
    #[serde(default = "default_render_dpi")]
    pub render_dpi: u32,
    #[serde(default = "default_true")]
    pub ocr_enabled: bool,
    #[serde(default = "default_ocr_command")]
    pub ocr_command: String,
    #[serde(default = "default_render_command")]
    pub render_command: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            text_min_chars: default_text_min_chars(),
            ocr_min_width: default_ocr_min_width(),
            ocr_min_height: default_ocr_min_height(),
            render_dpi: default_render_dpi(),
            ocr_enabled: true,
            ocr_command: default_ocr_command(),
            render_command: default_render_command(),
        }
    }
}

fn default_text_min_chars() -> usize {
    80
}
fn default_ocr_min_width() -> u32 {
    500
}
fn default_ocr_min_height() -> u32 {
    300
}
fn default_render_dpi() -> u32 {
    144
}
fn default_true() -> bool {
    true
}
fn default_ocr_command() -> String {
    "tesseract".to_string()
}
fn default_render_command() -> String {
    "pdftoppm".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Lookback window for the recency shortcut.
    #[serde(default = "default_since_days")]
    pub since_days: u32,
    /// Root folder identity handed to the file-tree provider.
    #[serde(default)]
    pub root_id: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            since_days: default_since_days(),
            root_id: None,
        }
    }
}

fn default_since_days() -> u32 {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// `"drive"` (public Drive folder) or `"local"` (directory tree).
    #[serde(default = "default_source_provider")]
    pub provider: String,
    /// Root directory for the `local` provider.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_source_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            provider: default_source_provider(),
            root: None,
            cache_dir: default_cache_dir(),
            timeout_secs: default_source_timeout_secs(),
        }
    }
}

fn default_source_provider() -> String {
    "drive".to_string()
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cache/drive")
}
fn default_source_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Vector width stored in `chunks.embedding`; 0 when disabled.
    pub fn dims_or_zero(&self) -> usize {
        self.dims.unwrap_or(0)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    6
}

impl Config {
    /// Config with defaults everywhere except the database path.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: path.into(),
                max_connections: default_max_connections(),
            },
            chunking: ChunkingConfig::default(),
            extraction: ExtractionConfig::default(),
            ingest: IngestConfig::default(),
            source: SourceConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }

    /// Check cross-field invariants. Called after CLI overrides as well.
    pub fn validate(&self) -> Result<()> {
        if self.db.path.as_os_str().is_empty() {
            anyhow::bail!("db.path must be set");
        }

        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            anyhow::bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }

        if self.extraction.render_dpi == 0 {
            anyhow::bail!("extraction.render_dpi must be > 0");
        }

        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }

        if self.embedding.is_enabled() {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled or openai.",
                other
            ),
        }

        match self.source.provider.as_str() {
            "drive" => {}
            "local" => {
                if self.source.root.is_none() {
                    anyhow::bail!("source.root must be set when provider is 'local'");
                }
            }
            other => anyhow::bail!(
                "Unknown source provider: '{}'. Must be drive or local.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"data/index.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.extraction.text_min_chars, 80);
        assert_eq!(config.extraction.ocr_min_width, 500);
        assert_eq!(config.extraction.ocr_min_height, 300);
        assert_eq!(config.extraction.render_dpi, 144);
        assert_eq!(config.ingest.since_days, 8);
        assert_eq!(config.source.provider, "drive");
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_missing_db_section_rejected() {
        assert!(parse("[chunking]\nchunk_size = 10\n").is_err());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = parse("[db]\npath = \"x\"\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n")
            .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_openai_requires_model_and_dims() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));

        let ok = parse(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n",
        )
        .unwrap();
        assert_eq!(ok.embedding.dims_or_zero(), 1536);
    }

    #[test]
    fn test_local_source_requires_root() {
        assert!(parse("[db]\npath = \"x\"\n[source]\nprovider = \"local\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[source]\nprovider = \"local\"\nroot = \"docs\"\n").is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\nmodel = \"m\"\ndims = 3\n").is_err());
    }
}
