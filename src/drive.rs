//! File-tree providers: where documents come from.
//!
//! A [`FileTreeProvider`] lists every leaf file under a root folder,
//! depth-first, with its folder path already resolved, and fetches the
//! bytes of one file on demand. Listing failures abort the run; a failed
//! fetch only fails that file.
//!
//! | Provider | `[source] provider` | Root identity |
//! |----------|---------------------|---------------|
//! | [`DriveWebProvider`] | `drive` | Public Google Drive folder id |
//! | [`LocalTreeProvider`] | `local` | Sub-directory of `source.root` (empty = the root) |
//!
//! The Drive provider reads the folder listing embedded in the public
//! folder web page, so it needs no API credentials. Downloads are cached
//! under `source.cache_dir`, keyed by file id and modification time.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::{Config, SourceConfig};
use crate::extract::{MIME_PDF, MIME_PPTX};
use crate::models::SourceFile;

pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

const DRIVE_FOLDER_URL: &str = "https://drive.google.com/drive/folders";
const DRIVE_DOWNLOAD_URL: &str = "https://drive.google.com/uc";

/// Source of the document tree.
#[async_trait]
pub trait FileTreeProvider: Send + Sync {
    /// Every leaf file under `root_id`, depth-first. Folder nodes are not
    /// returned themselves.
    async fn list_files_recursive(&self, root_id: &str) -> Result<Vec<SourceFile>>;

    /// Raw bytes of `file`.
    async fn fetch(&self, file: &SourceFile) -> Result<Vec<u8>>;
}

/// Build the provider selected by `[source] provider`.
pub fn create_provider(config: &SourceConfig) -> Result<Box<dyn FileTreeProvider>> {
    match config.provider.as_str() {
        "drive" => Ok(Box::new(DriveWebProvider::new(config)?)),
        "local" => {
            let root = config
                .root
                .clone()
                .ok_or_else(|| anyhow::anyhow!("source.root required for local provider"))?;
            Ok(Box::new(LocalTreeProvider::new(root)))
        }
        other => bail!("Unknown source provider: {}", other),
    }
}

/// Root identity for this run.
///
/// Drive requires `ingest.root_id`; the local provider defaults to the
/// whole of `source.root`.
pub fn resolve_root_id(config: &Config) -> Result<String> {
    match (&config.ingest.root_id, config.source.provider.as_str()) {
        (Some(id), _) => Ok(id.clone()),
        (None, "local") => Ok(String::new()),
        (None, _) => bail!("No root folder: set [ingest] root_id or DRIVE_ROOT_ID"),
    }
}

// ============ Google Drive (public folder) ============

/// A node in a Drive folder listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveNode {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub modified_time: Option<DateTime<Utc>>,
}

impl DriveNode {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }
}

pub struct DriveWebProvider {
    client: reqwest::Client,
    cache_dir: PathBuf,
    folder_url: String,
    download_url: String,
    listing_re: Regex,
}

impl DriveWebProvider {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            cache_dir: config.cache_dir.clone(),
            folder_url: DRIVE_FOLDER_URL.to_string(),
            download_url: DRIVE_DOWNLOAD_URL.to_string(),
            listing_re: listing_regex()?,
        })
    }

    async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveNode>> {
        let url = format!("{}/{}", self.folder_url, folder_id);
        let html = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("Failed to list Drive folder {}", folder_id))?
            .text()
            .await?;

        let nodes = parse_folder_page(&self.listing_re, &html)
            .with_context(|| format!("Malformed listing for Drive folder {}", folder_id))?;
        if nodes.is_empty() {
            warn!("Drive folder {} listed no entries", folder_id);
        }
        Ok(nodes)
    }

    fn walk<'a>(
        &'a self,
        folder_id: &'a str,
        path_parts: Vec<String>,
        out: &'a mut Vec<SourceFile>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            for node in self.list_folder(folder_id).await? {
                if node.is_folder() {
                    let mut child = path_parts.clone();
                    child.push(node.name.clone());
                    self.walk(&node.id, child, out).await?;
                    continue;
                }
                out.push(SourceFile {
                    url: format!("https://drive.google.com/file/d/{}/view", node.id),
                    folder_path: path_parts.join("/"),
                    id: node.id,
                    name: node.name,
                    mime_type: node.mime_type,
                    modified_time: node.modified_time,
                });
            }
            Ok(())
        })
    }
}

#[async_trait]
impl FileTreeProvider for DriveWebProvider {
    async fn list_files_recursive(&self, root_id: &str) -> Result<Vec<SourceFile>> {
        let mut files = Vec::new();
        self.walk(root_id, Vec::new(), &mut files).await?;
        Ok(files)
    }

    async fn fetch(&self, file: &SourceFile) -> Result<Vec<u8>> {
        let cached = self.cache_dir.join(cache_file_name(file));

        // Undated files cannot be validated against the cache.
        if file.modified_time.is_some() && cached.is_file() {
            debug!("Using cached download {}", cached.display());
            return Ok(std::fs::read(&cached)?);
        }

        let bytes = self
            .client
            .get(&self.download_url)
            .query(&[("export", "download"), ("id", file.id.as_str())])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("Failed to download {}", file.name))?
            .bytes()
            .await?;

        std::fs::create_dir_all(&self.cache_dir)?;
        let partial = cached.with_extension("part");
        std::fs::write(&partial, &bytes)?;
        std::fs::rename(&partial, &cached)?;

        Ok(bytes.to_vec())
    }
}

fn listing_regex() -> Result<Regex, regex::Error> {
    Regex::new(r"window\['_DRIVE_ivd'\] = '([^']+)'")
}

/// Extract folder entries from a public Drive folder page.
///
/// A page without the embedded listing yields no entries.
pub fn parse_folder_page(listing_re: &Regex, html: &str) -> Result<Vec<DriveNode>> {
    let Some(caps) = listing_re.captures(html) else {
        return Ok(Vec::new());
    };
    let decoded = decode_js_escapes(&caps[1]);
    let payload: serde_json::Value = serde_json::from_str(&decoded)?;

    let entries = payload
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("listing payload is not an array"))?;

    let nodes = entries
        .iter()
        .filter_map(|entry| {
            let fields = entry.as_array().filter(|f| f.len() >= 4)?;
            let text = |i: usize| fields[i].as_str().filter(|s| !s.is_empty());
            Some(DriveNode {
                id: text(0)?.to_string(),
                name: text(2)?.to_string(),
                mime_type: text(3)?.to_string(),
                modified_time: fields.get(9).and_then(parse_modified),
            })
        })
        .collect();
    Ok(nodes)
}

/// Modification time as an RFC 3339 string or epoch milliseconds.
fn parse_modified(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

/// Undo JavaScript string-literal escaping (`\xNN`, `\uNNNN`, `\n`, ...).
pub fn decode_js_escapes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    let mut pending_high: Option<u16> = None;

    while let Some(c) = chars.next() {
        if c != '\\' {
            flush_surrogate(&mut out, &mut pending_high);
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('x') => {
                flush_surrogate(&mut out, &mut pending_high);
                let hex: String = chars.by_ref().take(2).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(b) => out.push(char::from(b)),
                    Err(_) => {
                        out.push_str("\\x");
                        out.push_str(&hex);
                    }
                }
            }
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let Ok(unit) = u16::from_str_radix(&hex, 16) else {
                    flush_surrogate(&mut out, &mut pending_high);
                    out.push_str("\\u");
                    out.push_str(&hex);
                    continue;
                };
                match (pending_high.take(), unit) {
                    (Some(high), 0xDC00..=0xDFFF) => {
                        let combined = char::decode_utf16([high, unit])
                            .next()
                            .and_then(|r| r.ok())
                            .unwrap_or(char::REPLACEMENT_CHARACTER);
                        out.push(combined);
                    }
                    (prev, 0xD800..=0xDBFF) => {
                        if prev.is_some() {
                            out.push(char::REPLACEMENT_CHARACTER);
                        }
                        pending_high = Some(unit);
                    }
                    (prev, _) => {
                        if prev.is_some() {
                            out.push(char::REPLACEMENT_CHARACTER);
                        }
                        out.push(char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER));
                    }
                }
            }
            Some(other) => {
                flush_surrogate(&mut out, &mut pending_high);
                out.push(match other {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    'b' => '\u{8}',
                    'f' => '\u{c}',
                    '0' => '\0',
                    c => c,
                });
            }
            None => {
                flush_surrogate(&mut out, &mut pending_high);
                out.push('\\');
            }
        }
    }
    flush_surrogate(&mut out, &mut pending_high);
    out
}

fn flush_surrogate(out: &mut String, pending_high: &mut Option<u16>) {
    if pending_high.take().is_some() {
        out.push(char::REPLACEMENT_CHARACTER);
    }
}

/// `{id}-{mtime}{ext}` for dated files, `{id}{ext}` otherwise.
fn cache_file_name(file: &SourceFile) -> String {
    let id = sanitize(&file.id);
    let ext = Path::new(&file.name)
        .extension()
        .map(|e| format!(".{}", sanitize(&e.to_string_lossy())))
        .unwrap_or_default();
    match file.modified_time {
        Some(t) => format!("{}-{}{}", id, t.timestamp(), ext),
        None => format!("{}{}", id, ext),
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ============ Local directory tree ============

/// Walks a directory on disk. File identity is the `/`-joined path
/// relative to the provider root.
pub struct LocalTreeProvider {
    root: PathBuf,
}

impl LocalTreeProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileTreeProvider for LocalTreeProvider {
    async fn list_files_recursive(&self, root_id: &str) -> Result<Vec<SourceFile>> {
        let start = self.root.join(root_id);
        if !start.is_dir() {
            bail!("Source root does not exist: {}", start.display());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&start).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            files.push(local_source_file(&self.root, entry.path())?);
        }
        Ok(files)
    }

    async fn fetch(&self, file: &SourceFile) -> Result<Vec<u8>> {
        let path = self.root.join(&file.id);
        std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))
    }
}

fn local_source_file(root: &Path, path: &Path) -> Result<SourceFile> {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    let (name, folders) = parts
        .split_last()
        .ok_or_else(|| anyhow::anyhow!("empty path under {}", root.display()))?;

    let modified = std::fs::metadata(path)?
        .modified()
        .ok()
        .map(DateTime::<Utc>::from);
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

    Ok(SourceFile {
        id: parts.join("/"),
        name: name.clone(),
        mime_type: mime_from_extension(path).to_string(),
        folder_path: folders.join("/"),
        modified_time: modified,
        url: format!("file://{}", absolute.display()),
    })
}

fn mime_from_extension(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => MIME_PDF,
        "pptx" => MIME_PPTX,
        _ => "application/octet-stream",
    }
}
