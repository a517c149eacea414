//! Staleness decisions for candidate files.
//!
//! A file is re-processed when it is new, moved, re-dated, or its bytes
//! changed. The recency window lets a run skip old files cheaply, but only
//! when the stored copy is known-good.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use crate::models::{DocumentRecord, DocumentStatus};

/// Lowercase hex SHA-256 of raw file bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Decide whether a candidate must be (re)ingested.
///
/// Checked in order: force or no prior record, folder moved, modification
/// time changed (including a value appearing or disappearing), content hash
/// changed.
pub fn should_ingest(
    existing: Option<&DocumentRecord>,
    modified_time: Option<DateTime<Utc>>,
    folder_path: &str,
    content_hash: &str,
    force_all: bool,
) -> bool {
    let existing = match existing {
        Some(e) if !force_all => e,
        _ => return true,
    };
    if existing.folder_path != folder_path {
        return true;
    }
    if truncate_secs(existing.modified_time) != truncate_secs(modified_time) {
        return true;
    }
    existing.content_hash != content_hash
}

/// Recency shortcut: skip a file last modified before the lookback window
/// when the stored record is `indexed` with the same hash.
///
/// A `failed` record never qualifies, so documents that were never
/// indexed successfully are retried on every run. Files without a
/// modification time are never treated as old.
pub fn is_stale_unchanged(
    existing: Option<&DocumentRecord>,
    modified_time: Option<DateTime<Utc>>,
    content_hash: &str,
    cutoff: DateTime<Utc>,
) -> bool {
    let Some(modified) = modified_time else {
        return false;
    };
    if modified >= cutoff {
        return false;
    }
    matches!(
        existing,
        Some(record) if record.status == DocumentStatus::Indexed && record.content_hash == content_hash
    )
}

/// Start of the recency window: `now - since_days`, saturating at the
/// earliest representable time.
pub fn recency_cutoff(now: DateTime<Utc>, since_days: u32) -> DateTime<Utc> {
    Duration::try_days(i64::from(since_days))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

// The store keeps whole seconds.
fn truncate_secs(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp())
}
