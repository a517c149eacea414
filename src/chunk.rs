//! Fixed-window text chunker.
//!
//! Splits unit text into windows of at most `chunk_size` characters, each
//! window starting `overlap` characters before the end of the previous one.
//! Lengths are counted in `char`s so a window never cuts a multi-byte
//! character in half.

use crate::models::{ChunkDraft, ExtractedUnit, SourceFile};

/// Split `text` into overlapping windows.
///
/// Text no longer than `chunk_size` comes back as a single chunk. Callers
/// guarantee `chunk_size > 0` and `overlap < chunk_size` (enforced by
/// config validation); an overlap that is too large is clamped so the
/// window always advances.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);

    // Byte offset of every char boundary, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_len = boundaries.len() - 1;

    if char_len <= chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < char_len {
        let end = (start + chunk_size).min(char_len);
        chunks.push(text[boundaries[start]..boundaries[end]].to_string());
        if end == char_len {
            break;
        }
        start = end.saturating_sub(overlap);
    }
    chunks
}

/// Expand a document's units into chunk drafts, unit order then chunk order.
pub fn build_chunks(
    file: &SourceFile,
    units: &[ExtractedUnit],
    chunk_size: usize,
    overlap: usize,
) -> Vec<ChunkDraft> {
    units
        .iter()
        .flat_map(|unit| {
            split_text(&unit.text, chunk_size, overlap)
                .into_iter()
                .map(move |text| ChunkDraft {
                    document_id: file.id.clone(),
                    doc_title: file.name.clone(),
                    folder_path: file.folder_path.clone(),
                    doc_modified_time: file.modified_time,
                    doc_url: file.url.clone(),
                    source_type: unit.source_type,
                    position: unit.position,
                    origin: unit.origin,
                    text,
                })
        })
        .collect()
}
