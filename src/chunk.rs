//! Fixed-size sliding-window text chunker.
//!
//! Splits document body text into [`Chunk`]s of at most `chunk_size`
//! characters, where consecutive chunks from the same document share exactly
//! `overlap` characters. Window boundaries are character offsets, so the
//! overlap equality holds for multi-byte text as well.
//!
//! Each chunk receives a UUID plus a SHA-256 hash of its text for staleness
//! detection on re-ingest.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Split text into overlapping windows of at most `chunk_size` characters.
///
/// Consecutive chunks advance by `chunk_size - overlap` characters, so the
/// trailing `overlap` characters of one chunk equal the leading `overlap`
/// characters of the next. Whitespace-only input produces no chunks.
/// Indices are contiguous starting at 0.
pub fn chunk_text(document_id: &str, text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() <= chunk_size {
        return vec![make_chunk(document_id, 0, trimmed)];
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index: i64 = 0;

    loop {
        let end = (start + chunk_size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        chunks.push(make_chunk(document_id, index, &piece));
        index += 1;

        if end == chars.len() {
            break;
        }
        start += step;
    }

    chunks
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
