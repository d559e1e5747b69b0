//! Fixed-window text chunker.
//!
//! Splits parsed document text into [`Chunk`]s of at most `chunk_size`
//! characters, with `overlap` characters shared between consecutive chunks.
//! A window that would cut through a word is pulled back to the last
//! whitespace in its second half when one exists.
//!
//! Chunk ids are derived from the document id and ordinal
//! (`{doc_id}::chunk-{n}`), so re-chunking identical text yields identical
//! ids, texts and hashes.

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::error::IndexError;
use crate::models::Chunk;

pub fn validate_params(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(IndexError::config("chunk_size must be > 0").into());
    }
    if overlap >= chunk_size {
        return Err(IndexError::config(format!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        ))
        .into());
    }
    Ok(())
}

pub fn chunk_id(doc_id: &str, ordinal: usize) -> String {
    format!("{}::chunk-{}", doc_id, ordinal)
}

/// Split `text` into overlapping windows.
///
/// Whitespace-only input yields no chunks. Input no longer than `chunk_size`
/// (after trimming) yields exactly one.
pub fn chunk_text(
    doc_id: &str,
    source_path: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    validate_params(chunk_size, overlap)?;

    let lead = text.chars().take_while(|c| c.is_whitespace()).count();
    let chars: Vec<char> = text.trim().chars().collect();
    if chars.is_empty() {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::new();
    if chars.len() <= chunk_size {
        chunks.push(make_chunk(doc_id, source_path, 0, lead, &chars));
        return Ok(chunks);
    }

    let mut start = 0;
    loop {
        let hard_end = (start + chunk_size).min(chars.len());
        let end = if hard_end < chars.len() {
            soft_boundary(&chars, start + chunk_size / 2, hard_end).unwrap_or(hard_end)
        } else {
            hard_end
        };

        let window = &chars[start..end];
        let skip = window.iter().take_while(|c| c.is_whitespace()).count();
        let keep = window.len() - window.iter().rev().take_while(|c| c.is_whitespace()).count();
        if skip < keep {
            chunks.push(make_chunk(
                doc_id,
                source_path,
                chunks.len(),
                lead + start + skip,
                &window[skip..keep],
            ));
        }

        if end == chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    Ok(chunks)
}

/// Position just past the last whitespace in `chars[from..to]`.
fn soft_boundary(chars: &[char], from: usize, to: usize) -> Option<usize> {
    (from..to).rev().find(|&i| chars[i].is_whitespace()).map(|i| i + 1)
}

fn make_chunk(doc_id: &str, source_path: &str, ordinal: usize, offset: usize, text: &[char]) -> Chunk {
    let text: String = text.iter().collect();
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        chunk_id: chunk_id(doc_id, ordinal),
        doc_id: doc_id.to_string(),
        source_path: source_path.to_string(),
        text,
        ordinal,
        offset,
        hash,
    }
}
