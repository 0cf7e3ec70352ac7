//! Splits combined document text into fixed-size, overlapping character windows.
//!
//! Chunk `i` starts at character `i * (size - overlap)`. Windows are counted in
//! `char`s, not bytes, and know nothing about words or sentences.

use thiserror::Error;

/// Default window length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;
/// Default overlap between consecutive windows.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Chunk `text` into windows of at most `size` chars, each sharing `overlap`
/// chars with its predecessor. The last window may be shorter.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Result<Vec<String>, ChunkError> {
    if size == 0 {
        return Err(ChunkError::ZeroSize);
    }
    if overlap >= size {
        return Err(ChunkError::OverlapTooLarge { size, overlap });
    }
    let stride = size - overlap;

    // Byte offset of every char, plus the end, so windows slice on boundaries.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let len = bounds.len();
    bounds.push(text.len());

    let mut chunks = Vec::with_capacity(len.div_ceil(stride));
    let mut start = 0;
    while start < len {
        let end = (start + size).min(len);
        chunks.push(text[bounds[start]..bounds[end]].to_string());
        start += stride;
    }
    Ok(chunks)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk size must be > 0")]
    ZeroSize,
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}
