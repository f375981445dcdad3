//! Content chunking for RAG indexing.
//!
//! Documents are split into overlapping word windows. Offsets on the
//! produced [`Chunk`]s are word positions in the source document.

use super::models::Chunk;

/// Default number of words per chunk.
pub const DEFAULT_CHUNK_WORDS: usize = 1000;

/// Default number of words shared between consecutive chunks.
pub const DEFAULT_OVERLAP_WORDS: usize = 200;

/// Split `text` into overlapping word windows.
///
/// Windows hold `chunk_size` words and advance by `chunk_size - overlap`.
/// An overlap at or above the chunk size is clamped so the window always
/// advances by at least one word.
pub fn chunk_words(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        let content = words[start..end].join(" ");
        chunks.push(Chunk::new(chunks.len(), content, start, end));
        start += step;
    }

    chunks
}

/// Build chunk records for texts that were chunked upstream.
///
/// Offsets are contiguous running word positions, as if the texts had been
/// concatenated in order.
pub fn chunks_from_texts<S: AsRef<str>>(texts: &[S]) -> Vec<Chunk> {
    let mut offset = 0;
    texts
        .iter()
        .enumerate()
        .map(|(index, text)| {
            let text = text.as_ref().trim().to_string();
            let words = text.split_whitespace().count();
            let chunk = Chunk::new(index, text, offset, offset + words);
            offset += words;
            chunk
        })
        .collect()
}
