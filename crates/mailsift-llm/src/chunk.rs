//! Bounded-size text chunking for long inputs.

#[derive(Clone, Debug)]
pub struct ChunkConfig {
    pub max_tokens_per_chunk: usize,
    /// Token overlap between consecutive chunks, so a contact block cut at a
    /// boundary still appears whole in one of the two chunks.
    pub overlap_tokens: usize,
    pub max_chunks_per_text: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: 3000,
            overlap_tokens: 150,
            max_chunks_per_text: 8,
        }
    }
}

/// Estimate token count using chars/4 heuristic.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Split `text` into overlapping chunks of at most `max_tokens_per_chunk`
/// estimated tokens.
///
/// A text within the budget comes back as exactly one chunk. Chunk count
/// never exceeds `max_chunks_per_text`; when the cap is hit the tail is
/// dropped with a warning.
#[must_use]
pub fn split_text(text: &str, config: &ChunkConfig) -> Vec<String> {
    if estimate_tokens(text) <= config.max_tokens_per_chunk {
        return vec![text.to_owned()];
    }

    let chars: Vec<char> = text.chars().collect();
    let chunk_chars = (config.max_tokens_per_chunk * 4).max(1);
    let overlap_chars = (config.overlap_tokens * 4).min(chunk_chars - 1);
    let step = chunk_chars - overlap_chars;
    let cap = config.max_chunks_per_text.max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        if chunks.len() == cap {
            tracing::warn!(
                dropped_chars = chars.len() - start,
                cap,
                "chunk cap reached, dropping text tail"
            );
            break;
        }
        let end = (start + chunk_chars).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}
