//! Sliding-window text segmentation.
//!
//! The window is measured in characters. Each chunk covers
//! `[cursor, cursor + chunk_size)`; the cursor advances by
//! `chunk_size - overlap_size` until a window reaches the end of the text.

use docrag_core::{ChunkingConfig, ChunkingConfigError, DocumentId};

/// A segment of document text, not yet embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Owning document
    pub document_id: DocumentId,
    /// Position within the document (0-based)
    pub chunk_index: usize,
    /// Segment text
    pub content: String,
    /// Character offset of the first character
    pub start_offset: usize,
    /// Character offset one past the last character
    pub end_offset: usize,
    /// Estimated token count
    pub token_count: usize,
}

/// Splits text into overlapping, bounded-size segments.
#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    config: ChunkingConfig,
}

impl TextChunker {
    /// Create a chunker; invalid size/overlap is rejected here, not per call.
    pub fn new(config: ChunkingConfig) -> Result<Self, ChunkingConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Split `content` into ordered chunks.
    ///
    /// Empty or whitespace-only content yields no chunks.
    pub fn chunk(&self, content: &str, document_id: DocumentId) -> Vec<TextChunk> {
        if content.trim().is_empty() {
            return Vec::new();
        }

        // Byte position of every character boundary, including the end.
        let boundaries: Vec<usize> = content
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(content.len()))
            .collect();
        let total = boundaries.len() - 1;
        let stride = self.config.stride();

        let mut chunks = Vec::with_capacity(total / stride + 1);
        let mut cursor = 0;
        loop {
            let end = (cursor + self.config.chunk_size).min(total);
            let text = &content[boundaries[cursor]..boundaries[end]];
            chunks.push(TextChunk {
                document_id,
                chunk_index: chunks.len(),
                content: text.to_string(),
                start_offset: cursor,
                end_offset: end,
                token_count: estimate_tokens(text),
            });

            if end == total {
                break;
            }
            cursor += stride;
        }

        chunks
    }
}

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
