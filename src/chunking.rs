//! Chunking utilities for splitting long documents into overlapping segments.
//!
//! Documents longer than the configured chunk size are split into
//! fixed-size character windows that overlap their neighbour by a fixed
//! amount. Each window becomes one [`Chunk`], the unit of embedding and
//! retrieval.
//!
//! Sizes are counted in characters (Unicode scalar values), never bytes, so
//! multi-byte text is never cut inside a character.

use serde::{Deserialize, Serialize};

use crate::{
    document::{Document, Metadata, SourceId},
    error::{Error, Result},
};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// A contiguous slice of a document's text.
///
/// Produced by [`Chunker::split`]. The chunk id is deterministic:
/// `{source_id}:{sequence}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub source_id: SourceId,
    /// Zero-based position of the chunk within its document.
    pub sequence: usize,
    /// Character offset where this chunk starts in the original text.
    pub start_offset: usize,
    pub text: String,
    /// Metadata inherited from the parent document.
    pub metadata: Metadata,
}

/// Build the id of the `sequence`-th chunk of a source.
///
/// # Examples
///
/// ```
/// use ragdigest::{chunking::chunk_id, document::SourceId};
///
/// let source = SourceId::from("abc".to_string());
/// assert_eq!(chunk_id(&source, 2), "abc:2");
/// ```
pub fn chunk_id(source_id: &SourceId, sequence: usize) -> String {
    format!("{source_id}:{sequence}")
}

/// Fixed-window chunking policy.
///
/// # Examples
///
/// ```
/// use ragdigest::chunking::Chunker;
/// use ragdigest::document::{Document, Metadata};
///
/// let chunker = Chunker::new(1000, 200).unwrap();
/// let doc = Document::from_content("a".repeat(2500), Metadata::default());
/// let chunks = chunker.split(&doc);
/// assert_eq!(chunks.len(), 3);
///
/// // Overlap must be smaller than the window
/// assert!(Chunker::new(100, 100).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Chunker {
    /// Create a chunker, rejecting configurations where windows would not
    /// advance.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidConfiguration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(Error::InvalidConfiguration(format!(
                "chunk_overlap ({overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split a document into overlapping chunks.
    ///
    /// Text no longer than the chunk size yields exactly one chunk. The final
    /// chunk may be shorter than the chunk size.
    pub fn split(&self, document: &Document) -> Vec<Chunk> {
        self.windows(&document.text)
            .into_iter()
            .enumerate()
            .map(|(sequence, (start_char, text))| Chunk {
                chunk_id: chunk_id(&document.source_id, sequence),
                source_id: document.source_id.clone(),
                sequence,
                start_offset: start_char,
                text: text.to_string(),
                metadata: document.metadata.clone(),
            })
            .collect()
    }

    /// Compute `(start_char, slice)` for every window of `text`.
    fn windows<'a>(&self, text: &'a str) -> Vec<(usize, &'a str)> {
        let char_count = text.chars().count();

        if char_count <= self.chunk_size {
            return vec![(0, text)];
        }

        // Map of char index -> byte index for O(1) slicing.
        let char_to_byte: Vec<usize> = text
            .char_indices()
            .map(|(byte_idx, _)| byte_idx)
            .chain(std::iter::once(text.len()))
            .collect();

        let step = self.chunk_size - self.overlap;
        let mut windows = Vec::with_capacity(char_count / step + 1);
        let mut start_char = 0;

        loop {
            let end_char = (start_char + self.chunk_size).min(char_count);
            let slice = &text[char_to_byte[start_char]..char_to_byte[end_char]];
            windows.push((start_char, slice));

            if end_char == char_count {
                break;
            }
            start_char += step;
        }

        windows
    }
}

/// Rebuild the original text from a document's chunks, dropping overlaps.
///
/// Chunks must be in sequence order and come from the same document.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut text = String::new();
    let mut assembled_chars: usize = 0;

    for chunk in chunks {
        let already = assembled_chars.saturating_sub(chunk.start_offset);
        for c in chunk.text.chars().skip(already) {
            text.push(c);
            assembled_chars += 1;
        }
    }

    text
}
