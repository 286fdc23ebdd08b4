//! Chunking utilities for splitting extracted text into overlapping segments.
//!
//! Chunk sizes are measured in characters, never in bytes, so multi-byte
//! UTF-8 text is never split inside a code point. Adjacent chunks share
//! `overlap` characters and together always cover the whole input.

use crate::error::{Error, Result};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Validated chunking parameters.
///
/// # Examples
///
/// ```
/// use kbase::chunking::ChunkingConfig;
///
/// assert!(ChunkingConfig::new(500, 50).is_ok());
/// assert!(ChunkingConfig::new(50, 50).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config(
                "chunk size must be greater than zero".into(),
            ));
        }
        if overlap >= chunk_size {
            return Err(Error::Config(format!(
                "chunk overlap ({overlap}) must be smaller than chunk size \
                 ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Split `text` with these parameters.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        chunk_text(text, self.chunk_size, self.overlap)
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A chunk of text from a larger document.
///
/// Produced by [`chunk_text`]. Each chunk represents a window of the
/// original text, with an index and byte offset for mapping back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk text content.
    pub text: String,
    /// Zero-based chunk index within the document.
    pub index: usize,
    /// Byte offset where this chunk starts in the original document.
    pub start_offset: usize,
}

/// Split text into overlapping chunks.
///
/// If the text is no longer than `chunk_size` characters, returns a single
/// chunk. Longer text is cut into windows of at most `chunk_size`
/// characters; a window is pulled back to the last whitespace inside it when
/// that keeps it longer than `overlap`, and the next window starts `overlap`
/// characters before the previous one ended. Whitespace-only windows are
/// dropped.
///
/// Callers must ensure `overlap < chunk_size` (see [`ChunkingConfig::new`]);
/// a degenerate `overlap` still terminates because every window advances by
/// at least one character.
///
/// # Examples
///
/// ```
/// use kbase::chunking::chunk_text;
///
/// let chunks = chunk_text("Hello, world!", 500, 50);
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].text, "Hello, world!");
///
/// let text = "a".repeat(600);
/// let chunks = chunk_text(&text, 500, 50);
/// assert_eq!(chunks.len(), 2);
/// ```
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let char_count = text.chars().count();

    if char_count <= chunk_size {
        if text.trim().is_empty() {
            return Vec::new();
        }
        return vec![Chunk {
            text: text.to_string(),
            index: 0,
            start_offset: 0,
        }];
    }

    // char index -> byte index, with one extra slot for the end of text
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut chunks = Vec::new();
    let mut start_char = 0;

    loop {
        let window_end = (start_char + chunk_size).min(char_count);
        let end_char = if window_end < char_count {
            find_word_boundary_char(
                text,
                &char_to_byte,
                start_char + overlap + 1,
                window_end,
            )
        } else {
            window_end
        };

        let start_byte = char_to_byte[start_char];
        let end_byte = char_to_byte[end_char];
        let slice = &text[start_byte..end_byte];
        if !slice.trim().is_empty() {
            chunks.push(Chunk {
                text: slice.to_string(),
                index: chunks.len(),
                start_offset: start_byte,
            });
        }

        if end_char >= char_count {
            break;
        }

        let next_start = end_char.saturating_sub(overlap);
        start_char = if next_start > start_char {
            next_start
        } else {
            start_char + 1
        };
    }

    chunks
}

/// Find a break point in `(min_char, pos_char]`, preferring the position
/// right after the last whitespace. Falls back to `pos_char`.
fn find_word_boundary_char(
    text: &str,
    char_to_byte: &[usize],
    min_char: usize,
    pos_char: usize,
) -> usize {
    if min_char >= pos_char {
        return pos_char;
    }

    let start_byte = char_to_byte[min_char];
    let end_byte = char_to_byte[pos_char];
    let search_region = &text[start_byte..end_byte];

    if let Some(ws_byte_offset) =
        search_region.rfind(|c: char| c.is_whitespace())
    {
        let ws_byte = start_byte + ws_byte_offset;
        // first char strictly after the whitespace
        let idx = char_to_byte.partition_point(|&b| b <= ws_byte);
        if idx > min_char && idx <= pos_char {
            return idx;
        }
    }

    pos_char
}
