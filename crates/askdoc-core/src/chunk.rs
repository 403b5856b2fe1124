//! Overlapping fixed-size text chunker.
//!
//! Splits each page of a document into [`Chunk`]s of at most `chunk_size`
//! characters, where consecutive chunks of the same page share exactly
//! `chunk_overlap` characters. Sizes are counted in Unicode scalar values,
//! never bytes, so multi-byte text is never cut inside a character.
//!
//! # Algorithm
//!
//! 1. If the remaining text fits in `chunk_size`, emit it and stop.
//! 2. Otherwise look for a break point inside the window, preferring a
//!    paragraph break (`\n\n`), then a line break, then a space. Only the
//!    back half of the window is searched so chunks stay close to full size.
//! 3. With no break point, cut hard at `chunk_size`.
//! 4. Start the next window `chunk_overlap` characters before the cut.
//!
//! Chunks are exact substrings of the page. Windows that contain only
//! whitespace are dropped, since they carry nothing to retrieve. For a page
//! without such runs, dropping the first `chunk_overlap` characters of every
//! chunk but the first and concatenating reproduces the page text.
//!
//! Each chunk gets a UUIDv5 derived from its document id and index, so
//! splitting identical input twice yields identical chunks.
//!
//! # Example
//!
//! ```rust
//! use askdoc_core::chunk::{split_pages, ChunkParams};
//!
//! let params = ChunkParams { chunk_size: 1000, chunk_overlap: 150 };
//! let chunks = split_pages("doc-1", &["Hello world.".to_string()], &params);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].page, 1);
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Break separators in order of preference.
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Window size and overlap, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 150,
        }
    }
}

impl ChunkParams {
    /// Reject parameters that cannot make forward progress.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be > 0");
        }
        if self.chunk_overlap >= self.chunk_size {
            anyhow::bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap,
                self.chunk_size
            );
        }
        Ok(())
    }
}

/// Split every page of a document into chunks.
///
/// Chunk indices are contiguous across the whole document, starting at 0,
/// in page order. Whitespace-only windows are skipped, so pages that are
/// empty or whitespace-only yield no chunks and a document with no text
/// yields an empty vector; callers treat that as an ingestion failure.
pub fn split_pages(document_id: &str, pages: &[String], params: &ChunkParams) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut chunk_index: i64 = 0;

    for (page_idx, page) in pages.iter().enumerate() {
        let bounds = char_bounds(page);
        for (start, end) in window_spans(page, params) {
            let text = &page[bounds[start]..bounds[end]];
            if text.trim().is_empty() {
                continue;
            }
            chunks.push(make_chunk(
                document_id,
                chunk_index,
                page_idx as i64 + 1,
                start as i64,
                text,
            ));
            chunk_index += 1;
        }
    }

    chunks
}

/// Compute `(start, end)` character spans for one page.
///
/// Out-of-range parameters are clamped (`chunk_size >= 1`,
/// `chunk_overlap < chunk_size`) so the loop always terminates.
pub fn window_spans(text: &str, params: &ChunkParams) -> Vec<(usize, usize)> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let size = params.chunk_size.max(1);
    let overlap = params.chunk_overlap.min(size - 1);

    let bounds = char_bounds(text);
    let total = bounds.len() - 1;

    let mut spans = Vec::new();
    let mut start = 0usize;

    loop {
        if total - start <= size {
            spans.push((start, total));
            break;
        }

        let hard_end = start + size;
        let min_end = start + (overlap + 1).max(size / 2);
        let end = find_break(text, &bounds, min_end, hard_end).unwrap_or(hard_end);

        spans.push((start, end));
        start = end - overlap;
    }

    spans
}

/// Find the char position just past the last preferred separator inside
/// `[min_end, hard_end)`.
fn find_break(text: &str, bounds: &[usize], min_end: usize, hard_end: usize) -> Option<usize> {
    let lo = bounds[min_end];
    let window = &text[lo..bounds[hard_end]];

    SEPARATORS.iter().find_map(|sep| {
        window.rfind(sep).map(|pos| {
            let byte_end = lo + pos + sep.len();
            // Separators are ASCII, so the end is always a char boundary.
            bounds
                .binary_search(&byte_end)
                .unwrap_or_else(|insert_at| insert_at)
        })
    })
}

/// Byte offset of every char position, plus the end of the string.
fn char_bounds(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect()
}

/// Create a single [`Chunk`] with a deterministic UUID and SHA-256 hash.
fn make_chunk(document_id: &str, index: i64, page: i64, start_char: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", document_id, index).as_bytes(),
    );

    Chunk {
        id: id.to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        page,
        start_char,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(size: usize, overlap: usize) -> ChunkParams {
        ChunkParams {
            chunk_size: size,
            chunk_overlap: overlap,
        }
    }

    fn page(text: &str) -> Vec<String> {
        vec![text.to_string()]
    }

    fn long_text() -> String {
        (0..120)
            .map(|i| format!("Sentence number {} talks about topic {}.", i, i % 7))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_pages("doc1", &page("Hello, world!"), &ChunkParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].start_char, 0);
    }

    #[test]
    fn test_empty_document_yields_no_chunks() {
        assert!(split_pages("doc1", &page(""), &ChunkParams::default()).is_empty());
        assert!(split_pages("doc1", &page("  \n\n \t"), &ChunkParams::default()).is_empty());
        assert!(split_pages("doc1", &[], &ChunkParams::default()).is_empty());
    }

    #[test]
    fn test_chunks_cover_text_with_exact_overlap() {
        let text = long_text();
        let p = params(200, 30);
        let spans = window_spans(&text, &p);
        assert!(spans.len() > 3);
        assert_eq!(spans[0].0, 0);
        assert_eq!(spans.last().unwrap().1, text.chars().count());
        for pair in spans.windows(2) {
            assert_eq!(pair[1].0, pair[0].1 - 30, "overlap must be exact");
        }

        let chunks = split_pages("doc1", &page(&text), &p);
        let mut rebuilt = chunks[0].text.clone();
        for c in &chunks[1..] {
            rebuilt.extend(c.text.chars().skip(30));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_chunk_size_is_an_upper_bound() {
        let text = long_text();
        for c in split_pages("doc1", &page(&text), &params(150, 20)) {
            assert!(c.text.chars().count() <= 150, "chunk too long: {}", c.text);
        }
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let first = "a".repeat(70);
        let second = "b ".repeat(40);
        let text = format!("{}\n\n{}", first, second);
        let chunks = split_pages("doc1", &page(&text), &params(100, 10));
        assert!(chunks[0].text.ends_with("\n\n"), "got {:?}", chunks[0].text);
    }

    #[test]
    fn test_hard_split_without_separators() {
        let text = "x".repeat(250);
        let spans = window_spans(&text, &params(100, 10));
        assert_eq!(spans, vec![(0, 100), (90, 190), (180, 250)]);
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘".repeat(10);
        let chunks = split_pages("doc1", &page(&text), &params(25, 5));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 25);
        }
    }

    #[test]
    fn test_pages_are_split_independently() {
        let pages = vec![
            "Page one text.".to_string(),
            "   ".to_string(),
            "Page three text.".to_string(),
        ];
        let chunks = split_pages("doc1", &pages, &ChunkParams::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page, 1);
        assert_eq!(chunks[1].page, 3);
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn test_whitespace_windows_are_dropped() {
        let text = format!("alpha{}beta", " ".repeat(400));
        let chunks = split_pages("doc1", &page(&text), &params(100, 10));
        assert_eq!(chunks.len(), 2, "got {:?}", chunks);
        assert!(chunks.iter().all(|c| !c.text.trim().is_empty()));
        assert!(chunks[0].text.starts_with("alpha"));
        assert!(chunks[1].text.ends_with("beta"));
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(
            chunks[1].start_char as usize,
            text.chars().count() - chunks[1].text.chars().count()
        );
    }

    #[test]
    fn test_deterministic() {
        let text = long_text();
        let c1 = split_pages("doc1", &page(&text), &params(120, 15));
        let c2 = split_pages("doc1", &page(&text), &params(120, 15));
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_identical_text_gets_distinct_ids() {
        let pages = vec!["same words".to_string(), "same words".to_string()];
        let chunks = split_pages("doc1", &pages, &ChunkParams::default());
        assert_eq!(chunks[0].hash, chunks[1].hash);
        assert_ne!(chunks[0].id, chunks[1].id);
    }

    #[test]
    fn test_validate_rejects_bad_params() {
        assert!(params(0, 0).validate().is_err());
        assert!(params(100, 100).validate().is_err());
        assert!(params(100, 99).validate().is_ok());
    }

    #[test]
    fn test_degenerate_params_still_terminate() {
        let spans = window_spans("abcdef", &params(2, 5));
        assert_eq!(spans.last().unwrap().1, 6);
    }
}
