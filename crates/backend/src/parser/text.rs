//! Plain text and markdown chunking.
//!
//! Splits content into overlapping windows, preferring to break at a
//! sentence boundary near the window end so chunks stay readable and
//! embedding inputs do not cut mid-sentence.

use crate::domain::document::ParsedChunk;

/// Window size in characters
const WINDOW: usize = 15_000;
/// Characters of overlap between consecutive windows
const OVERLAP: usize = 500;
/// How far back from the window end to look for a sentence boundary
const BOUNDARY_LOOKBACK: usize = 200;

/// Chunk text into overlapping windows.
pub fn chunk_text(content: &str) -> Vec<ParsedChunk> {
  let chars: Vec<char> = content.chars().collect();
  let mut chunks = Vec::new();
  let mut start = 0usize;

  while start < chars.len() {
    let mut end = (start + WINDOW).min(chars.len());

    // Prefer a sentence boundary within the last stretch of the window
    if end < chars.len() {
      let floor = end.saturating_sub(BOUNDARY_LOOKBACK).max(start + 1);
      if let Some(boundary) = (floor..end).rev().find(|&i| is_sentence_boundary(chars[i])) {
        end = boundary + 1;
      }
    }

    let text: String = chars[start..end].iter().collect();
    let trimmed = text.trim();
    if !trimmed.is_empty() {
      chunks.push(ParsedChunk {
        chunk_index: chunks.len(),
        text: trimmed.to_string(),
      });
    }

    if end >= chars.len() {
      break;
    }
    // Overlap with the previous window, always making forward progress
    start = end.saturating_sub(OVERLAP).max(start + 1);
  }

  chunks
}

fn is_sentence_boundary(c: char) -> bool {
  matches!(c, '.' | '!' | '?' | '\n')
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn short_text_is_one_chunk() {
    let chunks = chunk_text("a short document");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_index, 0);
    assert_eq!(chunks[0].text, "a short document");
  }

  #[test]
  fn empty_text_yields_no_chunks() {
    assert!(chunk_text("").is_empty());
    assert!(chunk_text("   \n ").is_empty());
  }

  #[test]
  fn long_text_gets_overlapping_windows() {
    let sentence = "The quick brown fox jumps over the lazy dog. ";
    let content = sentence.repeat(1000); // ~46k chars

    let chunks = chunk_text(&content);
    assert!(chunks.len() >= 3, "expected multiple chunks, got {}", chunks.len());

    let indices: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
    assert_eq!(indices, (0..chunks.len()).collect::<Vec<_>>());

    for chunk in &chunks {
      assert!(chunk.text.chars().count() <= WINDOW);
    }

    // Consecutive chunks share the overlap region
    let tail: String = chunks[0].text.chars().rev().take(100).collect::<String>();
    let tail: String = tail.chars().rev().collect();
    assert!(
      chunks[1].text.contains(tail.trim()),
      "second chunk should overlap the first"
    );
  }

  #[test]
  fn windows_break_at_sentence_boundaries() {
    let sentence = "Sentences end with periods. ";
    let content = sentence.repeat(700); // ~19.6k chars -> two chunks

    let chunks = chunk_text(&content);
    assert!(chunks.len() >= 2);
    // The first chunk ends at a sentence boundary, not mid-word
    assert!(chunks[0].text.ends_with('.'), "chunk ends with: {:?}", &chunks[0].text[chunks[0].text.len() - 10..]);
  }
}
