//! Input validation for embedding requests.

/// Maximum characters submitted to the embedding model per input
pub const MAX_EMBED_CHARS: usize = 10_000;

/// Truncate text to the embedder input cap on a character boundary.
pub fn truncate_for_embedding(text: &str) -> String {
  if text.chars().count() <= MAX_EMBED_CHARS {
    return text.to_string();
  }
  text.chars().take(MAX_EMBED_CHARS).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn short_text_is_unchanged() {
    assert_eq!(truncate_for_embedding("hello"), "hello");
  }

  #[test]
  fn long_text_is_capped_at_char_boundary() {
    let long = "가".repeat(MAX_EMBED_CHARS + 100);
    let truncated = truncate_for_embedding(&long);
    assert_eq!(truncated.chars().count(), MAX_EMBED_CHARS);
    // Still valid UTF-8 by construction; ensure no partial char slipped in
    assert!(truncated.chars().all(|c| c == '가'));
  }
}
