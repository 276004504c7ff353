//! Keyword extraction for the full-text side of the hybrid index.
//!
//! Tokenizes text with a morphological analyzer (lindera, ko-dic) and emits
//! the space-joined surface forms of noun-class tokens, numerals, and
//! Latin/Hangul/numeric symbols. The same function runs over indexed content
//! and over search queries, so both sides of the FTS match agree on the
//! token stream.

use std::sync::LazyLock;

use lindera::dictionary::{DictionaryKind, load_dictionary_from_kind};
use lindera::mode::Mode;
use lindera::segmenter::Segmenter;
use lindera::tokenizer::Tokenizer;
use tracing::warn;

/// Noun-class tags (single-char surface forms are stoplist-filtered)
const NOUN_TAGS: [&str; 4] = ["NNG", "NNP", "NR", "NP"];
/// Symbol tags emitted regardless of length: Latin, numeral, Chinese char
const SYMBOL_TAGS: [&str; 3] = ["SL", "SN", "SH"];
/// Single-character noun forms that carry no search signal
const STOPLIST: [&str; 5] = ["것", "수", "등", "때", "곳"];

static TOKENIZER: LazyLock<Option<Tokenizer>> = LazyLock::new(|| {
  match load_dictionary_from_kind(DictionaryKind::KoDic) {
    Ok(dictionary) => {
      let segmenter = Segmenter::new(Mode::Normal, dictionary, None);
      Some(Tokenizer::new(segmenter))
    }
    Err(e) => {
      warn!(err = %e, "Failed to load ko-dic dictionary; keyword extraction disabled");
      None
    }
  }
});

/// Extract search keywords from text.
///
/// Pure over `text -> String`. Idempotent up to whitespace normalization:
/// the emitted tokens re-tokenize to themselves.
pub fn extract_keywords(text: &str) -> String {
  let Some(tokenizer) = TOKENIZER.as_ref() else {
    return String::new();
  };

  let mut tokens = match tokenizer.tokenize(text) {
    Ok(tokens) => tokens,
    Err(e) => {
      warn!(err = %e, "Tokenization failed");
      return String::new();
    }
  };

  let mut results: Vec<String> = Vec::new();

  for token in tokens.iter_mut() {
    let surface = token.text.to_string();
    let tag = token.details().first().map(|d| d.to_string()).unwrap_or_default();

    // Suffix nouns attach to the previous keyword instead of standing alone
    if tag == "XSN" {
      if let Some(last) = results.last_mut() {
        last.push_str(&surface);
      }
      continue;
    }

    if NOUN_TAGS.contains(&tag.as_str()) {
      if surface.chars().count() == 1 && STOPLIST.contains(&surface.as_str()) {
        continue;
      }
      results.push(surface);
    } else if SYMBOL_TAGS.contains(&tag.as_str()) {
      results.push(surface);
    }
  }

  results.join(" ")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn latin_tokens_survive() {
    let keywords = extract_keywords("the quarterly report covers beta metrics");
    assert!(keywords.contains("beta"), "got: {keywords}");
    assert!(keywords.contains("report"), "got: {keywords}");
  }

  #[test]
  fn korean_nouns_are_extracted() {
    let keywords = extract_keywords("문서 분석 결과를 요약합니다");
    assert!(keywords.contains("문서"), "got: {keywords}");
    assert!(keywords.contains("분석"), "got: {keywords}");
  }

  #[test]
  fn stoplist_drops_single_char_nouns() {
    let keywords = extract_keywords("그것은 할 수 있는 것 등");
    for stop in ["것", "수", "등"] {
      assert!(
        !keywords.split_whitespace().any(|k| k == stop),
        "stopword {stop} leaked into: {keywords}"
      );
    }
  }

  #[test]
  fn numbers_are_kept() {
    let keywords = extract_keywords("2024 매출 1200");
    assert!(keywords.contains("2024"), "got: {keywords}");
    assert!(keywords.contains("1200"), "got: {keywords}");
  }

  #[test]
  fn extraction_is_idempotent() {
    let once = extract_keywords("분석 결과 데이터 베이스 성능 지표 alpha beta 42");
    let twice = extract_keywords(&once);

    let normalize = |s: &str| s.split_whitespace().map(str::to_string).collect::<Vec<_>>();
    assert_eq!(normalize(&once), normalize(&twice));
  }

  #[test]
  fn empty_input_is_empty_output() {
    assert_eq!(extract_keywords(""), "");
  }
}
