//! Segment and parse-output shapes shared across pipeline stages.

use serde::{Deserialize, Serialize};

/// Output of the format parser, persisted as `format-parser/result.json`
/// under the document prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseOutput {
  /// Paginated sources: one entry per page, in page order
  Pages(Vec<ParsedPage>),
  /// Non-paginated sources: one entry per chunk, in chunk order
  Chunks(Vec<ParsedChunk>),
}

impl ParseOutput {
  pub fn len(&self) -> usize {
    match self {
      Self::Pages(pages) => pages.len(),
      Self::Chunks(chunks) => chunks.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn text_at(&self, index: usize) -> Option<&str> {
    match self {
      Self::Pages(pages) => pages.get(index).map(|p| p.text.as_str()),
      Self::Chunks(chunks) => chunks.get(index).map(|c| c.text.as_str()),
    }
  }

  pub fn image_uri_at(&self, index: usize) -> Option<&str> {
    match self {
      Self::Pages(pages) => pages.get(index).and_then(|p| p.image_uri.as_deref()),
      Self::Chunks(_) => None,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedPage {
  pub page_index: usize,
  pub text: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedChunk {
  pub chunk_index: usize,
  pub text: String,
}

/// Output of the external OCR track, read from `ocr/result.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrResult {
  #[serde(default)]
  pub pages: Vec<OcrPage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrPage {
  pub page_index: usize,
  #[serde(default)]
  pub text: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image_uri: Option<String>,
}

/// Output of the external BDA track, read from `bda/result.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BdaResult {
  #[serde(default)]
  pub segments: Vec<BdaSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BdaSegment {
  pub segment_index: usize,
  #[serde(default)]
  pub content: String,
}

/// Webreq descriptor: asks the pipeline to crawl a URL instead of
/// processing a local file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebreqDescriptor {
  #[serde(default)]
  pub url: String,
  #[serde(default)]
  pub instruction: String,
}
