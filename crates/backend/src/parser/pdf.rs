//! PDF text extraction with content-stream stripping.
//!
//! Before extracting, each page's content stream is filtered down to its
//! `BT..ET` text blocks. Graphics operators dominate the stream in scanned
//! or chart-heavy documents and slow extraction without contributing any
//! text, so they are dropped up front.

use lopdf::Document;
use lopdf::content::Content;
use tracing::{debug, trace, warn};

use super::Result;
use crate::domain::document::ParsedPage;

/// Extract per-page text, in page order.
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<ParsedPage>> {
  let mut doc = Document::load_mem(bytes)?;
  strip_non_text_operators(&mut doc);

  let mut page_numbers: Vec<u32> = doc.get_pages().keys().cloned().collect();
  page_numbers.sort();

  let mut pages = Vec::with_capacity(page_numbers.len());
  for (index, page_number) in page_numbers.iter().enumerate() {
    let text = doc.extract_text(&[*page_number]).unwrap_or_default();
    trace!(page = index, chars = text.len(), "Extracted page text");
    pages.push(ParsedPage {
      page_index: index,
      text,
      image_uri: None,
    });
  }

  debug!(page_count = pages.len(), "PDF extraction complete");
  Ok(pages)
}

/// Rewrite every page content stream keeping only `BT..ET` text blocks.
///
/// Pages whose streams fail to decode are left untouched; extraction still
/// works, just without the cost reduction.
fn strip_non_text_operators(doc: &mut Document) {
  let pages: Vec<(u32, lopdf::ObjectId)> = doc.get_pages().into_iter().collect();

  for (page_number, page_id) in pages {
    let content_data = match doc.get_page_content(page_id) {
      Ok(data) => data,
      Err(e) => {
        warn!(page = page_number, err = %e, "Could not read page content");
        continue;
      }
    };

    let content = match Content::decode(&content_data) {
      Ok(content) => content,
      Err(e) => {
        warn!(page = page_number, err = %e, "Could not decode content stream");
        continue;
      }
    };

    let mut in_text = false;
    let mut kept = Vec::new();
    for operation in content.operations {
      match operation.operator.as_str() {
        "BT" => {
          in_text = true;
          kept.push(operation);
        }
        "ET" => {
          in_text = false;
          kept.push(operation);
        }
        _ if in_text => kept.push(operation),
        _ => {}
      }
    }

    let filtered = Content { operations: kept };
    match filtered.encode() {
      Ok(encoded) => {
        if let Err(e) = doc.change_page_content(page_id, encoded) {
          warn!(page = page_number, err = %e, "Could not replace page content");
        }
      }
      Err(e) => warn!(page = page_number, err = %e, "Could not re-encode content stream"),
    }
  }
}
