//! Object key layout for a document's derived artifacts.
//!
//! Uploads land at `projects/{project_id}/documents/{document_id}/{file_name}`;
//! everything the pipeline derives lives under the same document prefix:
//!
//! - `format-parser/result.json`
//! - `format-parser/slides/slide_{nnnn}.png`
//! - `ocr/result.json`, `bda/result.json` (external tracks)
//! - `analysis/segment_{nnnn}.json`, `analysis/summary.json`

use super::{BlobError, Result, StoreUri};

/// The `projects/{p}/documents/{d}/` prefix of one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPrefix {
  pub bucket: String,
  pub project_id: String,
  pub document_id: String,
}

impl DocumentPrefix {
  pub fn new(bucket: impl Into<String>, project_id: impl Into<String>, document_id: impl Into<String>) -> Self {
    Self {
      bucket: bucket.into(),
      project_id: project_id.into(),
      document_id: document_id.into(),
    }
  }

  /// Derive the prefix from any URI under the document, e.g. the upload URI
  pub fn from_uri(uri: &StoreUri) -> Result<Self> {
    let parts: Vec<&str> = uri.key.split('/').collect();
    let documents_at = parts
      .iter()
      .position(|p| *p == "documents")
      .ok_or_else(|| BlobError::InvalidUri(uri.to_string()))?;

    if documents_at < 2 || parts[documents_at - 2] != "projects" || documents_at + 1 >= parts.len() {
      return Err(BlobError::InvalidUri(uri.to_string()));
    }

    Ok(Self::new(
      uri.bucket.clone(),
      parts[documents_at - 1],
      parts[documents_at + 1],
    ))
  }

  pub fn prefix(&self) -> String {
    format!("projects/{}/documents/{}/", self.project_id, self.document_id)
  }

  fn uri(&self, rest: &str) -> StoreUri {
    StoreUri::new(self.bucket.clone(), format!("{}{rest}", self.prefix()))
  }

  pub fn upload(&self, file_name: &str) -> StoreUri {
    self.uri(file_name)
  }

  pub fn parser_result(&self) -> StoreUri {
    self.uri("format-parser/result.json")
  }

  pub fn slide_image(&self, index: usize) -> StoreUri {
    self.uri(&format!("format-parser/slides/slide_{index:04}.png"))
  }

  pub fn ocr_result(&self) -> StoreUri {
    self.uri("ocr/result.json")
  }

  pub fn bda_result(&self) -> StoreUri {
    self.uri("bda/result.json")
  }

  pub fn segment_analysis(&self, index: usize) -> StoreUri {
    self.uri(&format!("analysis/segment_{index:04}.json"))
  }

  pub fn summary(&self) -> StoreUri {
    self.uri("analysis/summary.json")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn derives_prefix_from_upload_uri() {
    let uri = StoreUri::parse("store://uploads/projects/p1/documents/d9/intro.pdf").unwrap();
    let prefix = DocumentPrefix::from_uri(&uri).unwrap();
    assert_eq!(prefix.project_id, "p1");
    assert_eq!(prefix.document_id, "d9");
    assert_eq!(
      prefix.parser_result().to_string(),
      "store://uploads/projects/p1/documents/d9/format-parser/result.json"
    );
    assert_eq!(
      prefix.slide_image(3).key,
      "projects/p1/documents/d9/format-parser/slides/slide_0003.png"
    );
    assert_eq!(
      prefix.segment_analysis(12).key,
      "projects/p1/documents/d9/analysis/segment_0012.json"
    );
    assert_eq!(prefix.summary().key, "projects/p1/documents/d9/analysis/summary.json");
  }

  #[test]
  fn rejects_uris_outside_the_layout() {
    let uri = StoreUri::parse("store://uploads/misc/file.bin").unwrap();
    assert!(DocumentPrefix::from_uri(&uri).is_err());
  }
}
