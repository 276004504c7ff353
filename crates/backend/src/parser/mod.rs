//! Format parser: per-file-type text and page-image extraction.
//!
//! Reads the uploaded blob, produces a [`ParseOutput`] (pages for paginated
//! sources, chunks otherwise), and writes it as `format-parser/result.json`
//! under the document prefix. Types without a parser return
//! [`ParserError::Unsupported`], which the orchestrator records as a skipped
//! step rather than a failure.

mod convert;
mod office;
mod pdf;
mod sheet;
mod text;

pub use convert::Converter;
#[cfg(test)]
pub(crate) use pdf::tests::build_pdf;
#[cfg(test)]
pub(crate) use sheet::tests::build_xlsx;
use tracing::{debug, info};

use crate::{
  blob::{BlobError, BlobStore, DocumentPrefix},
  domain::{document::ParseOutput, mime::FileKind, workflow::WorkflowHead},
};

#[derive(Debug, thiserror::Error)]
pub enum ParserError {
  #[error("No parser for {0}")]
  Unsupported(String),
  #[error("Blob error: {0}")]
  Blob(#[from] BlobError),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("PDF error: {0}")]
  Pdf(#[from] lopdf::Error),
  #[error("Archive error: {0}")]
  Zip(#[from] zip::result::ZipError),
  #[error("XML error: {0}")]
  Xml(#[from] quick_xml::Error),
  #[error("CSV error: {0}")]
  Csv(#[from] csv::Error),
  #[error("Invalid UTF-8 in {0}")]
  Utf8(String),
  #[error("Serialization error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("Subprocess {program} failed ({status:?}): {stderr}")]
  Subprocess {
    program: String,
    status: Option<i32>,
    stderr: String,
  },
  #[error("Subprocess {0} timed out")]
  SubprocessTimeout(String),
}

pub type Result<T> = std::result::Result<T, ParserError>;

/// Dependencies of a parse run
pub struct ParserContext<'a> {
  pub blob: &'a BlobStore,
  pub converter: &'a Converter,
}

/// Parse one uploaded document and persist `format-parser/result.json`.
///
/// Returns the parse output on success; [`ParserError::Unsupported`] means
/// the file type has no parser and the step should be marked skipped.
pub async fn parse_document(ctx: &ParserContext<'_>, head: &WorkflowHead) -> Result<ParseOutput> {
  let kind = FileKind::from_mime(&head.file_type);
  let uri = crate::blob::StoreUri::parse(&head.file_uri)?;
  let prefix = DocumentPrefix::from_uri(&uri)?;

  let output = match kind {
    FileKind::Pdf => {
      let bytes = ctx.blob.get_bytes(&uri).await?;
      ParseOutput::Pages(pdf::extract_pages(&bytes)?)
    }
    FileKind::Pptx => {
      let bytes = ctx.blob.get_bytes(&uri).await?;
      office::parse_pptx(ctx, &prefix, &head.file_name, &bytes).await?
    }
    FileKind::Ppt | FileKind::Docx | FileKind::Doc => {
      let bytes = ctx.blob.get_bytes(&uri).await?;
      office::parse_via_pdf(ctx, &prefix, &head.file_name, &bytes).await?
    }
    FileKind::Xlsx | FileKind::Xls | FileKind::Csv => {
      let bytes = ctx.blob.get_bytes(&uri).await?;
      sheet::parse_spreadsheet(ctx, kind, &head.file_name, &bytes).await?
    }
    FileKind::Text | FileKind::Markdown => {
      let bytes = ctx.blob.get_bytes(&uri).await?;
      let content = String::from_utf8(bytes).map_err(|_| ParserError::Utf8(head.file_name.clone()))?;
      ParseOutput::Chunks(text::chunk_text(&content))
    }
    other => {
      debug!(file_type = %head.file_type, "No parser available");
      return Err(ParserError::Unsupported(other.mime().to_string()));
    }
  };

  let result_uri = prefix.parser_result();
  ctx
    .blob
    .put_bytes(&result_uri, &serde_json::to_vec_pretty(&output)?, "application/json")
    .await?;

  info!(
    workflow_id = %head.workflow_id,
    file_type = %head.file_type,
    units = output.len(),
    "Format parsing complete"
  );

  Ok(output)
}
