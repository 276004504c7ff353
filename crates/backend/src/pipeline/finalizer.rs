//! Analysis finalizer: combine per-segment tool outputs and enqueue the
//! index write.

use chrono::Utc;
use tracing::debug;

use super::Result;
use crate::{
  blob::{BlobStore, DocumentPrefix},
  domain::workflow::{SegmentRow, WorkflowHead},
  queue::{ImageAnalysisOutput, IndexWriteMessage, Queues, ToolOutput, ToolOutputs},
};

/// Compose `content_combined`: non-empty blocks in fixed order, blank-line
/// separated.
pub fn compose_content(bda_content: &str, parsed_text: &str, analysis_result: &str) -> String {
  let mut parts = Vec::new();
  if !bda_content.is_empty() {
    parts.push(format!("## BDA Analysis\n{bda_content}"));
  }
  if !parsed_text.is_empty() {
    parts.push(format!("## PDF Text\n{parsed_text}"));
  }
  if !analysis_result.is_empty() {
    parts.push(format!("## AI Analysis\n{analysis_result}"));
  }
  parts.join("\n\n")
}

/// Finalize one segment: write the analysis artifact and enqueue the index
/// write message.
pub async fn finalize_segment(
  blob: &BlobStore,
  queues: &Queues,
  head: &WorkflowHead,
  segment: &SegmentRow,
) -> Result<()> {
  let now = Utc::now().to_rfc3339();
  let mut tools = ToolOutputs::default();

  if !segment.bda_content.is_empty() {
    tools.bda_indexer.push(ToolOutput {
      content: segment.bda_content.clone(),
      timestamp: now.clone(),
    });
  }
  if !segment.parsed_text.is_empty() {
    tools.pdf_text_extractor.push(ToolOutput {
      content: segment.parsed_text.clone(),
      timestamp: now.clone(),
    });
  }
  if !segment.analysis_result.is_empty() {
    tools.image_analysis.push(ImageAnalysisOutput {
      content: segment.analysis_result.clone(),
      steps: segment.analysis_steps.clone(),
      timestamp: now.clone(),
    });
  }

  let content_combined = compose_content(&segment.bda_content, &segment.parsed_text, &segment.analysis_result);

  // Per-segment artifact beside the index write, for inspection and replay
  let uri = document_prefix(head)?.segment_analysis(segment.segment_index);
  let artifact = serde_json::json!({
    "segment_index": segment.segment_index,
    "image_uri": segment.image_uri,
    "bda_content": segment.bda_content,
    "parsed_text": segment.parsed_text,
    "analysis_result": segment.analysis_result,
    "analysis_steps": segment.analysis_steps,
  });
  blob
    .put_bytes(&uri, &serde_json::to_vec_pretty(&artifact)?, "application/json")
    .await?;

  queues
    .index_write
    .send(IndexWriteMessage {
      document_id: head.document_id.clone(),
      segment_id: segment.segment_id.clone(),
      segment_index: segment.segment_index,
      status: "completed".into(),
      tools,
      content_combined,
      file_uri: head.file_uri.clone(),
      file_type: head.file_type.clone(),
      image_uri: segment.image_uri.clone(),
    })
    .await?;

  debug!(segment_id = %segment.segment_id, "Segment finalized and queued for indexing");
  Ok(())
}

fn document_prefix(head: &WorkflowHead) -> Result<DocumentPrefix> {
  let uri = crate::blob::StoreUri::parse(&head.file_uri)?;
  Ok(DocumentPrefix::from_uri(&uri)?)
}
