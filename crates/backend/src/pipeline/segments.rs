//! Segment materialization: merge track outputs into an ordered segment list.
//!
//! One segment per page for paginated inputs, one per chunk otherwise. When
//! the format parser was skipped the OCR page list (then the BDA segment
//! list) determines the count; a bare image source still yields a single
//! segment whose image is the upload itself.

use tracing::{debug, warn};

use crate::{
  blob::{BlobStore, DocumentPrefix, StoreUri},
  domain::{
    document::{BdaResult, OcrResult, ParseOutput},
    mime::FileKind,
    workflow::{SegmentRow, StepName, StepState, WorkflowHead},
  },
  state::StateStore,
};

use super::Result;

/// Build and persist the segment list for a workflow.
pub async fn build_segments(state: &StateStore, blob: &BlobStore, head: &WorkflowHead) -> Result<Vec<SegmentRow>> {
  let uri = StoreUri::parse(&head.file_uri)?;
  let prefix = DocumentPrefix::from_uri(&uri)?;
  let kind = FileKind::from_mime(&head.file_type);

  let parse_output = read_json::<ParseOutput>(blob, &prefix.parser_result()).await;

  let ocr = if state.step_state(&head.workflow_id, StepName::Ocr).await? == StepState::Done {
    read_json::<OcrResult>(blob, &prefix.ocr_result()).await.unwrap_or_default()
  } else {
    OcrResult::default()
  };

  let bda = if state.step_state(&head.workflow_id, StepName::Bda).await? == StepState::Done {
    read_json::<BdaResult>(blob, &prefix.bda_result()).await.unwrap_or_default()
  } else {
    BdaResult::default()
  };

  let count = match &parse_output {
    Some(output) if !output.is_empty() => output.len(),
    _ if !ocr.pages.is_empty() => ocr.pages.len(),
    _ if !bda.segments.is_empty() => bda.segments.len(),
    _ if kind.is_image() => 1,
    _ => 0,
  };

  let mut segments = Vec::with_capacity(count);
  for index in 0..count {
    let ocr_page = ocr.pages.iter().find(|p| p.page_index == index);

    // Parser text wins; OCR text fills in when the parser had nothing
    let parsed_text = parse_output
      .as_ref()
      .and_then(|o| o.text_at(index))
      .filter(|t| !t.is_empty())
      .map(str::to_string)
      .or_else(|| ocr_page.map(|p| p.text.clone()))
      .unwrap_or_default();

    let bda_content = bda
      .segments
      .iter()
      .find(|s| s.segment_index == index)
      .map(|s| s.content.clone())
      .unwrap_or_default();

    let image_uri = parse_output
      .as_ref()
      .and_then(|o| o.image_uri_at(index))
      .map(str::to_string)
      .or_else(|| ocr_page.and_then(|p| p.image_uri.clone()))
      .or_else(|| if kind.is_image() { Some(head.file_uri.clone()) } else { None });

    let segment = SegmentRow {
      workflow_id: head.workflow_id.clone(),
      segment_id: SegmentRow::segment_id_for(&head.workflow_id, index),
      segment_index: index,
      image_uri,
      parsed_text,
      bda_content,
      analysis_result: String::new(),
      analysis_steps: Vec::new(),
      status: "created".into(),
    };
    state.put_segment(&segment).await?;
    segments.push(segment);
  }

  debug!(workflow_id = %head.workflow_id, segment_count = segments.len(), "Segments materialized");
  Ok(segments)
}

async fn read_json<T: serde::de::DeserializeOwned>(blob: &BlobStore, uri: &StoreUri) -> Option<T> {
  match blob.get_bytes(uri).await {
    Ok(bytes) => match serde_json::from_slice(&bytes) {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(uri = %uri, err = %e, "Malformed track output");
        None
      }
    },
    Err(_) => None,
  }
}
