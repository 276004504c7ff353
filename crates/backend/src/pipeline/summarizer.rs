//! Document-level summary over the committed segments.

use llm::{ChatRequest, Message};
use tracing::{info, warn};

use super::Result;
use crate::{
  blob::{DocumentPrefix, StoreUri},
  daemon::Services,
  domain::workflow::WorkflowHead,
};

/// Input cap for the summary prompt
const MAX_SUMMARY_INPUT_CHARS: usize = 50_000;
/// Output token budget for the summary
const SUMMARY_MAX_TOKENS: u32 = 2_048;

#[derive(Debug)]
pub enum SummarizeOutcome {
  Completed { summary: String, segment_count: usize },
  /// The document has no committed segments; the workflow must fail
  NoSegments,
}

/// Summarize a document from its indexed segments, write
/// `analysis/summary.json`, and mark the records summarized.
pub async fn summarize_document(services: &Services, head: &WorkflowHead) -> Result<SummarizeOutcome> {
  let records = services.index.get_segments(&head.document_id).await?;
  if records.is_empty() {
    info!(document_id = %head.document_id, "No segments found for summarization");
    return Ok(SummarizeOutcome::NoSegments);
  }

  let mut sections = Vec::new();
  for record in &records {
    if !record.content_combined.is_empty() {
      sections.push(format!("### Page {}\n{}", record.segment_index + 1, record.content_combined));
    }
  }
  let combined: String = sections.join("\n\n").chars().take(MAX_SUMMARY_INPUT_CHARS).collect();

  let language_name = match head.settings.language.as_str() {
    "ko" => "Korean",
    "ja" => "Japanese",
    "zh" => "Chinese",
    _ => "English",
  };

  let prompt = format!(
    "Summarize the following document analysis results in {language_name}.\n\
     Provide a structured summary with:\n\
     1. Document Overview (1-2 sentences)\n\
     2. Key Findings (3-5 bullet points)\n\
     3. Important Data Points\n\
     4. Conclusion\n\n\
     Document Analysis:\n{combined}\n\nSummary:"
  );

  let model = if services.config.llm.summarizer_model.is_empty() {
    services.config.llm.model.clone()
  } else {
    services.config.llm.summarizer_model.clone()
  };

  let request = ChatRequest {
    system: None,
    messages: vec![Message::user_text(prompt)],
    tools: Vec::new(),
    model,
    max_tokens: SUMMARY_MAX_TOKENS,
    timeout_secs: 0,
  };

  // A summary failure degrades the artifact, not the workflow
  let summary = match services.llm.chat(request).await {
    Ok(response) => response.text(),
    Err(e) => {
      warn!(err = %e, "Error generating summary");
      format!("Summary generation failed: {e}")
    }
  };

  let uri = StoreUri::parse(&head.file_uri)?;
  let prefix = DocumentPrefix::from_uri(&uri)?;
  services
    .blob
    .put_bytes(
      &prefix.summary(),
      &serde_json::to_vec_pretty(&serde_json::json!({ "summary": summary }))?,
      "application/json",
    )
    .await?;

  services.index.update_status(&head.document_id, None, "summarized").await?;

  info!(
    document_id = %head.document_id,
    segment_count = records.len(),
    summary_chars = summary.len(),
    "Document summarized"
  );

  Ok(SummarizeOutcome::Completed {
    summary,
    segment_count: records.len(),
  })
}
