//! Orchestrator: the per-workflow state machine.
//!
//! ```text
//! CREATED ─► PREPROCESSING ─ poll ─► (format parse, build segments) ─► ANALYZING
//!                │ any_failed / budget                │ per segment, parallelism P
//!                ▼                                    ▼
//!              FAILED ◄──────────────── summarize ◄── drain writer
//!                                          │
//!                                          └─► COMPLETED (>= 1 successful segment)
//! ```
//!
//! Every stage transition is recorded on the step map and runs under the
//! configured step timeout.

use std::{sync::Arc, time::Instant};

use futures::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{PipelineError, Result, finalizer, segments, status, summarizer};
use crate::{
  agent::{ImageState, SegmentInput, VisionAgent},
  blob::StoreUri,
  daemon::Services,
  domain::{
    mime::FileKind,
    workflow::{SegmentRow, StepName, StepState, WorkflowHead, WorkflowStatus},
  },
  parser::{ParserContext, ParserError},
  queue::WorkflowMessage,
};

/// Worker loop: pulls workflow messages off the shared receiver until
/// cancelled. Multiple workers share one receiver.
pub async fn orchestrator_worker(
  worker_id: usize,
  services: Arc<Services>,
  rx: Arc<Mutex<mpsc::Receiver<WorkflowMessage>>>,
  cancel: CancellationToken,
) {
  debug!(worker_id, "Orchestrator worker starting");

  loop {
    let message = tokio::select! {
      biased;

      _ = cancel.cancelled() => {
        debug!(worker_id, "Orchestrator worker cancelled");
        break;
      }

      message = async { rx.lock().await.recv().await } => message,
    };

    let Some(message) = message else {
      debug!(worker_id, "Workflow queue closed");
      break;
    };

    let workflow_id = message.envelope.workflow_id.clone();
    if let Err(e) = run_workflow(&services, &message).await {
      error!(worker_id, workflow_id = %workflow_id, err = %e, "Workflow driver error");
      let _ = services
        .state
        .update_workflow_status(
          &message.envelope.document_id,
          &workflow_id,
          WorkflowStatus::Failed,
          Some(e.to_string()),
        )
        .await;
    }
  }
}

/// Drive one workflow from `CREATED` to a terminal state.
pub async fn run_workflow(services: &Services, message: &WorkflowMessage) -> Result<()> {
  let document_id = &message.envelope.document_id;
  let workflow_id = &message.envelope.workflow_id;

  let Some(head) = services.state.get_workflow(document_id, workflow_id).await? else {
    warn!(workflow_id = %workflow_id, "Workflow head missing; dropping message");
    return Ok(());
  };
  if head.status.is_terminal() {
    // Duplicate delivery of an already-driven workflow
    debug!(workflow_id = %workflow_id, status = ?head.status, "Workflow already terminal");
    return Ok(());
  }

  info!(workflow_id = %workflow_id, file_type = %head.file_type, "Workflow starting");
  services
    .state
    .update_workflow_status(document_id, workflow_id, WorkflowStatus::Preprocessing, None)
    .await?;

  // Poll the preprocessing tracks within the wall-clock budget
  let poll_started = Instant::now();
  loop {
    let check = status::check_preprocess_status(&services.state, workflow_id).await?;

    if check.any_failed {
      return fail(services, &head, "preprocessing track failed").await;
    }
    if check.all_completed && !check.analysis_busy {
      break;
    }
    if poll_started.elapsed() >= services.config.pipeline.poll_budget() {
      warn!(workflow_id = %workflow_id, "Preprocess polling budget exhausted");
      return fail(services, &head, "timeout").await;
    }

    tokio::time::sleep(services.config.pipeline.poll_interval()).await;
  }

  // Format parsing (if a previous delivery has not already done it)
  if services.state.step_state(workflow_id, StepName::FormatParser).await? == StepState::Pending {
    services
      .state
      .transition_step(workflow_id, StepName::FormatParser, StepState::Running, None)
      .await?;

    let ctx = ParserContext {
      blob: &services.blob,
      converter: &services.converter,
    };
    let parse_result = tokio::time::timeout(
      services.config.pipeline.step_timeout(),
      crate::parser::parse_document(&ctx, &head),
    )
    .await;

    match parse_result {
      Ok(Ok(_)) => {
        services
          .state
          .transition_step(workflow_id, StepName::FormatParser, StepState::Done, None)
          .await?;
      }
      Ok(Err(ParserError::Unsupported(mime))) => {
        debug!(workflow_id = %workflow_id, mime = %mime, "Format parser skipped");
        services
          .state
          .transition_step(workflow_id, StepName::FormatParser, StepState::Skipped, None)
          .await?;
      }
      Ok(Err(e)) => {
        services
          .state
          .transition_step(workflow_id, StepName::FormatParser, StepState::Failed, Some(e.to_string()))
          .await?;
        return fail(services, &head, &format!("format parsing failed: {e}")).await;
      }
      Err(_) => {
        services
          .state
          .transition_step(
            workflow_id,
            StepName::FormatParser,
            StepState::Failed,
            Some("timeout".into()),
          )
          .await?;
        return fail(services, &head, "timeout").await;
      }
    }
  }

  // Segment materialization
  services
    .state
    .transition_step(workflow_id, StepName::SegmentBuilder, StepState::Running, None)
    .await?;
  let built = segments::build_segments(&services.state, &services.blob, &head).await;
  let segment_list = match built {
    Ok(list) => {
      services
        .state
        .transition_step(workflow_id, StepName::SegmentBuilder, StepState::Done, None)
        .await?;
      list
    }
    Err(e) => {
      services
        .state
        .transition_step(workflow_id, StepName::SegmentBuilder, StepState::Failed, Some(e.to_string()))
        .await?;
      return fail(services, &head, &format!("segment building failed: {e}")).await;
    }
  };

  services
    .state
    .update_workflow_status(document_id, workflow_id, WorkflowStatus::Analyzing, None)
    .await?;

  // Per-segment analysis with bounded parallelism
  let parallelism = services.config.pipeline.analysis_parallelism.max(1);
  let outcomes: Vec<(bool, Option<String>)> = futures::stream::iter(
    segment_list.iter().map(|segment| analyze_and_finalize(services, &head, segment)),
  )
  .buffer_unordered(parallelism)
  .collect()
  .await;

  let successful = outcomes.iter().filter(|(ok, _)| *ok).count();
  let finalized_ids: Vec<String> = outcomes.iter().filter_map(|(_, id)| id.clone()).collect();

  info!(
    workflow_id = %workflow_id,
    segments = segment_list.len(),
    successful,
    "Segment analysis complete"
  );

  // Wait for the index writer to drain this workflow's records
  wait_for_drain(services, document_id, &finalized_ids).await;

  // Summarize; zero segments fails the workflow with a no_segments reason
  services
    .state
    .transition_step(workflow_id, StepName::Summarizer, StepState::Running, None)
    .await?;
  match summarizer::summarize_document(services, &head).await {
    Ok(summarizer::SummarizeOutcome::Completed { .. }) => {
      services
        .state
        .transition_step(workflow_id, StepName::Summarizer, StepState::Done, None)
        .await?;
    }
    Ok(summarizer::SummarizeOutcome::NoSegments) => {
      services
        .state
        .transition_step(workflow_id, StepName::Summarizer, StepState::Skipped, Some("no_segments".into()))
        .await?;
      return fail(services, &head, "no_segments").await;
    }
    Err(e) => {
      services
        .state
        .transition_step(workflow_id, StepName::Summarizer, StepState::Failed, Some(e.to_string()))
        .await?;
      return fail(services, &head, &format!("summarization failed: {e}")).await;
    }
  }

  if successful == 0 {
    return fail(services, &head, "no successful segment analysis").await;
  }

  services
    .state
    .update_workflow_status(document_id, workflow_id, WorkflowStatus::Completed, None)
    .await?;
  info!(workflow_id = %workflow_id, "Workflow completed");
  Ok(())
}

/// Analyze one segment and finalize it. Returns `(analysis_succeeded,
/// finalized_segment_id)`; analysis failure still finalizes so the error is
/// visible in the index, but does not count as a successful segment.
async fn analyze_and_finalize(
  services: &Services,
  head: &WorkflowHead,
  segment: &SegmentRow,
) -> (bool, Option<String>) {
  let workflow_id = &head.workflow_id;
  let index = segment.segment_index;
  let analyzer_step = StepName::SegmentAnalyzer(index);

  if let Err(e) = services
    .state
    .transition_step(workflow_id, analyzer_step, StepState::Running, None)
    .await
  {
    warn!(workflow_id = %workflow_id, index, err = %e, "Could not start analyzer step");
    return (false, None);
  }

  let image = match &segment.image_uri {
    Some(uri) => download_image(services, uri).await,
    None => None,
  };

  let mut context_parts = Vec::new();
  if !segment.bda_content.is_empty() {
    context_parts.push(format!("## BDA Analysis:\n{}", segment.bda_content));
  }
  if !segment.parsed_text.is_empty() {
    context_parts.push(format!("## Parsed Text:\n{}", segment.parsed_text));
  }

  let agent = VisionAgent::new(
    services.llm.as_ref(),
    services.config.llm.model.clone(),
    services.config.pipeline.max_agent_iterations,
  );
  let input = SegmentInput {
    document_id: head.document_id.clone(),
    segment_id: segment.segment_id.clone(),
    segment_index: index,
    image,
    context: context_parts.join("\n\n"),
    language: head.settings.language.clone(),
  };

  let outcome = match tokio::time::timeout(services.config.pipeline.step_timeout(), agent.analyze(input)).await {
    Ok(outcome) => outcome,
    Err(_) => {
      warn!(workflow_id = %workflow_id, index, "Segment analysis timed out");
      crate::agent::AgentOutcome {
        analysis_result: "Analysis failed: timeout".into(),
        analysis_steps: Vec::new(),
        iterations: 0,
        success: false,
      }
    }
  };

  let mut updated = segment.clone();
  updated.analysis_result = outcome.analysis_result;
  updated.analysis_steps = outcome.analysis_steps;
  updated.status = if outcome.success { "analyzed".into() } else { "failed".into() };
  if let Err(e) = services.state.put_segment(&updated).await {
    warn!(workflow_id = %workflow_id, index, err = %e, "Could not persist segment result");
  }

  let analyzer_state = if outcome.success { StepState::Done } else { StepState::Failed };
  let analyzer_error = (!outcome.success).then(|| updated.analysis_result.clone());
  if let Err(e) = services
    .state
    .transition_step(workflow_id, analyzer_step, analyzer_state, analyzer_error)
    .await
  {
    warn!(workflow_id = %workflow_id, index, err = %e, "Could not finish analyzer step");
  }

  // Finalize regardless of analysis success; the index row carries the
  // failure text and a failed status stays visible downstream
  let finalizer_step = StepName::Finalizer(index);
  let _ = services
    .state
    .transition_step(workflow_id, finalizer_step, StepState::Running, None)
    .await;
  match finalizer::finalize_segment(&services.blob, &services.queues, head, &updated).await {
    Ok(()) => {
      let _ = services
        .state
        .transition_step(workflow_id, finalizer_step, StepState::Done, None)
        .await;
      (outcome.success, Some(updated.segment_id))
    }
    Err(e) => {
      warn!(workflow_id = %workflow_id, index, err = %e, "Finalization failed");
      let _ = services
        .state
        .transition_step(workflow_id, finalizer_step, StepState::Failed, Some(e.to_string()))
        .await;
      (false, None)
    }
  }
}

async fn download_image(services: &Services, uri_str: &str) -> Option<ImageState> {
  let uri = match StoreUri::parse(uri_str) {
    Ok(uri) => uri,
    Err(e) => {
      warn!(uri = %uri_str, err = %e, "Bad image URI");
      return None;
    }
  };

  match services.blob.get_bytes(&uri).await {
    Ok(bytes) => {
      let media_type = FileKind::from_file_name(uri.file_name()).mime();
      debug!(uri = %uri_str, len = bytes.len(), "Segment image downloaded");
      Some(ImageState::new(bytes, media_type))
    }
    Err(e) => {
      warn!(uri = %uri_str, err = %e, "Could not download segment image");
      None
    }
  }
}

/// Poll the index until every finalized segment of this workflow is
/// committed, or the drain timeout passes (logged, not fatal - the records
/// land eventually and the summary simply covers what is there).
async fn wait_for_drain(services: &Services, document_id: &str, finalized_ids: &[String]) {
  if finalized_ids.is_empty() {
    return;
  }

  let deadline = Instant::now() + std::time::Duration::from_secs(services.config.pipeline.writer_drain_timeout_secs);
  loop {
    match services.index.get_segments(document_id).await {
      Ok(records) => {
        let committed: std::collections::HashSet<&str> = records.iter().map(|r| r.segment_id.as_str()).collect();
        if finalized_ids.iter().all(|id| committed.contains(id.as_str())) {
          return;
        }
      }
      Err(e) => warn!(document_id = %document_id, err = %e, "Drain check failed"),
    }

    if Instant::now() >= deadline {
      warn!(document_id = %document_id, "Index writer drain timed out");
      return;
    }
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
  }
}

async fn fail(services: &Services, head: &WorkflowHead, reason: &str) -> Result<()> {
  warn!(workflow_id = %head.workflow_id, reason, "Workflow failed");
  services
    .state
    .update_workflow_status(
      &head.document_id,
      &head.workflow_id,
      WorkflowStatus::Failed,
      Some(reason.to_string()),
    )
    .await
    .map_err(PipelineError::from)?;
  Ok(())
}
