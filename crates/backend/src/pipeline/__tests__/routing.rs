//! Routing scenarios: OCR fan-out with the vision agent, webreq crawling,
//! and malformed events.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use super::helpers::{ScriptedLlm, TestContext, final_response, png_bytes, tool_use_response};
use crate::{
  domain::workflow::{StepName, StepState, WorkflowStatus},
  router::RouteResult,
};

#[tokio::test]
async fn png_with_ocr_runs_the_vision_agent() {
  // Scripted agent: check orientation, one targeted question, then report
  let llm = Arc::new(ScriptedLlm::with_script(vec![
    tool_use_response("rotate_image", serde_json::json!({"degrees": 180})),
    tool_use_response("analyze_image", serde_json::json!({"question": "What does the diagram show?"})),
    final_response("## Document Overview\nA rotated architecture diagram."),
  ]));
  let mut ctx = TestContext::with_providers(Arc::new(super::helpers::HashEmbedder), llm).await;
  ctx.spawn_writer();

  let record = ctx.upload("p1", "d2", "diagram.png", &png_bytes()).await;
  let result = ctx.router().handle_record(&record).await.unwrap();
  let workflow_id = match result {
    RouteResult::Distributed {
      workflow_id,
      queues_sent,
      ..
    } => {
      // OCR is on by default for images
      assert_eq!(queues_sent, vec!["ocr", "workflow"]);
      workflow_id
    }
    other => panic!("expected distribution, got {other:?}"),
  };

  // The OCR queue received the resolved model settings
  let ocr_message = ctx.receivers.as_mut().unwrap().ocr.recv().await.unwrap();
  assert_eq!(ocr_message.processor, "OCR");
  assert_eq!(ocr_message.ocr_model.as_deref(), Some("paddleocr-vl"));

  // Stand in for the external OCR worker: run and complete
  ctx
    .services
    .state
    .transition_step(&workflow_id, StepName::Ocr, StepState::Running, None)
    .await
    .unwrap();
  ctx
    .services
    .state
    .transition_step(&workflow_id, StepName::Ocr, StepState::Done, None)
    .await
    .unwrap();

  let message = ctx.receivers.as_mut().unwrap().workflow.recv().await.unwrap();
  crate::pipeline::run_workflow(&ctx.services, &message).await.unwrap();

  let head = ctx.services.state.get_workflow("d2", &workflow_id).await.unwrap().unwrap();
  assert_eq!(head.status, WorkflowStatus::Completed);

  let steps = ctx.services.state.get_steps(&workflow_id).await.unwrap();
  assert_eq!(steps.get("FORMAT_PARSER").unwrap().state, StepState::Skipped);

  // One segment at index 0, backed by the uploaded image itself
  let segments = ctx.services.state.list_segments(&workflow_id).await.unwrap();
  assert_eq!(segments.len(), 1);
  assert_eq!(segments[0].segment_index, 0);
  assert!(segments[0].image_uri.as_deref().unwrap().ends_with("diagram.png"));

  // The agent left a step trail with a bounded number of rotations
  assert!(!segments[0].analysis_steps.is_empty());
  let rotations = segments[0].analysis_steps.iter().filter(|s| s.tool == "rotate_image").count();
  assert!(rotations <= 3, "expected at most 3 rotations, saw {rotations}");
  assert!(segments[0].analysis_result.contains("architecture diagram"));

  assert_eq!(ctx.services.index.get_segments("d2").await.unwrap().len(), 1);
}

#[tokio::test]
async fn webreq_routes_to_the_webcrawler() {
  let mut ctx = TestContext::new().await;

  let descriptor = serde_json::json!({"url": "https://ex.com", "instruction": "fetch top"});
  let record = ctx
    .upload("p1", "d5", "crawl.webreq", descriptor.to_string().as_bytes())
    .await;

  let result = ctx.router().handle_record(&record).await.unwrap();
  let workflow_id = match result {
    RouteResult::Distributed {
      workflow_id,
      queues_sent,
      file_type,
      ..
    } => {
      assert_eq!(queues_sent, vec!["webcrawler", "workflow"]);
      assert_eq!(file_type, "application/x-webreq");
      workflow_id
    }
    other => panic!("expected distribution, got {other:?}"),
  };

  // The crawler queue got one message
  let crawl_message = ctx.receivers.as_mut().unwrap().webcrawler.recv().await.unwrap();
  assert_eq!(crawl_message.processor, "WEBCRAWLER");
  assert_eq!(crawl_message.envelope.workflow_id, workflow_id);

  // The workflow record carries the crawl target
  let head = ctx.services.state.get_workflow("d5", &workflow_id).await.unwrap().unwrap();
  assert_eq!(head.source_url, "https://ex.com");
  assert_eq!(head.crawl_instruction, "fetch top");

  // Other tracks are skipped; the crawler is pending
  let steps = ctx.services.state.get_steps(&workflow_id).await.unwrap();
  assert_eq!(steps.get("WEBCRAWLER").unwrap().state, StepState::Pending);
  for track in ["OCR", "BDA", "TRANSCRIBE"] {
    assert_eq!(steps.get(track).unwrap().state, StepState::Skipped, "track {track}");
  }

  // The workflow queue message is classified as web processing
  let message = ctx.receivers.as_mut().unwrap().workflow.recv().await.unwrap();
  assert_eq!(message.processing_type, crate::mime::ProcessingType::Web);
}

#[tokio::test]
async fn malformed_records_are_skipped_not_failed() {
  let ctx = TestContext::new().await;
  let router = ctx.router();

  let summary = router
    .handle_batch(&[
      serde_json::json!({"detail-type": "Object Deleted"}),
      super::helpers::notification("uploads", "stray/file.pdf"),
    ])
    .await;

  assert_eq!(summary.processed, 2);
  for result in &summary.results {
    assert!(matches!(result, RouteResult::Skipped { .. }), "got {result:?}");
  }
}
