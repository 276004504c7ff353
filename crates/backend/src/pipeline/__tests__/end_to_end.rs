//! End-to-end pipeline scenarios: route -> poll -> parse -> segment ->
//! analyze -> finalize -> index -> summarize.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use super::helpers::{FailingEmbedder, ScriptedLlm, TestContext};
use crate::{
  domain::workflow::{StepName, StepState, WorkflowStatus},
  parser::build_pdf,
  pipeline::write_record,
  queue::{IndexWriteMessage, ToolOutputs},
  router::RouteResult,
};

async fn route_and_take_workflow(
  ctx: &mut TestContext,
  record: &serde_json::Value,
) -> (String, crate::queue::WorkflowMessage) {
  let result = ctx.router().handle_record(record).await.expect("route upload");
  let workflow_id = match result {
    RouteResult::Distributed { workflow_id, .. } => workflow_id,
    other => panic!("expected distribution, got {other:?}"),
  };

  let message = ctx
    .receivers
    .as_mut()
    .expect("receivers")
    .workflow
    .recv()
    .await
    .expect("workflow message");
  (workflow_id, message)
}

#[tokio::test]
async fn three_page_pdf_lands_in_the_index() {
  let mut ctx = TestContext::new().await;
  ctx.spawn_writer();

  // OCR off so the format parser is the only text source
  ctx
    .services
    .state
    .put_document_config(
      "d1",
      &crate::config::DocumentConfig {
        use_ocr: Some(false),
        ..Default::default()
      },
    )
    .await
    .unwrap();

  let pdf = build_pdf(&["alpha", "beta", "gamma"]);
  let record = ctx.upload("p1", "d1", "intro.pdf", &pdf).await;
  let (workflow_id, message) = route_and_take_workflow(&mut ctx, &record).await;

  crate::pipeline::run_workflow(&ctx.services, &message).await.unwrap();

  // Workflow completed and all three segments committed
  let head = ctx.services.state.get_workflow("d1", &workflow_id).await.unwrap().unwrap();
  assert_eq!(head.status, WorkflowStatus::Completed);

  let parser_result = ctx
    .services
    .blob
    .get_bytes(&crate::blob::DocumentPrefix::new("uploads", "p1", "d1").parser_result())
    .await
    .unwrap();
  let parsed: crate::document::ParseOutput = serde_json::from_slice(&parser_result).unwrap();
  assert_eq!(parsed.len(), 3);

  let records = ctx.services.index.get_segments("d1").await.unwrap();
  assert_eq!(records.len(), 3);
  let indices: Vec<usize> = records.iter().map(|r| r.segment_index).collect();
  assert_eq!(indices, vec![0, 1, 2]);
  for record in &records {
    assert_eq!(record.vector.len(), super::helpers::TEST_DIM);
    assert!(!record.zero_vector);
    assert_eq!(record.status, "summarized");
  }
  assert!(records[1].content_combined.contains("beta"));

  // Hybrid search surfaces the matching page first
  let hits = ctx.services.index.search("beta", 5).await.unwrap();
  assert!(!hits.is_empty());
  assert_eq!(hits[0].segment_index, 1);
  assert!(hits.len() <= 5);

  // Summary artifact exists
  let summary = ctx
    .services
    .blob
    .get_bytes(&crate::blob::DocumentPrefix::new("uploads", "p1", "d1").summary())
    .await
    .unwrap();
  let summary: serde_json::Value = serde_json::from_slice(&summary).unwrap();
  assert!(summary["summary"].as_str().is_some());

  // Step map is fully terminal
  let steps = ctx.services.state.get_steps(&workflow_id).await.unwrap();
  assert_eq!(steps.get("FORMAT_PARSER").unwrap().state, StepState::Done);
  assert_eq!(steps.get("SEGMENT_BUILDER").unwrap().state, StepState::Done);
  assert_eq!(steps.get("SUMMARIZER").unwrap().state, StepState::Done);
  for index in 0..3 {
    assert_eq!(
      steps.get(&StepName::SegmentAnalyzer(index).key()).unwrap().state,
      StepState::Done
    );
    assert_eq!(steps.get(&StepName::Finalizer(index).key()).unwrap().state, StepState::Done);
  }
}

#[tokio::test]
async fn spreadsheet_sheets_become_segments() {
  let mut ctx = TestContext::new().await;
  ctx.spawn_writer();

  let xlsx = crate::parser::build_xlsx(&[
    ("Sheet1", &[&["a", "b"][..], &["1", "2"][..]][..]),
    ("Sheet2", &[&["x"][..], &["y"][..]][..]),
  ]);
  let record = ctx.upload("p1", "d3", "table.xlsx", &xlsx).await;
  let (workflow_id, message) = route_and_take_workflow(&mut ctx, &record).await;

  crate::pipeline::run_workflow(&ctx.services, &message).await.unwrap();

  let head = ctx.services.state.get_workflow("d3", &workflow_id).await.unwrap().unwrap();
  assert_eq!(head.status, WorkflowStatus::Completed);

  let segments = ctx.services.state.list_segments(&workflow_id).await.unwrap();
  assert_eq!(segments.len(), 2);
  assert!(segments[0].parsed_text.starts_with("## Sheet: Sheet1"));
  assert!(segments[0].parsed_text.contains("| a | b |"));
  assert!(segments[0].parsed_text.contains("| 1 | 2 |"));
  assert!(segments[1].parsed_text.starts_with("## Sheet: Sheet2"));

  assert_eq!(ctx.services.index.get_segments("d3").await.unwrap().len(), 2);
}

#[tokio::test]
async fn unsupported_type_fails_with_no_segments() {
  let mut ctx = TestContext::new().await;
  ctx.spawn_writer();

  let record = ctx.upload("p1", "d4", "archive.zip", b"PK\x03\x04junk").await;
  let (workflow_id, message) = route_and_take_workflow(&mut ctx, &record).await;

  crate::pipeline::run_workflow(&ctx.services, &message).await.unwrap();

  let head = ctx.services.state.get_workflow("d4", &workflow_id).await.unwrap().unwrap();
  assert_eq!(head.status, WorkflowStatus::Failed);
  assert_eq!(head.error.as_deref(), Some("no_segments"));

  let steps = ctx.services.state.get_steps(&workflow_id).await.unwrap();
  // Unknown extension: every preprocessing track seeded skipped, the parser
  // skipped at run time
  for track in ["OCR", "BDA", "TRANSCRIBE", "WEBCRAWLER", "FORMAT_PARSER"] {
    assert_eq!(steps.get(track).unwrap().state, StepState::Skipped, "track {track}");
  }
  assert!(ctx.services.index.get_segments("d4").await.unwrap().is_empty());
}

#[tokio::test]
async fn embedder_failure_stores_zero_vector_and_fts_still_finds_it() {
  let embedder = Arc::new(FailingEmbedder {
    needle: "zebrafish".into(),
  });
  let mut ctx = TestContext::with_providers(embedder, Arc::new(ScriptedLlm::new())).await;
  ctx.spawn_writer();

  ctx
    .services
    .state
    .put_document_config(
      "d6",
      &crate::config::DocumentConfig {
        use_ocr: Some(false),
        ..Default::default()
      },
    )
    .await
    .unwrap();

  let pdf = build_pdf(&["first page", "the zebrafish study", "third page"]);
  let record = ctx.upload("p1", "d6", "report.pdf", &pdf).await;
  let (workflow_id, message) = route_and_take_workflow(&mut ctx, &record).await;

  crate::pipeline::run_workflow(&ctx.services, &message).await.unwrap();

  let head = ctx.services.state.get_workflow("d6", &workflow_id).await.unwrap().unwrap();
  assert_eq!(head.status, WorkflowStatus::Completed);

  let records = ctx.services.index.get_segments("d6").await.unwrap();
  assert_eq!(records.len(), 3);

  let failed = &records[1];
  assert!(failed.content_combined.contains("zebrafish"));
  assert!(failed.zero_vector, "segment 1 must be flagged retry-eligible");
  assert!(failed.vector.iter().all(|v| *v == 0.0));
  assert!(!records[0].zero_vector);

  // The keyword leg still surfaces the zero-vector record
  let hits = ctx.services.index.search("zebrafish", 5).await.unwrap();
  assert!(
    hits.iter().any(|r| r.segment_index == 1),
    "FTS must return the zero-vector segment"
  );
}

#[tokio::test]
async fn replayed_upload_creates_new_workflow_without_corrupting_segments() {
  let mut ctx = TestContext::new().await;
  ctx.spawn_writer();

  ctx
    .services
    .state
    .put_document_config(
      "d7",
      &crate::config::DocumentConfig {
        use_ocr: Some(false),
        ..Default::default()
      },
    )
    .await
    .unwrap();

  let pdf = build_pdf(&["one", "two"]);
  let record = ctx.upload("p1", "d7", "doc.pdf", &pdf).await;

  let (first_workflow, message) = route_and_take_workflow(&mut ctx, &record).await;
  crate::pipeline::run_workflow(&ctx.services, &message).await.unwrap();

  let first_records = ctx.services.index.get_segments("d7").await.unwrap();
  assert_eq!(first_records.len(), 2);
  let first_ids: Vec<String> = first_records.iter().map(|r| r.segment_id.clone()).collect();

  // Replay the same notification: a distinct workflow, same document
  let (second_workflow, message) = route_and_take_workflow(&mut ctx, &record).await;
  assert_ne!(first_workflow, second_workflow);
  crate::pipeline::run_workflow(&ctx.services, &message).await.unwrap();

  let after = ctx.services.index.get_segments("d7").await.unwrap();
  for id in &first_ids {
    assert!(
      after.iter().any(|r| &r.segment_id == id),
      "original segment {id} must survive the replay"
    );
  }
  assert_eq!(
    ctx.services.state.list_workflows("d7").await.unwrap().len(),
    2,
    "replay creates a second workflow"
  );
}

#[tokio::test]
async fn index_writer_is_idempotent() {
  let ctx = TestContext::new().await;

  let message = IndexWriteMessage {
    document_id: "d8".into(),
    segment_id: "w-0000".into(),
    segment_index: 0,
    status: "completed".into(),
    tools: ToolOutputs::default(),
    content_combined: "## PDF Text\nidempotent payload".into(),
    file_uri: "store://uploads/projects/p1/documents/d8/a.pdf".into(),
    file_type: "application/pdf".into(),
    image_uri: None,
  };

  write_record(&ctx.services, &message).await.unwrap();
  write_record(&ctx.services, &message).await.unwrap();

  let records = ctx.services.index.get_segments("d8").await.unwrap();
  assert_eq!(records.len(), 1, "replayed write must upsert, not duplicate");
  assert_eq!(records[0].content_combined, "## PDF Text\nidempotent payload");
}
