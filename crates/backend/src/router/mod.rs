//! Event router: classify uploads and fan out to the track queues.
//!
//! Consumes upload-notification records (`detail-type == "Object Created"`),
//! derives the file type from the extension, resolves per-document settings
//! (document override, then project default, then hard default), creates the
//! workflow head, and distributes track messages by the routing matrix:
//!
//! | file type            | OCR      | BDA     | TRANSCRIBE    | WEBCRAWLER | WORKFLOW |
//! |----------------------|----------|---------|---------------|------------|----------|
//! | PDF / image          | use_ocr  | use_bda | -             | -          | always   |
//! | video / audio        | -        | use_bda | use_transcribe| -          | always   |
//! | text / sheet / office| -        | -       | -             | -          | always   |
//! | webreq               | -        | -       | -             | yes        | always   |

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
  blob::{BlobStore, StoreUri},
  domain::{
    config::ResolvedSettings,
    document::WebreqDescriptor,
    mime::FileKind,
    workflow::{StepName, WorkflowHead, WorkflowStatus, generate_workflow_id},
  },
  queue::{Queues, TrackEnvelope, TrackMessage, WorkflowMessage},
  state::{StateError, StateStore},
};

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
  #[error("State store error: {0}")]
  State(#[from] StateError),
  #[error("Queue error: {0}")]
  Queue(#[from] crate::queue::QueueClosed),
}

pub type Result<T> = std::result::Result<T, RouterError>;

/// Best-effort capacity hint emitted when OCR work is dispatched, so the
/// OCR compute target can warm up ahead of the queue. Failures are
/// non-fatal.
#[async_trait::async_trait]
pub trait OcrWarmup: Send + Sync {
  async fn warm_up(&self) -> std::result::Result<(), String>;
}

/// Default warm-up: nothing to scale, just a log line
pub struct NoopWarmup;

#[async_trait::async_trait]
impl OcrWarmup for NoopWarmup {
  async fn warm_up(&self) -> std::result::Result<(), String> {
    debug!("OCR warm-up hint (noop)");
    Ok(())
  }
}

/// Per-record routing outcome
#[derive(Debug, Clone)]
pub enum RouteResult {
  Distributed {
    workflow_id: String,
    document_id: String,
    project_id: String,
    file_type: String,
    queues_sent: Vec<&'static str>,
  },
  /// Record skipped (wrong event shape, missing document id)
  Skipped { reason: String },
  Failed {
    error: String,
  },
}

/// Batch summary returned to the caller
#[derive(Debug, Default)]
pub struct RouteSummary {
  pub processed: usize,
  pub results: Vec<RouteResult>,
}

/// Fields parsed out of one upload notification
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUpload {
  pub project_id: String,
  pub document_id: String,
  pub file_uri: String,
  pub file_name: String,
  pub file_type: FileKind,
}

pub struct EventRouter {
  state: Arc<StateStore>,
  blob: Arc<BlobStore>,
  queues: Queues,
  warmup: Arc<dyn OcrWarmup>,
}

impl EventRouter {
  pub fn new(state: Arc<StateStore>, blob: Arc<BlobStore>, queues: Queues, warmup: Arc<dyn OcrWarmup>) -> Self {
    Self {
      state,
      blob,
      queues,
      warmup,
    }
  }

  /// Route a batch of upload-notification records.
  pub async fn handle_batch(&self, records: &[Value]) -> RouteSummary {
    let mut summary = RouteSummary::default();

    for record in records {
      let result = match self.handle_record(record).await {
        Ok(result) => result,
        Err(e) => {
          warn!(err = %e, "Error processing upload record");
          RouteResult::Failed { error: e.to_string() }
        }
      };
      summary.results.push(result);
    }

    summary.processed = summary.results.len();
    summary
  }

  /// Route one upload-notification record.
  pub async fn handle_record(&self, record: &Value) -> Result<RouteResult> {
    let Some(parsed) = parse_upload_notification(record) else {
      let detail_type = record.get("detail-type").and_then(Value::as_str).unwrap_or("<none>");
      warn!(detail_type, "Skipping unsupported event");
      return Ok(RouteResult::Skipped {
        reason: format!("unsupported event: {detail_type}"),
      });
    };

    if parsed.document_id.is_empty() {
      warn!(file_uri = %parsed.file_uri, "Skipping event: document_id not found in path");
      return Ok(RouteResult::Skipped {
        reason: "document_id not found in path".into(),
      });
    }

    let workflow_id = generate_workflow_id();

    // Resolve settings: document override > project default > hard default
    let document_config = self.state.get_document_config(&parsed.document_id).await?;
    let project_config = self.state.get_project_config(&parsed.project_id).await?;
    let settings = ResolvedSettings::resolve(document_config.as_ref(), project_config.as_ref());
    debug!(
      project_id = %parsed.project_id,
      language = %settings.language,
      use_ocr = settings.use_ocr,
      use_bda = settings.use_bda,
      "Resolved document settings"
    );

    // Webreq descriptors carry the crawl target
    let (source_url, crawl_instruction) = if parsed.file_type == FileKind::Webreq {
      self.read_webreq(&parsed.file_uri).await
    } else {
      (String::new(), String::new())
    };

    let enabled = enabled_tracks(parsed.file_type, &settings);
    let now = Utc::now();
    let head = WorkflowHead {
      workflow_id: workflow_id.clone(),
      document_id: parsed.document_id.clone(),
      project_id: parsed.project_id.clone(),
      file_uri: parsed.file_uri.clone(),
      file_name: parsed.file_name.clone(),
      file_type: parsed.file_type.mime().to_string(),
      status: WorkflowStatus::Created,
      settings: settings.clone(),
      source_url,
      crawl_instruction,
      error: None,
      started_at: now,
      updated_at: now,
    };
    self.state.create_workflow(&head, &enabled).await?;
    info!(workflow_id = %workflow_id, document_id = %parsed.document_id, "Created workflow record");

    let queues_sent = self.distribute(&parsed, &workflow_id, &settings, &enabled).await?;

    Ok(RouteResult::Distributed {
      workflow_id,
      document_id: parsed.document_id,
      project_id: parsed.project_id,
      file_type: parsed.file_type.mime().to_string(),
      queues_sent,
    })
  }

  async fn distribute(
    &self,
    parsed: &ParsedUpload,
    workflow_id: &str,
    settings: &ResolvedSettings,
    enabled: &[StepName],
  ) -> Result<Vec<&'static str>> {
    let envelope = TrackEnvelope {
      workflow_id: workflow_id.to_string(),
      document_id: parsed.document_id.clone(),
      project_id: parsed.project_id.clone(),
      file_uri: parsed.file_uri.clone(),
      file_name: parsed.file_name.clone(),
      file_type: parsed.file_type.mime().to_string(),
      language: settings.language.clone(),
    };

    let track_message = |processor: &str| TrackMessage {
      envelope: envelope.clone(),
      processor: processor.to_string(),
      ocr_model: None,
      ocr_options: None,
    };

    let mut queues_sent = Vec::new();

    if enabled.contains(&StepName::Webcrawler) {
      self.queues.webcrawler.send(track_message("WEBCRAWLER")).await?;
      queues_sent.push("webcrawler");
      info!(workflow_id = %workflow_id, "Sent to WebCrawler queue");
    }

    if enabled.contains(&StepName::Ocr) {
      let mut message = track_message("OCR");
      message.ocr_model = Some(settings.ocr_model.clone());
      message.ocr_options = Some(settings.ocr_options.clone());
      self.queues.ocr.send(message).await?;
      queues_sent.push("ocr");
      info!(workflow_id = %workflow_id, model = %settings.ocr_model, "Sent to OCR queue");

      // Nudge the OCR compute target awake; failure is non-fatal
      if let Err(e) = self.warmup.warm_up().await {
        warn!(err = %e, "Failed to trigger OCR warm-up");
      }
    }

    if enabled.contains(&StepName::Bda) {
      self.queues.bda.send(track_message("BDA")).await?;
      queues_sent.push("bda");
      info!(workflow_id = %workflow_id, "Sent to BDA queue");
    }

    if enabled.contains(&StepName::Transcribe) {
      self.queues.transcribe.send(track_message("TRANSCRIBE")).await?;
      queues_sent.push("transcribe");
      info!(workflow_id = %workflow_id, "Sent to Transcribe queue");
    }

    // The workflow queue always gets a message; the orchestrator polls the
    // tracks for completion
    self
      .queues
      .workflow
      .send(WorkflowMessage {
        envelope,
        processing_type: parsed.file_type.processing_type(),
        use_bda: settings.use_bda,
        document_prompt: settings.document_prompt.clone(),
      })
      .await?;
    queues_sent.push("workflow");
    info!(workflow_id = %workflow_id, "Sent to Workflow queue");

    Ok(queues_sent)
  }

  async fn read_webreq(&self, file_uri: &str) -> (String, String) {
    let parse = async {
      let uri = StoreUri::parse(file_uri).ok()?;
      let bytes = self.blob.get_bytes(&uri).await.ok()?;
      serde_json::from_slice::<WebreqDescriptor>(&bytes).ok()
    };

    match parse.await {
      Some(descriptor) => (descriptor.url, descriptor.instruction),
      None => {
        warn!(file_uri = %file_uri, "Failed to parse .webreq file");
        (String::new(), String::new())
      }
    }
  }
}

/// Which external tracks fan out for this upload, per the routing matrix.
pub fn enabled_tracks(kind: FileKind, settings: &ResolvedSettings) -> Vec<StepName> {
  let mut enabled = Vec::new();
  let is_webreq = kind == FileKind::Webreq;

  if is_webreq {
    enabled.push(StepName::Webcrawler);
    return enabled;
  }

  if (kind == FileKind::Pdf || kind.is_image()) && settings.use_ocr {
    enabled.push(StepName::Ocr);
  }
  if settings.use_bda && !kind.is_office_document() && !kind.is_spreadsheet() {
    enabled.push(StepName::Bda);
  }
  if (kind.is_video() || kind.is_audio()) && settings.use_transcribe {
    enabled.push(StepName::Transcribe);
  }

  enabled
}

/// Parse one upload-notification record; `None` for other event shapes.
pub fn parse_upload_notification(body: &Value) -> Option<ParsedUpload> {
  if body.get("detail-type")?.as_str()? != "Object Created" {
    return None;
  }

  let detail = body.get("detail")?;
  let bucket = detail.get("bucket")?.get("name")?.as_str()?;
  let key = detail.get("object")?.get("key")?.as_str()?;
  if bucket.is_empty() || key.is_empty() {
    return None;
  }

  let file_name = key.rsplit('/').next().unwrap_or(key).to_string();

  Some(ParsedUpload {
    project_id: extract_project_id(key),
    document_id: extract_document_id(key),
    file_uri: format!("store://{bucket}/{key}"),
    file_name: file_name.clone(),
    file_type: FileKind::from_file_name(&file_name),
  })
}

/// `projects/{project_id}/...` - falls back to `default`
fn extract_project_id(key: &str) -> String {
  let parts: Vec<&str> = key.split('/').collect();
  if parts.len() >= 2 && parts[0] == "projects" {
    parts[1].to_string()
  } else {
    "default".to_string()
  }
}

/// `.../documents/{document_id}/...` - empty when absent
fn extract_document_id(key: &str) -> String {
  let parts: Vec<&str> = key.split('/').collect();
  match parts.iter().position(|p| *p == "documents") {
    Some(at) if at + 1 < parts.len() => parts[at + 1].to_string(),
    _ => String::new(),
  }
}
