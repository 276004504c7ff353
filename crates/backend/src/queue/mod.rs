//! Track queues joining the pipeline workers.
//!
//! Components hand work to each other through bounded `mpsc` channels owned
//! by a [`Queues`] bundle; when a downstream worker is saturated the sender
//! blocks, propagating back-pressure to the router. Hand-offs are also
//! recorded in the workflow state store, so a consumer that dies mid-message
//! leaves an inspectable step state behind.
//!
//! The external tracks (OCR, BDA, Transcribe, Webcrawler) are consumed by
//! collaborators outside this crate; their receivers are surfaced through
//! [`QueueReceivers`].

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::agent::AnalysisStep;
use crate::domain::mime::ProcessingType;

/// Error when sending to a queue whose consumer has shut down
#[derive(Debug, Clone, thiserror::Error)]
#[error("Queue consumer has shut down")]
pub struct QueueClosed;

/// Cheap-to-clone sending half of a track queue
#[derive(Debug)]
pub struct Queue<T> {
  tx: mpsc::Sender<T>,
}

impl<T> Clone for Queue<T> {
  fn clone(&self) -> Self {
    Self { tx: self.tx.clone() }
  }
}

impl<T> Queue<T> {
  pub fn new(tx: mpsc::Sender<T>) -> Self {
    Self { tx }
  }

  pub async fn send(&self, message: T) -> Result<(), QueueClosed> {
    self.tx.send(message).await.map_err(|_| QueueClosed)
  }
}

/// Common envelope carried on every track message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackEnvelope {
  pub workflow_id: String,
  pub document_id: String,
  pub project_id: String,
  pub file_uri: String,
  pub file_name: String,
  pub file_type: String,
  pub language: String,
}

/// Message for the OCR / BDA / Transcribe / Webcrawler queues
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackMessage {
  #[serde(flatten)]
  pub envelope: TrackEnvelope,
  /// Which track this message was fanned out to
  pub processor: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ocr_model: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ocr_options: Option<serde_json::Value>,
}

/// Message for the workflow queue, consumed by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMessage {
  #[serde(flatten)]
  pub envelope: TrackEnvelope,
  pub processing_type: ProcessingType,
  pub use_bda: bool,
  #[serde(default)]
  pub document_prompt: String,
}

/// Message from the analysis finalizer to the index writer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexWriteMessage {
  pub document_id: String,
  pub segment_id: String,
  pub segment_index: usize,
  pub status: String,
  pub tools: ToolOutputs,
  pub content_combined: String,
  pub file_uri: String,
  pub file_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image_uri: Option<String>,
}

/// Per-tool output arrays stored as `tools_json` on the index record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOutputs {
  #[serde(default)]
  pub bda_indexer: Vec<ToolOutput>,
  #[serde(default)]
  pub pdf_text_extractor: Vec<ToolOutput>,
  #[serde(default)]
  pub image_analysis: Vec<ImageAnalysisOutput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
  pub content: String,
  /// ISO-8601 UTC
  pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAnalysisOutput {
  pub content: String,
  #[serde(default)]
  pub steps: Vec<AnalysisStep>,
  /// ISO-8601 UTC
  pub timestamp: String,
}

/// Sending halves of every queue, cloned into each producer
#[derive(Debug, Clone)]
pub struct Queues {
  /// Upload notifications feeding the event router
  pub uploads: Queue<serde_json::Value>,
  pub ocr: Queue<TrackMessage>,
  pub bda: Queue<TrackMessage>,
  pub transcribe: Queue<TrackMessage>,
  pub webcrawler: Queue<TrackMessage>,
  pub workflow: Queue<WorkflowMessage>,
  pub index_write: Queue<IndexWriteMessage>,
}

/// Receiving halves, handed to the workers (and to external collaborators
/// for the preprocessing tracks)
pub struct QueueReceivers {
  pub uploads: mpsc::Receiver<serde_json::Value>,
  pub ocr: mpsc::Receiver<TrackMessage>,
  pub bda: mpsc::Receiver<TrackMessage>,
  pub transcribe: mpsc::Receiver<TrackMessage>,
  pub webcrawler: mpsc::Receiver<TrackMessage>,
  pub workflow: mpsc::Receiver<WorkflowMessage>,
  pub index_write: mpsc::Receiver<IndexWriteMessage>,
}

impl Queues {
  /// Create all queues with the given bounded capacity
  pub fn bounded(capacity: usize) -> (Queues, QueueReceivers) {
    let (uploads_tx, uploads_rx) = mpsc::channel(capacity);
    let (ocr_tx, ocr_rx) = mpsc::channel(capacity);
    let (bda_tx, bda_rx) = mpsc::channel(capacity);
    let (transcribe_tx, transcribe_rx) = mpsc::channel(capacity);
    let (webcrawler_tx, webcrawler_rx) = mpsc::channel(capacity);
    let (workflow_tx, workflow_rx) = mpsc::channel(capacity);
    let (index_write_tx, index_write_rx) = mpsc::channel(capacity);

    let queues = Queues {
      uploads: Queue::new(uploads_tx),
      ocr: Queue::new(ocr_tx),
      bda: Queue::new(bda_tx),
      transcribe: Queue::new(transcribe_tx),
      webcrawler: Queue::new(webcrawler_tx),
      workflow: Queue::new(workflow_tx),
      index_write: Queue::new(index_write_tx),
    };

    let receivers = QueueReceivers {
      uploads: uploads_rx,
      ocr: ocr_rx,
      bda: bda_rx,
      transcribe: transcribe_rx,
      webcrawler: webcrawler_rx,
      workflow: workflow_rx,
      index_write: index_write_rx,
    };

    (queues, receivers)
  }
}
