//! Workflow, step, and segment records.
//!
//! A workflow is one ingestion attempt for one uploaded file. It owns a set
//! of step records (one per preprocessing track plus the pipeline stages) and
//! an ordered list of segments. Step state transitions are monotone and
//! enforced at the caller; once a step reaches a terminal state it never
//! changes again.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AnalysisStep;
use crate::domain::config::ResolvedSettings;

/// Generate a workflow id: URL-safe, time-ordered, 32 hex chars
pub fn generate_workflow_id() -> String {
  Uuid::now_v7().simple().to_string()
}

/// Lifecycle state of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
  Created,
  Preprocessing,
  Analyzing,
  Completed,
  Failed,
}

impl WorkflowStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Completed | Self::Failed)
  }
}

/// Workflow head record, stored under `PK=DOC#{document_id}, SK=WF#{workflow_id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowHead {
  pub workflow_id: String,
  pub document_id: String,
  pub project_id: String,
  pub file_uri: String,
  pub file_name: String,
  pub file_type: String,
  pub status: WorkflowStatus,
  pub settings: ResolvedSettings,
  #[serde(default)]
  pub source_url: String,
  #[serde(default)]
  pub crawl_instruction: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub started_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Name of a step on a workflow.
///
/// The per-segment stages carry the segment index; their wire form is
/// `SEGMENT_ANALYZER#0007` / `FINALIZER#0007`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StepName {
  Ocr,
  Bda,
  Transcribe,
  Webcrawler,
  FormatParser,
  SegmentBuilder,
  SegmentAnalyzer(usize),
  Finalizer(usize),
  Summarizer,
}

impl StepName {
  /// The external preprocessing tracks, in fan-out order
  pub const TRACKS: [StepName; 4] = [StepName::Ocr, StepName::Bda, StepName::Transcribe, StepName::Webcrawler];

  pub fn key(&self) -> String {
    match self {
      Self::Ocr => "OCR".into(),
      Self::Bda => "BDA".into(),
      Self::Transcribe => "TRANSCRIBE".into(),
      Self::Webcrawler => "WEBCRAWLER".into(),
      Self::FormatParser => "FORMAT_PARSER".into(),
      Self::SegmentBuilder => "SEGMENT_BUILDER".into(),
      Self::SegmentAnalyzer(i) => format!("SEGMENT_ANALYZER#{i:04}"),
      Self::Finalizer(i) => format!("FINALIZER#{i:04}"),
      Self::Summarizer => "SUMMARIZER".into(),
    }
  }

  pub fn parse(key: &str) -> Option<Self> {
    match key {
      "OCR" => Some(Self::Ocr),
      "BDA" => Some(Self::Bda),
      "TRANSCRIBE" => Some(Self::Transcribe),
      "WEBCRAWLER" => Some(Self::Webcrawler),
      "FORMAT_PARSER" => Some(Self::FormatParser),
      "SEGMENT_BUILDER" => Some(Self::SegmentBuilder),
      "SUMMARIZER" => Some(Self::Summarizer),
      other => {
        let (name, index) = other.split_once('#')?;
        let index = index.parse().ok()?;
        match name {
          "SEGMENT_ANALYZER" => Some(Self::SegmentAnalyzer(index)),
          "FINALIZER" => Some(Self::Finalizer(index)),
          _ => None,
        }
      }
    }
  }

  /// Is this one of the external preprocessing tracks polled by the
  /// status checker?
  pub fn is_track(&self) -> bool {
    matches!(self, Self::Ocr | Self::Bda | Self::Transcribe | Self::Webcrawler)
  }
}

impl std::fmt::Display for StepName {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.key())
  }
}

/// Lifecycle state of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
  Pending,
  Running,
  Done,
  Skipped,
  Failed,
}

impl StepState {
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Done | Self::Skipped | Self::Failed)
  }

  /// Whether the monotone state machine permits `self -> next`.
  ///
  /// `PENDING -> RUNNING -> {DONE | SKIPPED | FAILED}`; a step may also be
  /// skipped directly from `PENDING`. Terminal states are final.
  pub fn can_transition(&self, next: StepState) -> bool {
    match self {
      Self::Pending => matches!(next, Self::Running | Self::Skipped),
      Self::Running => matches!(next, Self::Done | Self::Skipped | Self::Failed),
      _ => false,
    }
  }
}

/// Status entry for one step in the workflow step map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStatus {
  pub state: StepState,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ended_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl StepStatus {
  pub fn pending() -> Self {
    Self {
      state: StepState::Pending,
      started_at: None,
      ended_at: None,
      error: None,
    }
  }

  pub fn skipped() -> Self {
    Self {
      state: StepState::Skipped,
      started_at: None,
      ended_at: Some(Utc::now()),
      error: None,
    }
  }
}

/// Aggregate step map stored under `PK=WF#{workflow_id}, SK=STEP`
pub type StepMap = BTreeMap<String, StepStatus>;

/// Per-segment record stored under `PK=WF#{workflow_id}, SK=SEG#{nnnn}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRow {
  pub workflow_id: String,
  pub segment_id: String,
  pub segment_index: usize,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image_uri: Option<String>,
  #[serde(default)]
  pub parsed_text: String,
  #[serde(default)]
  pub bda_content: String,
  #[serde(default)]
  pub analysis_result: String,
  #[serde(default)]
  pub analysis_steps: Vec<AnalysisStep>,
  pub status: String,
}

impl SegmentRow {
  pub fn segment_id_for(workflow_id: &str, index: usize) -> String {
    format!("{workflow_id}-{index:04}")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn step_name_wire_form_roundtrips() {
    for step in [
      StepName::Ocr,
      StepName::Bda,
      StepName::Transcribe,
      StepName::Webcrawler,
      StepName::FormatParser,
      StepName::SegmentBuilder,
      StepName::SegmentAnalyzer(7),
      StepName::Finalizer(12),
      StepName::Summarizer,
    ] {
      assert_eq!(StepName::parse(&step.key()), Some(step));
    }
    assert_eq!(StepName::SegmentAnalyzer(7).key(), "SEGMENT_ANALYZER#0007");
    assert_eq!(StepName::parse("NOT_A_STEP"), None);
  }

  #[test]
  fn transitions_are_monotone() {
    assert!(StepState::Pending.can_transition(StepState::Running));
    assert!(StepState::Pending.can_transition(StepState::Skipped));
    assert!(!StepState::Pending.can_transition(StepState::Done));
    assert!(StepState::Running.can_transition(StepState::Done));
    assert!(StepState::Running.can_transition(StepState::Failed));
    assert!(StepState::Running.can_transition(StepState::Skipped));
    assert!(!StepState::Running.can_transition(StepState::Pending));

    for terminal in [StepState::Done, StepState::Skipped, StepState::Failed] {
      for next in [
        StepState::Pending,
        StepState::Running,
        StepState::Done,
        StepState::Skipped,
        StepState::Failed,
      ] {
        assert!(!terminal.can_transition(next), "{terminal:?} -> {next:?} must be rejected");
      }
    }
  }

  #[test]
  fn workflow_ids_are_url_safe() {
    let id = generate_workflow_id();
    assert!(id.len() >= 12);
    assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
  }
}
