//! Typed workflow operations over the state store.
//!
//! Wraps the raw `(PK, SK)` row operations with the workflow head, step map,
//! and segment record layout. Step transitions are validated here so an
//! illegal transition never reaches disk.

use chrono::Utc;
use tracing::debug;

use super::{Result, StateError, StateStore};
use crate::domain::{
  config::{DocumentConfig, ProjectConfig},
  workflow::{SegmentRow, StepMap, StepName, StepState, StepStatus, WorkflowHead, WorkflowStatus},
};

fn doc_pk(document_id: &str) -> String {
  format!("DOC#{document_id}")
}

fn wf_pk(workflow_id: &str) -> String {
  format!("WF#{workflow_id}")
}

fn wf_sk(workflow_id: &str) -> String {
  format!("WF#{workflow_id}")
}

fn seg_sk(index: usize) -> String {
  format!("SEG#{index:04}")
}

impl StateStore {
  /// Create the workflow head row and its seeded step map.
  ///
  /// Tracks in `enabled_tracks` start `PENDING`; the remaining external
  /// tracks start `SKIPPED`. The internal pipeline stages always start
  /// `PENDING`.
  pub async fn create_workflow(&self, head: &WorkflowHead, enabled_tracks: &[StepName]) -> Result<()> {
    self.put(&doc_pk(&head.document_id), &wf_sk(&head.workflow_id), head).await?;

    let mut steps = StepMap::new();
    for track in StepName::TRACKS {
      let status = if enabled_tracks.contains(&track) {
        StepStatus::pending()
      } else {
        StepStatus::skipped()
      };
      steps.insert(track.key(), status);
    }
    for stage in [StepName::FormatParser, StepName::SegmentBuilder, StepName::Summarizer] {
      steps.insert(stage.key(), StepStatus::pending());
    }

    self.put(&wf_pk(&head.workflow_id), "STEP", &steps).await?;

    debug!(
      workflow_id = %head.workflow_id,
      document_id = %head.document_id,
      enabled = enabled_tracks.len(),
      "Created workflow"
    );
    Ok(())
  }

  pub async fn get_workflow(&self, document_id: &str, workflow_id: &str) -> Result<Option<WorkflowHead>> {
    self.get(&doc_pk(document_id), &wf_sk(workflow_id)).await
  }

  /// All workflows for a document, sorted by workflow id
  pub async fn list_workflows(&self, document_id: &str) -> Result<Vec<WorkflowHead>> {
    let rows: Vec<(String, WorkflowHead)> = self.query_pk(&doc_pk(document_id), "WF#", 0, None).await?;
    Ok(rows.into_iter().map(|(_, head)| head).collect())
  }

  /// Update workflow status (and optionally the error message)
  pub async fn update_workflow_status(
    &self,
    document_id: &str,
    workflow_id: &str,
    status: WorkflowStatus,
    error: Option<String>,
  ) -> Result<WorkflowHead> {
    let workflow_id = workflow_id.to_string();
    self
      .update(&doc_pk(document_id), &wf_sk(&workflow_id), move |head: Option<WorkflowHead>| {
        let mut head = head.ok_or_else(|| StateError::NotFound(format!("workflow {workflow_id}")))?;
        head.status = status;
        if error.is_some() {
          head.error = error;
        }
        head.updated_at = Utc::now();
        Ok(head)
      })
      .await
  }

  /// The aggregate step map for a workflow (empty if never written)
  pub async fn get_steps(&self, workflow_id: &str) -> Result<StepMap> {
    Ok(self.get(&wf_pk(workflow_id), "STEP").await?.unwrap_or_default())
  }

  /// Transition one step, enforcing the monotone state machine.
  ///
  /// Per-segment steps that were never seeded are treated as `PENDING`.
  /// Returns [`StateError::IllegalTransition`] when the step is already in a
  /// terminal state or the transition skips `RUNNING`.
  pub async fn transition_step(
    &self,
    workflow_id: &str,
    step: StepName,
    next: StepState,
    error: Option<String>,
  ) -> Result<()> {
    let key = step.key();
    let transition_key = key.clone();

    self
      .update(&wf_pk(workflow_id), "STEP", move |steps: Option<StepMap>| {
        let mut steps = steps.unwrap_or_default();
        let entry = steps.entry(transition_key.clone()).or_insert_with(StepStatus::pending);

        if !entry.state.can_transition(next) {
          return Err(StateError::IllegalTransition {
            step: transition_key,
            from: format!("{:?}", entry.state),
            to: format!("{next:?}"),
          });
        }

        let now = Utc::now();
        entry.state = next;
        if next == StepState::Running {
          entry.started_at = Some(now);
        }
        if next.is_terminal() {
          entry.ended_at = Some(now);
        }
        if error.is_some() {
          entry.error = error.clone();
        }

        Ok(steps)
      })
      .await?;

    debug!(workflow_id = %workflow_id, step = %key, state = ?next, "Step transition");
    Ok(())
  }

  /// Current state of one step (`PENDING` when never written)
  pub async fn step_state(&self, workflow_id: &str, step: StepName) -> Result<StepState> {
    let steps = self.get_steps(workflow_id).await?;
    Ok(steps.get(&step.key()).map(|s| s.state).unwrap_or(StepState::Pending))
  }

  pub async fn put_segment(&self, segment: &SegmentRow) -> Result<()> {
    self
      .put(&wf_pk(&segment.workflow_id), &seg_sk(segment.segment_index), segment)
      .await
  }

  /// Segments for a workflow, in ascending segment index
  pub async fn list_segments(&self, workflow_id: &str) -> Result<Vec<SegmentRow>> {
    let rows: Vec<(String, SegmentRow)> = self.query_pk(&wf_pk(workflow_id), "SEG#", 0, None).await?;
    Ok(rows.into_iter().map(|(_, segment)| segment).collect())
  }

  /// Delete a workflow: head row plus every row under `WF#{workflow_id}`.
  /// Returns the number of rows removed.
  pub async fn delete_workflow(&self, document_id: &str, workflow_id: &str) -> Result<usize> {
    self.delete(&doc_pk(document_id), &wf_sk(workflow_id)).await?;
    let removed = self.delete_pk(&wf_pk(workflow_id)).await?;
    Ok(removed + 1)
  }

  // Settings rows, written by the external CRUD surface

  pub async fn get_document_config(&self, document_id: &str) -> Result<Option<DocumentConfig>> {
    self.get(&doc_pk(document_id), "META").await
  }

  pub async fn put_document_config(&self, document_id: &str, config: &DocumentConfig) -> Result<()> {
    self.put(&doc_pk(document_id), "META", config).await
  }

  pub async fn get_project_config(&self, project_id: &str) -> Result<Option<ProjectConfig>> {
    self.get(&format!("PROJECT#{project_id}"), "META").await
  }

  pub async fn put_project_config(&self, project_id: &str, config: &ProjectConfig) -> Result<()> {
    self.put(&format!("PROJECT#{project_id}"), "META", config).await
  }
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;
  use crate::domain::config::ResolvedSettings;

  fn head(workflow_id: &str, document_id: &str) -> WorkflowHead {
    WorkflowHead {
      workflow_id: workflow_id.into(),
      document_id: document_id.into(),
      project_id: "p1".into(),
      file_uri: "store://bucket/projects/p1/documents/d1/a.pdf".into(),
      file_name: "a.pdf".into(),
      file_type: "application/pdf".into(),
      status: WorkflowStatus::Created,
      settings: ResolvedSettings::default(),
      source_url: String::new(),
      crawl_instruction: String::new(),
      error: None,
      started_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  async fn open_store() -> (TempDir, StateStore) {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(dir.path().join("state")).await.unwrap();
    (dir, store)
  }

  #[tokio::test]
  async fn create_seeds_disabled_tracks_as_skipped() {
    let (_dir, store) = open_store().await;
    store.create_workflow(&head("w1", "d1"), &[StepName::Ocr]).await.unwrap();

    let steps = store.get_steps("w1").await.unwrap();
    assert_eq!(steps.get("OCR").unwrap().state, StepState::Pending);
    assert_eq!(steps.get("BDA").unwrap().state, StepState::Skipped);
    assert_eq!(steps.get("TRANSCRIBE").unwrap().state, StepState::Skipped);
    assert_eq!(steps.get("WEBCRAWLER").unwrap().state, StepState::Skipped);
    assert_eq!(steps.get("FORMAT_PARSER").unwrap().state, StepState::Pending);
    assert_eq!(steps.get("SUMMARIZER").unwrap().state, StepState::Pending);
  }

  #[tokio::test]
  async fn illegal_transitions_are_rejected() {
    let (_dir, store) = open_store().await;
    store.create_workflow(&head("w2", "d1"), &[]).await.unwrap();

    // PENDING -> DONE skips RUNNING
    let err = store
      .transition_step("w2", StepName::FormatParser, StepState::Done, None)
      .await
      .unwrap_err();
    assert!(matches!(err, StateError::IllegalTransition { .. }));

    store
      .transition_step("w2", StepName::FormatParser, StepState::Running, None)
      .await
      .unwrap();
    store
      .transition_step("w2", StepName::FormatParser, StepState::Done, None)
      .await
      .unwrap();

    // Terminal states are final
    let err = store
      .transition_step("w2", StepName::FormatParser, StepState::Running, None)
      .await
      .unwrap_err();
    assert!(matches!(err, StateError::IllegalTransition { .. }));
  }

  #[tokio::test]
  async fn segment_rows_come_back_ordered() {
    let (_dir, store) = open_store().await;

    for index in [2usize, 0, 1] {
      let segment = SegmentRow {
        workflow_id: "w3".into(),
        segment_id: SegmentRow::segment_id_for("w3", index),
        segment_index: index,
        image_uri: None,
        parsed_text: format!("page {index}"),
        bda_content: String::new(),
        analysis_result: String::new(),
        analysis_steps: Vec::new(),
        status: "created".into(),
      };
      store.put_segment(&segment).await.unwrap();
    }

    let segments = store.list_segments("w3").await.unwrap();
    let indices: Vec<usize> = segments.iter().map(|s| s.segment_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
  }

  #[tokio::test]
  async fn delete_workflow_cascades() {
    let (_dir, store) = open_store().await;
    store.create_workflow(&head("w4", "d2"), &[]).await.unwrap();
    store
      .put_segment(&SegmentRow {
        workflow_id: "w4".into(),
        segment_id: "w4-0000".into(),
        segment_index: 0,
        image_uri: None,
        parsed_text: String::new(),
        bda_content: String::new(),
        analysis_result: String::new(),
        analysis_steps: Vec::new(),
        status: "created".into(),
      })
      .await
      .unwrap();

    let removed = store.delete_workflow("d2", "w4").await.unwrap();
    assert_eq!(removed, 3); // head + STEP + SEG#0000

    assert!(store.get_workflow("d2", "w4").await.unwrap().is_none());
    assert!(store.list_segments("w4").await.unwrap().is_empty());
  }
}
