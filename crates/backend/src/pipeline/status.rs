//! Preprocess completion check.
//!
//! The orchestrator polls this while a workflow sits in `PREPROCESSING`.
//! A track counts as complete when it is `DONE` or `SKIPPED`; once every
//! track is complete and none failed, the check also reports whether any
//! segment analyzer from a previous delivery is still running.

use std::collections::BTreeMap;

use crate::{
  domain::workflow::{StepName, StepState},
  state::{StateError, StateStore},
};

/// Aggregate preprocessing status for one workflow
#[derive(Debug, Clone)]
pub struct PreprocessCheck {
  pub all_completed: bool,
  pub any_failed: bool,
  pub analysis_busy: bool,
  /// Per-track state, keyed by step name
  pub status: BTreeMap<String, StepState>,
}

pub async fn check_preprocess_status(
  state: &StateStore,
  workflow_id: &str,
) -> Result<PreprocessCheck, StateError> {
  let steps = state.get_steps(workflow_id).await?;

  let mut status = BTreeMap::new();
  let mut all_completed = true;
  let mut any_failed = false;

  for track in StepName::TRACKS {
    let track_state = steps
      .get(&track.key())
      .map(|s| s.state)
      .unwrap_or(StepState::Pending);
    status.insert(track.key(), track_state);

    match track_state {
      StepState::Done | StepState::Skipped => {}
      StepState::Failed => {
        any_failed = true;
        all_completed = false;
      }
      StepState::Pending | StepState::Running => all_completed = false,
    }
  }

  let analysis_busy = if all_completed && !any_failed {
    steps.iter().any(|(key, step)| {
      matches!(StepName::parse(key), Some(StepName::SegmentAnalyzer(_))) && step.state == StepState::Running
    })
  } else {
    false
  };

  Ok(PreprocessCheck {
    all_completed,
    any_failed,
    analysis_busy,
    status,
  })
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use tempfile::TempDir;

  use super::*;
  use crate::domain::{
    config::ResolvedSettings,
    workflow::{WorkflowHead, WorkflowStatus},
  };

  async fn store_with_workflow(enabled: &[StepName]) -> (TempDir, StateStore) {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(dir.path().join("state")).await.unwrap();
    let head = WorkflowHead {
      workflow_id: "w".into(),
      document_id: "d".into(),
      project_id: "p".into(),
      file_uri: "store://b/projects/p/documents/d/a.pdf".into(),
      file_name: "a.pdf".into(),
      file_type: "application/pdf".into(),
      status: WorkflowStatus::Created,
      settings: ResolvedSettings::default(),
      source_url: String::new(),
      crawl_instruction: String::new(),
      error: None,
      started_at: Utc::now(),
      updated_at: Utc::now(),
    };
    store.create_workflow(&head, enabled).await.unwrap();
    (dir, store)
  }

  #[tokio::test]
  async fn all_tracks_skipped_is_complete() {
    let (_dir, store) = store_with_workflow(&[]).await;
    let check = check_preprocess_status(&store, "w").await.unwrap();
    assert!(check.all_completed);
    assert!(!check.any_failed);
    assert!(!check.analysis_busy);
  }

  #[tokio::test]
  async fn pending_enabled_track_blocks_completion() {
    let (_dir, store) = store_with_workflow(&[StepName::Ocr]).await;

    let check = check_preprocess_status(&store, "w").await.unwrap();
    assert!(!check.all_completed);

    store
      .transition_step("w", StepName::Ocr, StepState::Running, None)
      .await
      .unwrap();
    store.transition_step("w", StepName::Ocr, StepState::Done, None).await.unwrap();

    let check = check_preprocess_status(&store, "w").await.unwrap();
    assert!(check.all_completed);
  }

  #[tokio::test]
  async fn failed_track_reports_failure() {
    let (_dir, store) = store_with_workflow(&[StepName::Bda]).await;
    store
      .transition_step("w", StepName::Bda, StepState::Running, None)
      .await
      .unwrap();
    store
      .transition_step("w", StepName::Bda, StepState::Failed, Some("boom".into()))
      .await
      .unwrap();

    let check = check_preprocess_status(&store, "w").await.unwrap();
    assert!(check.any_failed);
    assert!(!check.all_completed);
  }

  #[tokio::test]
  async fn running_analyzer_marks_busy() {
    let (_dir, store) = store_with_workflow(&[]).await;
    store
      .transition_step("w", StepName::SegmentAnalyzer(0), StepState::Running, None)
      .await
      .unwrap();

    let check = check_preprocess_status(&store, "w").await.unwrap();
    assert!(check.all_completed);
    assert!(check.analysis_busy);
  }
}
