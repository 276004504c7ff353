//! Durable workflow state store.
//!
//! Rows are keyed by a composite `(PK, SK)` pair and persisted as one JSON
//! file per row under `{data_dir}/state/{PK}/{SK}.json`. Read-modify-write
//! cycles take a per-PK async lock so conditional updates never interleave.
//!
//! Layout:
//! - `PK=DOC#{document_id}, SK=WF#{workflow_id}` - workflow head
//! - `PK=WF#{workflow_id}, SK=STEP` - aggregate step map
//! - `PK=WF#{workflow_id}, SK=SEG#{nnnn}` - segment records
//! - `PK=DOC#{document_id}, SK=META` / `PK=PROJECT#{id}, SK=META` - settings

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StateError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("Not found: {0}")]
  NotFound(String),
  #[error("Illegal step transition for '{step}': {from} -> {to}")]
  IllegalTransition { step: String, from: String, to: String },
  #[error("Invalid input: {0}")]
  InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Filesystem-durable key-value store keyed by composite `(PK, SK)`
pub struct StateStore {
  root: PathBuf,
  locks: DashMap<String, Arc<Mutex<()>>>,
}

impl StateStore {
  /// Open (or create) a state store rooted at `root`
  pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
    let root = root.into();
    tokio::fs::create_dir_all(&root).await?;
    debug!(path = %root.display(), "State store opened");
    Ok(Self {
      root,
      locks: DashMap::new(),
    })
  }

  fn lock_for(&self, pk: &str) -> Arc<Mutex<()>> {
    self.locks.entry(pk.to_string()).or_default().clone()
  }

  fn pk_dir(&self, pk: &str) -> PathBuf {
    self.root.join(encode_key(pk))
  }

  fn row_path(&self, pk: &str, sk: &str) -> PathBuf {
    self.pk_dir(pk).join(format!("{}.json", encode_key(sk)))
  }

  /// Write (or replace) one row
  #[tracing::instrument(level = "trace", skip(self, value))]
  pub async fn put<T: Serialize>(&self, pk: &str, sk: &str, value: &T) -> Result<()> {
    let lock = self.lock_for(pk);
    let _guard = lock.lock().await;
    self.write_row(pk, sk, value).await
  }

  /// Read one row, if present
  #[tracing::instrument(level = "trace", skip(self))]
  pub async fn get<T: DeserializeOwned>(&self, pk: &str, sk: &str) -> Result<Option<T>> {
    let path = self.row_path(pk, sk);
    match tokio::fs::read(&path).await {
      Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  /// Query all rows under a PK whose SK starts with `sk_prefix`, sorted by
  /// SK, with offset pagination.
  #[tracing::instrument(level = "trace", skip(self))]
  pub async fn query_pk<T: DeserializeOwned>(
    &self,
    pk: &str,
    sk_prefix: &str,
    offset: usize,
    limit: Option<usize>,
  ) -> Result<Vec<(String, T)>> {
    let dir = self.pk_dir(pk);
    let mut keys: Vec<String> = Vec::new();

    let mut entries = match tokio::fs::read_dir(&dir).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
      let name = entry.file_name().to_string_lossy().into_owned();
      if let Some(encoded) = name.strip_suffix(".json") {
        let sk = decode_key(encoded);
        if sk.starts_with(sk_prefix) {
          keys.push(sk);
        }
      }
    }

    keys.sort();

    let mut rows = Vec::new();
    let take = limit.unwrap_or(usize::MAX);
    for sk in keys.into_iter().skip(offset).take(take) {
      if let Some(value) = self.get(pk, &sk).await? {
        rows.push((sk, value));
      }
    }

    Ok(rows)
  }

  /// Conditional read-modify-write of one row, serialized per PK.
  ///
  /// The closure receives the current value (`None` if the row is absent)
  /// and returns the value to store, or an error to abort without writing.
  pub async fn update<T, F>(&self, pk: &str, sk: &str, f: F) -> Result<T>
  where
    T: Serialize + DeserializeOwned + Clone,
    F: FnOnce(Option<T>) -> Result<T>,
  {
    let lock = self.lock_for(pk);
    let _guard = lock.lock().await;

    let current = self.get(pk, sk).await?;
    let next = f(current)?;
    self.write_row(pk, sk, &next).await?;
    Ok(next)
  }

  /// Delete one row (missing rows are not an error)
  #[tracing::instrument(level = "trace", skip(self))]
  pub async fn delete(&self, pk: &str, sk: &str) -> Result<()> {
    let lock = self.lock_for(pk);
    let _guard = lock.lock().await;

    match tokio::fs::remove_file(self.row_path(pk, sk)).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  /// Delete every row under a PK; returns the number of rows removed
  #[tracing::instrument(level = "trace", skip(self))]
  pub async fn delete_pk(&self, pk: &str) -> Result<usize> {
    let lock = self.lock_for(pk);
    let _guard = lock.lock().await;

    let dir = self.pk_dir(pk);
    let mut removed = 0usize;

    let mut entries = match tokio::fs::read_dir(&dir).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
      Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
      tokio::fs::remove_file(entry.path()).await?;
      removed += 1;
    }
    let _ = tokio::fs::remove_dir(&dir).await;

    debug!(pk = %pk, removed, "Deleted partition");
    Ok(removed)
  }

  async fn write_row<T: Serialize>(&self, pk: &str, sk: &str, value: &T) -> Result<()> {
    let path = self.row_path(pk, sk);
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    // Write-then-rename so readers never observe a torn row
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
  }
}

fn encode_key(key: &str) -> String {
  let mut out = String::with_capacity(key.len());
  for c in key.chars() {
    match c {
      '/' => out.push_str("%2F"),
      '\\' => out.push_str("%5C"),
      '%' => out.push_str("%25"),
      _ => out.push(c),
    }
  }
  out
}

fn decode_key(encoded: &str) -> String {
  encoded.replace("%2F", "/").replace("%5C", "\\").replace("%25", "%")
}

impl std::fmt::Debug for StateStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StateStore").field("root", &self.root).finish()
  }
}

#[cfg(test)]
mod tests {
  use serde::Deserialize;
  use tempfile::TempDir;

  use super::*;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Row {
    value: u32,
  }

  async fn open_store() -> (TempDir, StateStore) {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(dir.path().join("state")).await.unwrap();
    (dir, store)
  }

  #[tokio::test]
  async fn put_get_roundtrip() {
    let (_dir, store) = open_store().await;

    store.put("WF#abc", "STEP", &Row { value: 7 }).await.unwrap();
    let row: Option<Row> = store.get("WF#abc", "STEP").await.unwrap();
    assert_eq!(row, Some(Row { value: 7 }));

    let missing: Option<Row> = store.get("WF#abc", "OTHER").await.unwrap();
    assert!(missing.is_none());
  }

  #[tokio::test]
  async fn query_is_sorted_and_paginated() {
    let (_dir, store) = open_store().await;

    for i in [3usize, 0, 2, 1] {
      store
        .put("WF#w", &format!("SEG#{i:04}"), &Row { value: i as u32 })
        .await
        .unwrap();
    }
    store.put("WF#w", "STEP", &Row { value: 99 }).await.unwrap();

    let rows: Vec<(String, Row)> = store.query_pk("WF#w", "SEG#", 0, None).await.unwrap();
    let values: Vec<u32> = rows.iter().map(|(_, r)| r.value).collect();
    assert_eq!(values, vec![0, 1, 2, 3]);

    let page: Vec<(String, Row)> = store.query_pk("WF#w", "SEG#", 1, Some(2)).await.unwrap();
    let values: Vec<u32> = page.iter().map(|(_, r)| r.value).collect();
    assert_eq!(values, vec![1, 2]);
  }

  #[tokio::test]
  async fn update_aborts_without_writing() {
    let (_dir, store) = open_store().await;
    store.put("PK", "SK", &Row { value: 1 }).await.unwrap();

    let result: Result<Row> = store
      .update("PK", "SK", |_| Err(StateError::InvalidInput("no".into())))
      .await;
    assert!(result.is_err());

    let row: Option<Row> = store.get("PK", "SK").await.unwrap();
    assert_eq!(row, Some(Row { value: 1 }));
  }

  #[tokio::test]
  async fn delete_pk_removes_all_rows() {
    let (_dir, store) = open_store().await;
    store.put("WF#gone", "STEP", &Row { value: 1 }).await.unwrap();
    store.put("WF#gone", "SEG#0000", &Row { value: 2 }).await.unwrap();

    let removed = store.delete_pk("WF#gone").await.unwrap();
    assert_eq!(removed, 2);

    let rows: Vec<(String, Row)> = store.query_pk("WF#gone", "", 0, None).await.unwrap();
    assert!(rows.is_empty());
  }
}
