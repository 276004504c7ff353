//! Blob storage behind `store://{bucket}/{key}` URIs.
//!
//! Filesystem-backed: a blob at `store://bucket/some/key` lives at
//! `{data_dir}/blobs/bucket/some/key`. Presigned URLs are minted as expiring
//! tokens and validated on redemption, so the rest of the pipeline treats
//! them like any remote object store would.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum BlobError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Invalid store URI: {0}")]
  InvalidUri(String),
  #[error("Not found: {0}")]
  NotFound(String),
  #[error("Presigned URL expired at {0}")]
  Expired(DateTime<Utc>),
}

pub type Result<T> = std::result::Result<T, BlobError>;

/// Parsed `store://{bucket}/{key}` URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreUri {
  pub bucket: String,
  pub key: String,
}

impl StoreUri {
  pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
    Self {
      bucket: bucket.into(),
      key: key.into(),
    }
  }

  pub fn parse(uri: &str) -> Result<Self> {
    let rest = uri
      .strip_prefix("store://")
      .ok_or_else(|| BlobError::InvalidUri(uri.to_string()))?;
    let (bucket, key) = rest
      .split_once('/')
      .ok_or_else(|| BlobError::InvalidUri(uri.to_string()))?;
    if bucket.is_empty() || key.is_empty() {
      return Err(BlobError::InvalidUri(uri.to_string()));
    }
    Ok(Self::new(bucket, key))
  }

  /// The file name component of the key
  pub fn file_name(&self) -> &str {
    self.key.rsplit('/').next().unwrap_or(&self.key)
  }
}

impl std::fmt::Display for StoreUri {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "store://{}/{}", self.bucket, self.key)
  }
}

/// A minted URL with an expiry; redeemed back through the store
#[derive(Debug, Clone)]
pub struct PresignedUrl {
  pub uri: StoreUri,
  pub expires_at: DateTime<Utc>,
  /// For puts: the content type the uploader must send
  pub content_type: Option<String>,
}

impl PresignedUrl {
  pub fn is_expired(&self) -> bool {
    Utc::now() > self.expires_at
  }
}

/// Filesystem-backed object store
pub struct BlobStore {
  root: PathBuf,
}

impl BlobStore {
  pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
    let root = root.into();
    tokio::fs::create_dir_all(&root).await?;
    debug!(path = %root.display(), "Blob store opened");
    Ok(Self { root })
  }

  fn blob_path(&self, uri: &StoreUri) -> PathBuf {
    self.root.join(&uri.bucket).join(&uri.key)
  }

  #[tracing::instrument(level = "trace", skip(self))]
  pub async fn get_bytes(&self, uri: &StoreUri) -> Result<Vec<u8>> {
    match tokio::fs::read(self.blob_path(uri)).await {
      Ok(bytes) => Ok(bytes),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound(uri.to_string())),
      Err(e) => Err(e.into()),
    }
  }

  #[tracing::instrument(level = "trace", skip(self, bytes), fields(len = bytes.len()))]
  pub async fn put_bytes(&self, uri: &StoreUri, bytes: &[u8], content_type: &str) -> Result<()> {
    let path = self.blob_path(uri);
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, bytes).await?;
    debug!(uri = %uri, content_type, "Stored blob");
    Ok(())
  }

  pub async fn exists(&self, uri: &StoreUri) -> bool {
    tokio::fs::try_exists(self.blob_path(uri)).await.unwrap_or(false)
  }

  /// Mint a presigned read URL valid for `ttl_secs`
  pub fn presign_get(&self, uri: &StoreUri, ttl_secs: i64) -> PresignedUrl {
    PresignedUrl {
      uri: uri.clone(),
      expires_at: Utc::now() + Duration::seconds(ttl_secs),
      content_type: None,
    }
  }

  /// Mint a presigned write URL valid for `ttl_secs`
  pub fn presign_put(&self, uri: &StoreUri, ttl_secs: i64, content_type: &str) -> PresignedUrl {
    PresignedUrl {
      uri: uri.clone(),
      expires_at: Utc::now() + Duration::seconds(ttl_secs),
      content_type: Some(content_type.to_string()),
    }
  }

  /// Redeem a presigned read URL
  pub async fn redeem_get(&self, presigned: &PresignedUrl) -> Result<Vec<u8>> {
    if presigned.is_expired() {
      return Err(BlobError::Expired(presigned.expires_at));
    }
    self.get_bytes(&presigned.uri).await
  }

  /// Redeem a presigned write URL
  pub async fn redeem_put(&self, presigned: &PresignedUrl, bytes: &[u8]) -> Result<()> {
    if presigned.is_expired() {
      return Err(BlobError::Expired(presigned.expires_at));
    }
    let content_type = presigned.content_type.as_deref().unwrap_or("application/octet-stream");
    self.put_bytes(&presigned.uri, bytes, content_type).await
  }

  /// All keys under `store://{bucket}/{prefix}`, sorted
  #[tracing::instrument(level = "trace", skip(self))]
  pub async fn list_prefix(&self, bucket: &str, prefix: &str) -> Result<Vec<StoreUri>> {
    let base = self.root.join(bucket);
    if !tokio::fs::try_exists(&base).await.unwrap_or(false) {
      return Ok(Vec::new());
    }

    let bucket = bucket.to_string();
    let prefix = prefix.to_string();
    let uris = tokio::task::spawn_blocking(move || {
      let mut uris = Vec::new();
      for entry in WalkDir::new(&base).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
          continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&base) else {
          continue;
        };
        let key = path_to_key(relative);
        if key.starts_with(&prefix) {
          uris.push(StoreUri::new(bucket.clone(), key));
        }
      }
      uris.sort_by(|a, b| a.key.cmp(&b.key));
      uris
    })
    .await
    .map_err(|e| BlobError::Io(std::io::Error::other(e)))?;

    Ok(uris)
  }

  /// Delete every blob under `store://{bucket}/{prefix}`; returns the count
  #[tracing::instrument(level = "trace", skip(self))]
  pub async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<usize> {
    let uris = self.list_prefix(bucket, prefix).await?;
    let mut removed = 0usize;
    for uri in &uris {
      match tokio::fs::remove_file(self.blob_path(uri)).await {
        Ok(()) => removed += 1,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
      }
    }
    debug!(bucket, prefix, removed, "Deleted prefix");
    Ok(removed)
  }
}

fn path_to_key(path: &Path) -> String {
  path
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}

impl std::fmt::Debug for BlobStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BlobStore").field("root", &self.root).finish()
  }
}
