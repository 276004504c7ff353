mod remote;
mod retry;
pub mod validation;

use std::sync::Arc;

pub use remote::RemoteProvider;
use tracing::{error, warn};

use crate::config::EmbeddingConfig;

/// Embedding mode determines how text is formatted before embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingMode {
  /// Embedding a document segment for storage/indexing
  #[default]
  Document,
  /// Embedding a search query for retrieval
  Query,
}

#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
  fn name(&self) -> &str;
  fn model_id(&self) -> &str;
  fn dimensions(&self) -> usize;

  async fn embed(&self, text: &str, mode: EmbeddingMode) -> Result<Vec<f32>, EmbeddingError>;
  async fn embed_batch(&self, texts: &[&str], mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

impl dyn EmbeddingProvider {
  pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    Ok(Arc::new(RemoteProvider::new(config)?))
  }
}

/// One embedded text: the vector plus whether the embedder failed and a zero
/// vector was substituted (such records are retry-eligible).
#[derive(Debug, Clone)]
pub struct EmbeddedText {
  pub vector: Vec<f32>,
  pub zero_vector: bool,
}

/// Embed a batch of texts for indexing.
///
/// Each input is truncated to the embedder input cap before submission. A
/// failing input is replaced by a zero vector of the provider dimension and
/// logged; the batch as a whole never fails.
pub async fn embed_texts(provider: &dyn EmbeddingProvider, texts: &[&str]) -> Vec<EmbeddedText> {
  let dim = provider.dimensions();
  let truncated: Vec<String> = texts.iter().map(|t| validation::truncate_for_embedding(t)).collect();
  let refs: Vec<&str> = truncated.iter().map(String::as_str).collect();

  match provider.embed_batch(&refs, EmbeddingMode::Document).await {
    Ok(vectors) if vectors.len() == texts.len() => vectors
      .into_iter()
      .map(|mut vector| {
        vector.resize(dim, 0.0);
        EmbeddedText {
          vector,
          zero_vector: false,
        }
      })
      .collect(),
    Ok(vectors) => {
      warn!(
        expected = texts.len(),
        got = vectors.len(),
        "Embedder returned wrong batch size; falling back to per-text requests"
      );
      embed_each(provider, &refs, dim).await
    }
    Err(e) => {
      warn!(err = %e, "Batch embedding failed; falling back to per-text requests");
      embed_each(provider, &refs, dim).await
    }
  }
}

async fn embed_each(provider: &dyn EmbeddingProvider, texts: &[&str], dim: usize) -> Vec<EmbeddedText> {
  let mut out = Vec::with_capacity(texts.len());
  for text in texts {
    match provider.embed(text, EmbeddingMode::Document).await {
      Ok(mut vector) => {
        vector.resize(dim, 0.0);
        out.push(EmbeddedText {
          vector,
          zero_vector: false,
        });
      }
      Err(e) => {
        error!(err = %e, "Error generating embedding; storing zero vector");
        out.push(EmbeddedText {
          vector: vec![0.0; dim],
          zero_vector: true,
        });
      }
    }
  }
  out
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
  /// The endpoint answered with a non-success status
  #[error("Embedding endpoint rejected the request ({status}): {message}")]
  Endpoint { status: u16, message: String },
  /// The endpoint could not be reached at all
  #[error("Could not reach the embedding endpoint: {0}")]
  Unreachable(String),
  #[error("Embedding request timed out")]
  Timeout,
  /// The endpoint answered, but not with usable vectors
  #[error("Malformed embedding response: {0}")]
  Malformed(String),
  #[error("HTTP client error: {0}")]
  Http(#[from] reqwest::Error),
}

impl EmbeddingError {
  /// Whether a re-attempt has a chance of succeeding. Throttling and server
  /// trouble do; client-side mistakes and malformed payloads do not.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Timeout | Self::Unreachable(_) => true,
      Self::Endpoint { status, .. } => *status == 429 || *status >= 500,
      Self::Malformed(_) | Self::Http(_) => false,
    }
  }
}
