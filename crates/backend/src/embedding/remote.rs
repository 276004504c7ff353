//! Remote embedding provider over an OpenAI-compatible embeddings endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::{EmbeddingError, EmbeddingMode, EmbeddingProvider, retry};
use crate::config::EmbeddingConfig;

#[derive(Debug, Clone)]
pub struct RemoteProvider {
  client: reqwest::Client,
  endpoint: String,
  api_key: Option<String>,
  model: String,
  dimensions: usize,
  /// Maximum texts per batch request
  max_batch_size: usize,
  request_timeout: std::time::Duration,
}

impl RemoteProvider {
  pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
    let api_key = config.api_key.clone().or_else(Self::key_from_env);

    info!(
      endpoint = %config.endpoint,
      model = %config.model,
      dimensions = config.dimensions,
      max_batch_size = config.max_batch_size,
      "Remote embedding provider initialized"
    );

    Ok(Self {
      client: reqwest::Client::new(),
      endpoint: config.endpoint.clone(),
      api_key,
      model: config.model.clone(),
      dimensions: config.dimensions,
      max_batch_size: config.max_batch_size.max(1),
      request_timeout: std::time::Duration::from_secs(config.request_timeout_secs),
    })
  }

  fn key_from_env() -> Option<String> {
    match std::env::var("EMBEDDING_API_KEY") {
      Ok(key) if !key.is_empty() => {
        debug!("EMBEDDING_API_KEY found in environment");
        Some(key)
      }
      _ => None,
    }
  }

  /// One request with transient-failure re-attempts.
  async fn request_embeddings(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    retry::with_retry("embeddings", || self.send_once(inputs)).await
  }

  async fn send_once(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let body = EmbeddingsRequest {
      model: &self.model,
      input: inputs,
    };

    let mut request = self.client.post(&self.endpoint).timeout(self.request_timeout).json(&body);
    if let Some(key) = &self.api_key {
      request = request.bearer_auth(key);
    }

    let response = request.send().await.map_err(|e| {
      if e.is_timeout() {
        EmbeddingError::Timeout
      } else if e.is_connect() {
        EmbeddingError::Unreachable(e.to_string())
      } else {
        e.into()
      }
    })?;

    let status = response.status();
    if !status.is_success() {
      let message = response.text().await.unwrap_or_default();
      warn!(status = %status, "Embedding request failed");
      return Err(EmbeddingError::Endpoint {
        status: status.as_u16(),
        message,
      });
    }

    let parsed: EmbeddingsResponse = response
      .json()
      .await
      .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = parsed.data.into_iter().map(|d| (d.index, d.embedding)).collect();
    indexed.sort_by_key(|(index, _)| *index);

    let vectors: Vec<Vec<f32>> = indexed.into_iter().map(|(_, v)| v).collect();
    if vectors.len() != inputs.len() {
      return Err(EmbeddingError::Malformed(format!(
        "expected {} embeddings, got {}",
        inputs.len(),
        vectors.len()
      )));
    }

    trace!(count = vectors.len(), "Embeddings received");
    Ok(vectors)
  }
}

#[async_trait]
impl EmbeddingProvider for RemoteProvider {
  fn name(&self) -> &str {
    "remote"
  }

  fn model_id(&self) -> &str {
    &self.model
  }

  fn dimensions(&self) -> usize {
    self.dimensions
  }

  async fn embed(&self, text: &str, _mode: EmbeddingMode) -> Result<Vec<f32>, EmbeddingError> {
    let vectors = self.request_embeddings(&[text]).await?;
    vectors
      .into_iter()
      .next()
      .ok_or_else(|| EmbeddingError::Malformed("empty embedding response".into()))
  }

  async fn embed_batch(&self, texts: &[&str], _mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if texts.is_empty() {
      return Ok(Vec::new());
    }

    let mut out = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(self.max_batch_size) {
      out.extend(self.request_embeddings(chunk).await?);
    }
    Ok(out)
  }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
  model: &'a str,
  input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
  data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
  #[serde(default)]
  index: usize,
  embedding: Vec<f32>,
}
