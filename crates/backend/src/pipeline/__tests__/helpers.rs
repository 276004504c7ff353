//! Shared test helpers for pipeline integration tests.
//!
//! Builds a full service bundle over temp directories with deterministic
//! fakes for the embedding and LLM providers, so end-to-end scenarios run
//! hermetically.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use llm::{ChatRequest, ChatResponse, ContentBlock, LlmProvider, StopReason};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::{
  blob::{BlobStore, StoreUri},
  config::Config,
  daemon::Services,
  db::IndexDb,
  embedding::{EmbeddingError, EmbeddingMode, EmbeddingProvider},
  parser::Converter,
  queue::{QueueReceivers, Queues},
  state::StateStore,
};

pub const TEST_DIM: usize = 8;

/// Deterministic embedder: each whitespace token hashes to a unit basis
/// vector and a text embeds to the normalized token sum, so texts sharing
/// tokens land near each other. No network, no model.
#[derive(Debug, Clone)]
pub struct HashEmbedder;

fn splitmix64(mut x: u64) -> u64 {
  x = x.wrapping_add(0x9e3779b97f4a7c15);
  x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
  x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
  x ^ (x >> 31)
}

fn token_basis(token: &str) -> [f32; TEST_DIM] {
  let mut seed = 0xcbf29ce484222325u64;
  for b in token.as_bytes() {
    seed = (seed ^ u64::from(*b)).wrapping_mul(0x100000001b3);
  }

  let mut basis = [0f32; TEST_DIM];
  for slot in basis.iter_mut() {
    seed = splitmix64(seed);
    *slot = ((seed >> 11) as f32 / (1u64 << 53) as f32) * 2.0 - 1.0;
  }
  basis
}

pub fn hash_embed(text: &str) -> Vec<f32> {
  let mut sum = [0f32; TEST_DIM];
  for token in text.split_whitespace() {
    let basis = token_basis(&token.to_lowercase());
    for (s, b) in sum.iter_mut().zip(basis.iter()) {
      *s += b;
    }
  }

  let norm = sum.iter().map(|v| v * v).sum::<f32>().sqrt();
  if norm > 0.0 {
    sum.iter().map(|v| v / norm).collect()
  } else {
    sum.to_vec()
  }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
  fn name(&self) -> &str {
    "hash-test"
  }

  fn model_id(&self) -> &str {
    "hash-test-1"
  }

  fn dimensions(&self) -> usize {
    TEST_DIM
  }

  async fn embed(&self, text: &str, _mode: EmbeddingMode) -> Result<Vec<f32>, EmbeddingError> {
    Ok(hash_embed(text))
  }

  async fn embed_batch(&self, texts: &[&str], _mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    Ok(texts.iter().map(|t| hash_embed(t)).collect())
  }
}

/// Embedder that fails for any text containing a marker token; everything
/// else delegates to [`HashEmbedder`].
#[derive(Debug, Clone)]
pub struct FailingEmbedder {
  pub needle: String,
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
  fn name(&self) -> &str {
    "failing-test"
  }

  fn model_id(&self) -> &str {
    "failing-test-1"
  }

  fn dimensions(&self) -> usize {
    TEST_DIM
  }

  async fn embed(&self, text: &str, _mode: EmbeddingMode) -> Result<Vec<f32>, EmbeddingError> {
    if text.contains(&self.needle) {
      return Err(EmbeddingError::Endpoint {
        status: 400,
        message: "simulated rejection".into(),
      });
    }
    Ok(hash_embed(text))
  }

  async fn embed_batch(&self, texts: &[&str], mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut out = Vec::with_capacity(texts.len());
    for text in texts {
      out.push(self.embed(text, mode).await?);
    }
    Ok(out)
  }
}

/// Scripted LLM: tool-bearing requests pop pre-baked responses (default: an
/// immediate final report); tool-less requests (inner vision calls, the
/// summarizer, text-only analysis) return fixed text.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
  script: Arc<Mutex<Vec<ChatResponse>>>,
}

impl ScriptedLlm {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_script(responses: Vec<ChatResponse>) -> Self {
    Self {
      script: Arc::new(Mutex::new(responses)),
    }
  }
}

pub fn tool_use_response(name: &str, input: serde_json::Value) -> ChatResponse {
  ChatResponse {
    content: vec![ContentBlock::ToolUse {
      id: format!("toolu_{name}"),
      name: name.into(),
      input,
    }],
    stop_reason: StopReason::ToolUse,
    input_tokens: 0,
    output_tokens: 0,
  }
}

pub fn final_response(text: &str) -> ChatResponse {
  ChatResponse {
    content: vec![ContentBlock::text(text)],
    stop_reason: StopReason::EndTurn,
    input_tokens: 0,
    output_tokens: 0,
  }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
  fn name(&self) -> &str {
    "scripted-test"
  }

  fn is_available(&self) -> bool {
    true
  }

  async fn chat(&self, request: ChatRequest) -> llm::Result<ChatResponse> {
    if request.tools.is_empty() {
      return Ok(final_response(
        "## Document Overview\nAutomated analysis of the segment content.",
      ));
    }

    let mut script = self.script.lock().unwrap();
    if script.is_empty() {
      Ok(final_response("## Document Overview\nScripted analysis complete."))
    } else {
      Ok(script.remove(0))
    }
  }
}

/// Full pipeline fixture over temp directories
pub struct TestContext {
  pub _dir: TempDir,
  pub services: Arc<Services>,
  pub receivers: Option<QueueReceivers>,
  cancel: CancellationToken,
}

impl TestContext {
  pub async fn new() -> Self {
    Self::with_providers(Arc::new(HashEmbedder), Arc::new(ScriptedLlm::new())).await
  }

  pub async fn with_providers(embedding: Arc<dyn EmbeddingProvider>, llm_provider: Arc<dyn LlmProvider>) -> Self {
    let dir = TempDir::new().expect("create temp dir");

    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();
    config.bucket = "uploads".into();
    config.embedding.dimensions = TEST_DIM;
    config.pipeline.poll_interval_secs = 1;
    config.pipeline.poll_budget_secs = 10;
    config.pipeline.writer_drain_timeout_secs = 10;

    let state = Arc::new(StateStore::open(dir.path().join("state")).await.expect("open state store"));
    let blob = Arc::new(BlobStore::open(dir.path().join("blobs")).await.expect("open blob store"));
    let index = Arc::new(
      IndexDb::open(dir.path().join("lancedb"), embedding.clone())
        .await
        .expect("open index"),
    );

    let (queues, receivers) = Queues::bounded(64);
    let converter = Converter::new(config.convert.clone());

    let services = Arc::new(Services {
      config: Arc::new(config),
      state,
      blob,
      index,
      embedding,
      llm: llm_provider,
      converter,
      queues,
    });

    Self {
      _dir: dir,
      services,
      receivers: Some(receivers),
      cancel: CancellationToken::new(),
    }
  }

  /// Spawn the index-writer worker over the write-queue receiver.
  pub fn spawn_writer(&mut self) {
    let receivers = self.receivers.as_mut().expect("receivers taken");
    let rx = std::mem::replace(&mut receivers.index_write, tokio::sync::mpsc::channel(1).1);
    let services = self.services.clone();
    let cancel = self.cancel.clone();
    tokio::spawn(async move {
      crate::pipeline::index_writer_worker(services, rx, cancel).await;
    });
  }

  /// Upload a blob under the standard document layout and return the
  /// matching notification record.
  pub async fn upload(&self, project_id: &str, document_id: &str, file_name: &str, bytes: &[u8]) -> serde_json::Value {
    let key = format!("projects/{project_id}/documents/{document_id}/{file_name}");
    let uri = StoreUri::new("uploads", key.clone());
    self
      .services
      .blob
      .put_bytes(&uri, bytes, "application/octet-stream")
      .await
      .expect("upload blob");

    notification("uploads", &key)
  }

  pub fn router(&self) -> crate::router::EventRouter {
    crate::router::EventRouter::new(
      self.services.state.clone(),
      self.services.blob.clone(),
      self.services.queues.clone(),
      Arc::new(crate::router::NoopWarmup),
    )
  }
}

impl Drop for TestContext {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

/// An `Object Created` upload notification for the given key
pub fn notification(bucket: &str, key: &str) -> serde_json::Value {
  serde_json::json!({
    "detail-type": "Object Created",
    "detail": { "bucket": { "name": bucket }, "object": { "key": key } }
  })
}

/// A tiny valid PNG for image-segment tests
pub fn png_bytes() -> Vec<u8> {
  use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
  let mut buffer = std::io::Cursor::new(Vec::new());
  DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 2, Rgb([200, 100, 50])))
    .write_to(&mut buffer, ImageFormat::Png)
    .expect("encode png");
  buffer.into_inner()
}
