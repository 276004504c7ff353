//! Daemon lifecycle: build the dependency bundle, spawn the workers, and
//! coordinate graceful shutdown.
//!
//! # Architecture
//!
//! ```text
//! Daemon (supervisor)
//!   ├── Router worker      (uploads queue -> workflow + track queues)
//!   ├── Orchestrator pool  (workflow queue -> per-workflow state machine)
//!   └── Index writer       (write queue -> hybrid index)
//! ```
//!
//! The external preprocessing tracks (OCR, BDA, Transcribe, Webcrawler) are
//! consumed by collaborators outside this process; their receivers are handed
//! back to the caller on startup.

use std::{path::PathBuf, sync::Arc};

use llm::{HttpProvider, HttpProviderConfig, LlmProvider};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
  blob::BlobStore,
  config::Config,
  db::IndexDb,
  embedding::EmbeddingProvider,
  parser::Converter,
  pipeline,
  queue::{QueueReceivers, Queues, TrackMessage},
  router::{EventRouter, NoopWarmup, OcrWarmup},
  state::StateStore,
};

/// Everything a pipeline component needs, passed explicitly instead of
/// living in process-wide globals. Tests build one with fakes.
pub struct Services {
  pub config: Arc<Config>,
  pub state: Arc<StateStore>,
  pub blob: Arc<BlobStore>,
  pub index: Arc<IndexDb>,
  pub embedding: Arc<dyn EmbeddingProvider>,
  pub llm: Arc<dyn LlmProvider>,
  pub converter: Converter,
  pub queues: Queues,
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
  #[error("State store error: {0}")]
  State(#[from] crate::state::StateError),
  #[error("Blob store error: {0}")]
  Blob(#[from] crate::blob::BlobError),
  #[error("Index error: {0}")]
  Db(#[from] crate::db::DbError),
  #[error("Embedding provider error: {0}")]
  Embedding(#[from] crate::embedding::EmbeddingError),
  #[error("LLM provider error: {0}")]
  Llm(#[from] llm::LlmError),
}

impl Services {
  /// Build the full service bundle from configuration, opening the local
  /// stores under `config.data_dir`.
  pub async fn initialize(config: Config, queues: Queues) -> Result<Self, DaemonError> {
    let data_dir = effective_data_dir(&config);
    info!(data_dir = %data_dir.display(), "Initializing services");

    let state = Arc::new(StateStore::open(data_dir.join("state")).await?);
    let blob = Arc::new(BlobStore::open(data_dir.join("blobs")).await?);

    let embedding = <dyn EmbeddingProvider>::from_config(&config.embedding)?;
    let index = Arc::new(IndexDb::open(data_dir.join("lancedb"), embedding.clone()).await?);

    let llm_provider = HttpProvider::new(HttpProviderConfig {
      endpoint: config.llm.endpoint.clone(),
      api_key: config.llm.api_key.clone(),
      model: config.llm.model.clone(),
    })?;

    let converter = Converter::new(config.convert.clone());

    Ok(Self {
      config: Arc::new(config),
      state,
      blob,
      index,
      embedding,
      llm: Arc::new(llm_provider),
      converter,
      queues,
    })
  }
}

/// Receivers for the external preprocessing tracks, consumed outside this
/// process (or by test harnesses standing in for them).
pub struct TrackReceivers {
  pub ocr: mpsc::Receiver<TrackMessage>,
  pub bda: mpsc::Receiver<TrackMessage>,
  pub transcribe: mpsc::Receiver<TrackMessage>,
  pub webcrawler: mpsc::Receiver<TrackMessage>,
}

/// The docflow daemon: supervises the router, orchestrator pool, and index
/// writer until shutdown.
pub struct Daemon {
  services: Arc<Services>,
  cancel: CancellationToken,
  handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Daemon {
  /// Spawn all workers. Returns the daemon plus the external track
  /// receivers.
  pub fn start(services: Arc<Services>, receivers: QueueReceivers) -> (Self, TrackReceivers) {
    Self::start_with_warmup(services, receivers, Arc::new(NoopWarmup))
  }

  pub fn start_with_warmup(
    services: Arc<Services>,
    receivers: QueueReceivers,
    warmup: Arc<dyn OcrWarmup>,
  ) -> (Self, TrackReceivers) {
    let cancel = CancellationToken::new();
    let mut handles = Vec::new();

    // Router worker
    let router = EventRouter::new(
      services.state.clone(),
      services.blob.clone(),
      services.queues.clone(),
      warmup,
    );
    let mut uploads_rx = receivers.uploads;
    let router_cancel = cancel.child_token();
    handles.push(tokio::spawn(async move {
      debug!("Router worker starting");
      loop {
        tokio::select! {
          biased;
          _ = router_cancel.cancelled() => break,
          record = uploads_rx.recv() => {
            let Some(record) = record else { break };
            if let Err(e) = router.handle_record(&record).await {
              warn!(err = %e, "Router error");
            }
          }
        }
      }
      debug!("Router worker stopped");
    }));

    // Orchestrator worker pool sharing one workflow receiver
    let workflow_rx = Arc::new(Mutex::new(receivers.workflow));
    let worker_count = services.config.pipeline.effective_orchestrator_workers();
    for worker_id in 0..worker_count {
      let services = services.clone();
      let rx = workflow_rx.clone();
      let cancel = cancel.child_token();
      handles.push(tokio::spawn(async move {
        pipeline::orchestrator_worker(worker_id, services, rx, cancel).await;
      }));
    }

    // Index writer
    let writer_services = services.clone();
    let writer_cancel = cancel.child_token();
    handles.push(tokio::spawn(async move {
      pipeline::index_writer_worker(writer_services, receivers.index_write, writer_cancel).await;
    }));

    info!(orchestrator_workers = worker_count, "Daemon started");

    let tracks = TrackReceivers {
      ocr: receivers.ocr,
      bda: receivers.bda,
      transcribe: receivers.transcribe,
      webcrawler: receivers.webcrawler,
    };

    (
      Self {
        services,
        cancel,
        handles,
      },
      tracks,
    )
  }

  pub fn services(&self) -> &Arc<Services> {
    &self.services
  }

  /// Cancel all workers and wait for them to finish.
  pub async fn shutdown(self) {
    info!("Daemon shutting down");
    self.cancel.cancel();
    for handle in self.handles {
      let _ = handle.await;
    }
    debug!("Daemon shutdown complete");
  }
}

fn effective_data_dir(config: &Config) -> PathBuf {
  if config.data_dir.as_os_str().is_empty() {
    PathBuf::from(".docflow")
  } else {
    config.data_dir.clone()
  }
}
