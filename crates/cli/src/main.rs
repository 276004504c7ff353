//! docflow command line: run the ingestion daemon, ingest files, search the
//! hybrid index, and inspect or delete workflows.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docflow::{
  Daemon, DocumentPrefix, Queues, Services, StoreUri,
  config::{Config, DocumentConfig},
  workflow::WorkflowStatus,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docflow", about = "Intelligent document processing pipeline", version)]
struct Cli {
  /// Path to a TOML config file (defaults baked in when absent)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Override the data directory
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Run the ingestion daemon until interrupted
  Daemon,
  /// Upload a file and drive its workflow to completion
  Ingest {
    /// Local file to ingest
    file: PathBuf,
    /// Project the document belongs to
    #[arg(long, default_value = "default")]
    project: String,
    /// Document id (derived from the file name when omitted)
    #[arg(long)]
    document: Option<String>,
    /// Enable the OCR track (requires an external OCR worker)
    #[arg(long)]
    ocr: bool,
    /// Enable the BDA track
    #[arg(long)]
    bda: bool,
    /// Enable the transcribe track
    #[arg(long)]
    transcribe: bool,
    /// Document language code
    #[arg(long)]
    language: Option<String>,
    /// Seconds to wait for the workflow to finish
    #[arg(long, default_value_t = 600)]
    wait_secs: u64,
  },
  /// Hybrid search over the committed segments
  Search {
    query: String,
    #[arg(long, default_value_t = 10)]
    limit: usize,
  },
  /// Show workflows and step states for a document
  Status {
    #[arg(long)]
    document: String,
  },
  /// Delete a workflow (or a whole document) and its derived data
  Delete {
    #[arg(long)]
    project: String,
    #[arg(long)]
    document: String,
    /// Delete only this workflow; omitting removes the document's blobs and
    /// index rows too
    #[arg(long)]
    workflow: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing();

  let config = load_config(cli.config.as_deref(), cli.data_dir.clone()).await?;
  let (queues, receivers) = Queues::bounded(config.pipeline.queue_capacity);
  let services = Arc::new(Services::initialize(config, queues).await?);

  match cli.command {
    Command::Daemon => {
      let (daemon, _tracks) = Daemon::start(services, receivers);
      info!("Daemon running; press ctrl-c to stop");
      tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
      daemon.shutdown().await;
    }
    Command::Ingest {
      file,
      project,
      document,
      ocr,
      bda,
      transcribe,
      language,
      wait_secs,
    } => {
      ingest(
        services,
        receivers,
        IngestArgs {
          file,
          project,
          document,
          ocr,
          bda,
          transcribe,
          language,
          wait_secs,
        },
      )
      .await?;
    }
    Command::Search { query, limit } => {
      let hits = services.index.search(&query, limit).await?;
      if hits.is_empty() {
        println!("No results.");
      }
      for (rank, hit) in hits.iter().enumerate() {
        let preview: String = hit.content.chars().take(160).collect();
        println!(
          "{:>2}. [{} #{}] {}",
          rank + 1,
          hit.document_id,
          hit.segment_index,
          preview.replace('\n', " ")
        );
      }
    }
    Command::Status { document } => {
      let workflows = services.state.list_workflows(&document).await?;
      if workflows.is_empty() {
        println!("No workflows for document {document}.");
      }
      for head in workflows {
        println!("workflow {} status={:?}", head.workflow_id, head.status);
        if let Some(error) = &head.error {
          println!("  error: {error}");
        }
        let steps = services.state.get_steps(&head.workflow_id).await?;
        for (name, step) in steps {
          println!("  {:<24} {:?}", name, step.state);
        }
      }
    }
    Command::Delete {
      project,
      document,
      workflow,
    } => match workflow {
      Some(workflow_id) => {
        let removed = services.state.delete_workflow(&document, &workflow_id).await?;
        println!("Removed {removed} state rows for workflow {workflow_id}.");
      }
      None => {
        let workflows = services.state.list_workflows(&document).await?;
        let mut removed = 0usize;
        for head in &workflows {
          removed += services.state.delete_workflow(&document, &head.workflow_id).await?;
        }
        services.index.delete_document(&document).await?;
        let prefix = DocumentPrefix::new(services.config.bucket.clone(), project, document.clone());
        let blobs = services.blob.delete_prefix(&prefix.bucket, &prefix.prefix()).await?;
        println!(
          "Removed {} workflows ({removed} state rows), index records, and {blobs} blobs for document {document}.",
          workflows.len()
        );
      }
    },
  }

  Ok(())
}

struct IngestArgs {
  file: PathBuf,
  project: String,
  document: Option<String>,
  ocr: bool,
  bda: bool,
  transcribe: bool,
  language: Option<String>,
  wait_secs: u64,
}

async fn ingest(services: Arc<Services>, receivers: docflow::QueueReceivers, args: IngestArgs) -> Result<()> {
  let file_name = args
    .file
    .file_name()
    .and_then(|n| n.to_str())
    .context("file has no printable name")?
    .to_string();
  let document_id = args.document.unwrap_or_else(|| {
    file_name
      .rsplit_once('.')
      .map(|(stem, _)| stem.to_string())
      .unwrap_or_else(|| file_name.clone())
  });

  // Settings for this document; OCR stays off unless an external OCR worker
  // is actually attached
  services
    .state
    .put_document_config(
      &document_id,
      &DocumentConfig {
        language: args.language,
        use_bda: Some(args.bda),
        use_ocr: Some(args.ocr),
        use_transcribe: Some(args.transcribe),
        ..Default::default()
      },
    )
    .await?;

  let bytes = tokio::fs::read(&args.file)
    .await
    .with_context(|| format!("reading {}", args.file.display()))?;
  let key = format!("projects/{}/documents/{}/{}", args.project, document_id, file_name);
  let uri = StoreUri::new(services.config.bucket.clone(), key.clone());
  services.blob.put_bytes(&uri, &bytes, "application/octet-stream").await?;
  info!(uri = %uri, "Uploaded");

  let (daemon, _tracks) = Daemon::start(services.clone(), receivers);

  let notification = serde_json::json!({
    "detail-type": "Object Created",
    "detail": { "bucket": { "name": services.config.bucket }, "object": { "key": key } }
  });
  services.queues.uploads.send(notification).await.map_err(|e| anyhow::anyhow!(e))?;

  // Wait for the newest workflow on this document to reach a terminal state
  let deadline = tokio::time::Instant::now() + Duration::from_secs(args.wait_secs);
  let head = loop {
    let workflows = services.state.list_workflows(&document_id).await?;
    if let Some(head) = workflows.iter().rev().find(|w| w.status.is_terminal()) {
      break Some(head.clone());
    }
    if tokio::time::Instant::now() >= deadline {
      break None;
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
  };

  daemon.shutdown().await;

  match head {
    Some(head) => {
      println!("workflow {} finished: {:?}", head.workflow_id, head.status);
      if let Some(error) = &head.error {
        println!("  error: {error}");
      }
      if head.status == WorkflowStatus::Failed {
        bail!("ingestion failed");
      }
      let records = services.index.get_segments(&document_id).await?;
      println!("{} segments committed to the index.", records.len());
      Ok(())
    }
    None => bail!("timed out waiting for the workflow to finish"),
  }
}

fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

async fn load_config(path: Option<&std::path::Path>, data_dir_override: Option<PathBuf>) -> Result<Config> {
  let mut config = match path {
    Some(path) => {
      let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config {}", path.display()))?;
      toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
    }
    None => Config::default(),
  };

  if let Some(data_dir) = data_dir_override {
    config.data_dir = data_dir;
  }
  if config.data_dir.as_os_str().is_empty() {
    config.data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("docflow");
  }

  Ok(config)
}
