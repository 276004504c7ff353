//! Pipeline stages driving a workflow from fan-out to index commit.
//!
//! ```text
//! router ─► [track queues] ─► poll status ─► format parse ─► build segments
//!                                   │                              │
//!                                   │            ┌── per segment ──┴──────────┐
//!                                   │            │  analyze ─► finalize ─► ▼  │
//!                                   └────────────┤               [write queue]│
//!                                                └── summarize ◄── drain ─────┘
//! ```
//!
//! Each stage records its lifecycle on the workflow step map; the
//! orchestrator owns the state machine and every stage runs under a
//! wall-clock timeout.

mod finalizer;
mod orchestrator;
mod segments;
mod status;
mod summarizer;
mod writer;

#[cfg(test)]
mod __tests__;

pub use finalizer::compose_content;
pub use orchestrator::{orchestrator_worker, run_workflow};
pub use segments::build_segments;
pub use status::{PreprocessCheck, check_preprocess_status};
pub use summarizer::{SummarizeOutcome, summarize_document};
pub use writer::{index_writer_worker, write_record};

use crate::{blob::BlobError, db::DbError, parser::ParserError, queue::QueueClosed, state::StateError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
  #[error("State store error: {0}")]
  State(#[from] StateError),
  #[error("Blob store error: {0}")]
  Blob(#[from] BlobError),
  #[error("Index error: {0}")]
  Db(#[from] DbError),
  #[error("Parser error: {0}")]
  Parser(#[from] ParserError),
  #[error("Serialization error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("Queue error: {0}")]
  Queue(#[from] QueueClosed),
  #[error("Step timed out")]
  StepTimeout,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
