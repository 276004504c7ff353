mod agent;
mod blob;
mod db;
mod embedding;
mod keywords;
mod parser;
mod pipeline;
mod queue;
mod router;
mod state;

mod domain;
pub use domain::{config, document, mime, workflow};

pub use agent::{AgentOutcome, AnalysisStep, ImageState, SegmentInput, VisionAgent};
pub use blob::{BlobError, BlobStore, DocumentPrefix, PresignedUrl, StoreUri};
pub use db::{DbError, IndexDb, IndexRecord, NewIndexRecord, merge_hits};
pub use embedding::{EmbeddedText, EmbeddingError, EmbeddingMode, EmbeddingProvider, RemoteProvider, embed_texts};
pub use keywords::extract_keywords;
pub use parser::{Converter, ParserContext, ParserError, parse_document};
pub use pipeline::{
  PipelineError, PreprocessCheck, SummarizeOutcome, check_preprocess_status, compose_content, run_workflow,
  summarize_document,
};
pub use queue::{
  IndexWriteMessage, Queue, QueueReceivers, Queues, ToolOutput, ToolOutputs, TrackEnvelope, TrackMessage,
  WorkflowMessage,
};
pub use router::{EventRouter, NoopWarmup, OcrWarmup, RouteResult, RouteSummary, RouterError};
pub use state::{StateError, StateStore};

mod daemon;
pub use daemon::{Daemon, DaemonError, Services, TrackReceivers};
