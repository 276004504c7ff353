//! Index writer worker: drains the write queue into the hybrid index.
//!
//! For each message: derive keywords from the combined content, truncate the
//! embedder input, embed (zero-vector fallback), and upsert. Upserts are
//! idempotent on `(document_id, segment_id)`, so duplicate deliveries and
//! replays converge to the same row. A message that keeps failing is dropped
//! after the configured retries with an error log.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::{
  daemon::Services,
  db::{DbError, NewIndexRecord},
  embedding::{embed_texts, validation::truncate_for_embedding},
  keywords::extract_keywords,
  queue::IndexWriteMessage,
};

/// Long-lived worker consuming the index-write queue until cancelled.
pub async fn index_writer_worker(
  services: Arc<Services>,
  mut rx: mpsc::Receiver<IndexWriteMessage>,
  cancel: CancellationToken,
) {
  debug!("Index writer starting");

  loop {
    tokio::select! {
      biased;

      _ = cancel.cancelled() => {
        debug!("Index writer cancelled");
        break;
      }

      message = rx.recv() => {
        match message {
          Some(message) => {
            let segment_id = message.segment_id.clone();
            if let Err(e) = write_with_retries(&services, message).await {
              error!(segment_id = %segment_id, err = %e, "Dropping index write after retries");
            }
          }
          None => {
            debug!("Index write queue closed");
            break;
          }
        }
      }
    }
  }
}

async fn write_with_retries(services: &Services, message: IndexWriteMessage) -> Result<(), DbError> {
  let retries = services.config.pipeline.write_retries;
  let mut last_error = None;

  for attempt in 0..=retries {
    if attempt > 0 {
      let backoff = std::time::Duration::from_millis(200 * u64::from(attempt));
      trace!(attempt, backoff_ms = backoff.as_millis(), "Retrying index write");
      tokio::time::sleep(backoff).await;
    }

    match write_record(services, &message).await {
      Ok(()) => return Ok(()),
      Err(e) => {
        warn!(attempt, err = %e, segment_id = %message.segment_id, "Index write failed");
        last_error = Some(e);
      }
    }
  }

  Err(last_error.unwrap_or_else(|| DbError::InvalidInput("write failed".into())))
}

/// One write: keywords, embedding, upsert.
pub async fn write_record(services: &Services, message: &IndexWriteMessage) -> Result<(), DbError> {
  let keywords = extract_keywords(&message.content_combined);
  let content = truncate_for_embedding(&message.content_combined);

  let embedded = embed_texts(services.embedding.as_ref(), &[&content]).await;
  let embedded = embedded.into_iter().next().expect("one input yields one embedding");

  let record = NewIndexRecord {
    document_id: message.document_id.clone(),
    segment_id: message.segment_id.clone(),
    segment_index: message.segment_index,
    status: if message.status.is_empty() {
      "completed".into()
    } else {
      message.status.clone()
    },
    content,
    content_combined: message.content_combined.clone(),
    keywords,
    tools_json: serde_json::to_string(&message.tools)?,
    file_uri: message.file_uri.clone(),
    file_type: message.file_type.clone(),
    image_uri: message.image_uri.clone(),
    zero_vector: embedded.zero_vector,
    vector: embedded.vector,
  };

  services.index.upsert(record).await?;
  debug!(segment_id = %message.segment_id, "Index record committed");
  Ok(())
}
