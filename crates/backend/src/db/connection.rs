use std::{path::PathBuf, sync::Arc};

use lancedb::index::Index;
use lancedb::index::scalar::FtsIndexBuilder;
use lancedb::{Connection, Table, connect};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::{
  db::schema::segments_schema,
  embedding::{EmbeddingError, EmbeddingProvider},
};

const SEGMENTS_TABLE: &str = "segments";

#[derive(Error, Debug)]
pub enum DbError {
  #[error("LanceDB error: {0}")]
  Lance(#[from] lancedb::Error),
  #[error("Arrow error: {0}")]
  Arrow(#[from] arrow::error::ArrowError),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Embedding error: {0}")]
  Embedding(#[from] EmbeddingError),
  #[error("Not found: {0}")]
  NotFound(String),
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("Invalid input: {0}")]
  InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Hybrid index store: dense-vector ANN plus full-text keywords over one
/// row set of enriched segments.
pub struct IndexDb {
  pub connection: Connection,
  pub vector_dim: usize,
  pub(in crate::db) embedder: Arc<dyn EmbeddingProvider>,
  /// Serializes writes; LanceDB handles row-level consistency but upsert +
  /// index refresh must not interleave
  pub(in crate::db) write_lock: Mutex<()>,
}

impl IndexDb {
  /// Open (or create) the index at the given path
  pub async fn open(db_path: PathBuf, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
    if let Some(parent) = db_path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    let vector_dim = embedder.dimensions();
    info!(path = %db_path.display(), vector_dim, "Opening index database");

    let connection = match connect(db_path.to_string_lossy().as_ref()).execute().await {
      Ok(conn) => {
        debug!(path = %db_path.display(), "Index database connection established");
        conn
      }
      Err(e) => {
        error!(path = %db_path.display(), err = %e, "Failed to connect to index database");
        return Err(e.into());
      }
    };

    let db = Self {
      connection,
      vector_dim,
      embedder,
      write_lock: Mutex::new(()),
    };
    db.ensure_table().await?;

    Ok(db)
  }

  /// Ensure the segments table exists, creating the FTS index alongside the
  /// first (empty) table so keyword search is available from the first write.
  async fn ensure_table(&self) -> Result<()> {
    let table_names = self.connection.table_names().execute().await?;

    if !table_names.contains(&SEGMENTS_TABLE.to_string()) {
      debug!("Creating segments table");
      let table = self
        .connection
        .create_empty_table(SEGMENTS_TABLE, segments_schema(self.vector_dim))
        .execute()
        .await?;

      // Best effort on the empty table; the index is rebuilt after every
      // upsert anyway
      if let Err(e) = table
        .create_index(&["keywords"], Index::FTS(FtsIndexBuilder::default()))
        .execute()
        .await
      {
        debug!(err = %e, "Deferred FTS index creation to first write");
      }
    }

    Ok(())
  }

  pub(in crate::db) async fn segments_table(&self) -> Result<Table> {
    Ok(self.connection.open_table(SEGMENTS_TABLE).execute().await?)
  }

  /// Rebuild the FTS index so rows written since the last build are
  /// keyword-searchable. Called under the write lock after each upsert.
  pub(in crate::db) async fn refresh_fts_index(&self, table: &Table) -> Result<()> {
    table
      .create_index(&["keywords"], Index::FTS(FtsIndexBuilder::default()))
      .replace(true)
      .execute()
      .await?;
    Ok(())
  }
}

impl std::fmt::Debug for IndexDb {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("IndexDb").field("vector_dim", &self.vector_dim).finish()
  }
}
