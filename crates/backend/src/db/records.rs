//! Index record operations: upsert, status patch, ordered reads, and hybrid
//! search over the segments table.

use std::sync::Arc;

use arrow_array::{
  Array, BooleanArray, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray,
  UInt32Array,
};
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::index::scalar::FullTextSearchQuery;
use lancedb::query::{ExecutableQuery, QueryBase};
use tracing::{debug, warn};

use crate::{
  db::{
    connection::{DbError, IndexDb, Result},
    schema::segments_schema,
  },
  embedding::EmbeddingMode,
  keywords::extract_keywords,
};

/// A row of the hybrid index
#[derive(Debug, Clone)]
pub struct IndexRecord {
  pub document_id: String,
  pub segment_id: String,
  pub segment_index: usize,
  pub status: String,
  pub content: String,
  pub content_combined: String,
  pub keywords: String,
  pub tools_json: String,
  pub file_uri: String,
  pub file_type: String,
  pub image_uri: Option<String>,
  pub zero_vector: bool,
  pub created_at: i64,
  pub updated_at: i64,
  pub vector: Vec<f32>,
}

/// Input for an upsert; timestamps are assigned at write time
#[derive(Debug, Clone)]
pub struct NewIndexRecord {
  pub document_id: String,
  pub segment_id: String,
  pub segment_index: usize,
  pub status: String,
  pub content: String,
  pub content_combined: String,
  pub keywords: String,
  pub tools_json: String,
  pub file_uri: String,
  pub file_type: String,
  pub image_uri: Option<String>,
  pub zero_vector: bool,
  pub vector: Vec<f32>,
}

impl IndexDb {
  /// Add or replace a record by `(document_id, segment_id)`.
  ///
  /// Idempotent: replaying the same input yields the same row, so duplicate
  /// queue deliveries are harmless.
  #[tracing::instrument(level = "trace", skip(self, record), fields(segment_id = %record.segment_id))]
  pub async fn upsert(&self, record: NewIndexRecord) -> Result<()> {
    let _guard = self.write_lock.lock().await;

    let table = self.segments_table().await?;
    let now = Utc::now().timestamp_millis();
    let batch = record_to_batch(&record, now, self.vector_dim)?;

    let schema = segments_schema(self.vector_dim);
    let iter = RecordBatchIterator::new([Ok(batch)], schema);

    let mut merge = table.merge_insert(&["document_id", "segment_id"]);
    merge.when_matched_update_all(None).when_not_matched_insert_all();
    merge.execute(Box::new(iter)).await?;

    // Newly written rows must be visible to keyword search
    self.refresh_fts_index(&table).await?;

    debug!(
      document_id = %record.document_id,
      segment_id = %record.segment_id,
      zero_vector = record.zero_vector,
      "Upserted index record"
    );
    Ok(())
  }

  /// Patch the status of one segment, or of every segment of the document
  /// when `segment_id` is `None`.
  #[tracing::instrument(level = "trace", skip(self))]
  pub async fn update_status(&self, document_id: &str, segment_id: Option<&str>, status: &str) -> Result<()> {
    let _guard = self.write_lock.lock().await;
    let table = self.segments_table().await?;

    let predicate = match segment_id {
      Some(segment_id) => format!(
        "document_id = '{}' AND segment_id = '{}'",
        escape(document_id),
        escape(segment_id)
      ),
      None => format!("document_id = '{}'", escape(document_id)),
    };

    table
      .update()
      .only_if(predicate)
      .column("status", format!("'{}'", escape(status)))
      .column("updated_at", Utc::now().timestamp_millis().to_string())
      .execute()
      .await?;
    Ok(())
  }

  /// All records of a document in ascending `segment_index`
  #[tracing::instrument(level = "trace", skip(self))]
  pub async fn get_segments(&self, document_id: &str) -> Result<Vec<IndexRecord>> {
    let table = self.segments_table().await?;

    let batches: Vec<RecordBatch> = table
      .query()
      .only_if(format!("document_id = '{}'", escape(document_id)))
      .execute()
      .await?
      .try_collect()
      .await?;

    let mut records = Vec::new();
    for batch in &batches {
      for row in 0..batch.num_rows() {
        records.push(batch_to_record(batch, row)?);
      }
    }
    records.sort_by_key(|r| r.segment_index);

    Ok(records)
  }

  /// Hybrid search: dense-vector results first, then keyword results,
  /// de-duplicated by `(document_id, segment_id)` and truncated to `limit`.
  #[tracing::instrument(level = "trace", skip(self))]
  pub async fn search(&self, query_text: &str, limit: usize) -> Result<Vec<IndexRecord>> {
    if limit == 0 {
      return Ok(Vec::new());
    }
    let table = self.segments_table().await?;

    // Vector leg; on embedder failure fall back to the zero vector so the
    // keyword leg still contributes
    let query_vector = match self.embedder.embed(query_text, EmbeddingMode::Query).await {
      Ok(vector) => vector,
      Err(e) => {
        warn!(err = %e, "Query embedding failed; vector leg degraded to zero vector");
        vec![0.0; self.vector_dim]
      }
    };

    let vector_batches: Vec<RecordBatch> = table
      .vector_search(query_vector)?
      .limit(limit)
      .execute()
      .await?
      .try_collect()
      .await?;
    let vector_hits = batches_to_records(&vector_batches)?;

    // Keyword leg over the extracted query keywords
    let keywords = extract_keywords(query_text);
    let fts_hits = if keywords.is_empty() {
      Vec::new()
    } else {
      let fts_batches: Vec<RecordBatch> = table
        .query()
        .full_text_search(FullTextSearchQuery::new(keywords))
        .limit(limit)
        .execute()
        .await?
        .try_collect()
        .await?;
      batches_to_records(&fts_batches)?
    };

    debug!(
      vector_hits = vector_hits.len(),
      fts_hits = fts_hits.len(),
      "Hybrid search legs complete"
    );

    Ok(merge_hits(vector_hits, fts_hits, limit))
  }

  /// Bulk delete for the workflow cascade
  #[tracing::instrument(level = "trace", skip(self))]
  pub async fn delete_document(&self, document_id: &str) -> Result<()> {
    let _guard = self.write_lock.lock().await;
    let table = self.segments_table().await?;
    table.delete(&format!("document_id = '{}'", escape(document_id))).await?;
    Ok(())
  }

  /// Total row count (test and ops visibility)
  pub async fn count_segments(&self, document_id: &str) -> Result<usize> {
    let table = self.segments_table().await?;
    let count = table
      .count_rows(Some(format!("document_id = '{}'", escape(document_id))))
      .await?;
    Ok(count)
  }
}

/// Merge the two search legs: vector hits first, then keyword hits,
/// de-duplicated by `(document_id, segment_id)` keeping the earlier
/// occurrence, truncated to `limit`.
pub fn merge_hits(vector_hits: Vec<IndexRecord>, fts_hits: Vec<IndexRecord>, limit: usize) -> Vec<IndexRecord> {
  let mut seen = std::collections::HashSet::new();
  let mut combined = Vec::new();

  for record in vector_hits.into_iter().chain(fts_hits) {
    let key = (record.document_id.clone(), record.segment_id.clone());
    if seen.insert(key) {
      combined.push(record);
      if combined.len() == limit {
        break;
      }
    }
  }

  combined
}

fn escape(value: &str) -> String {
  value.replace('\'', "''")
}

fn batches_to_records(batches: &[RecordBatch]) -> Result<Vec<IndexRecord>> {
  let mut records = Vec::new();
  for batch in batches {
    for row in 0..batch.num_rows() {
      records.push(batch_to_record(batch, row)?);
    }
  }
  Ok(records)
}

fn record_to_batch(record: &NewIndexRecord, now_millis: i64, vector_dim: usize) -> Result<RecordBatch> {
  let document_id = StringArray::from(vec![record.document_id.clone()]);
  let segment_id = StringArray::from(vec![record.segment_id.clone()]);
  let segment_index = UInt32Array::from(vec![record.segment_index as u32]);
  let status = StringArray::from(vec![record.status.clone()]);
  let content = StringArray::from(vec![record.content.clone()]);
  let content_combined = StringArray::from(vec![record.content_combined.clone()]);
  let keywords = StringArray::from(vec![record.keywords.clone()]);
  let tools_json = StringArray::from(vec![record.tools_json.clone()]);
  let file_uri = StringArray::from(vec![record.file_uri.clone()]);
  let file_type = StringArray::from(vec![record.file_type.clone()]);
  let image_uri = StringArray::from(vec![record.image_uri.clone()]);
  let zero_vector = BooleanArray::from(vec![record.zero_vector]);
  let created_at = Int64Array::from(vec![now_millis]);
  let updated_at = Int64Array::from(vec![now_millis]);

  let mut vec_padded = record.vector.clone();
  vec_padded.resize(vector_dim, 0.0);
  let vector_arr = Float32Array::from(vec_padded);

  let field = Arc::new(arrow_schema::Field::new("item", arrow_schema::DataType::Float32, true));
  let vector_list = FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(vector_arr), None)?;

  let batch = RecordBatch::try_new(
    segments_schema(vector_dim),
    vec![
      Arc::new(document_id),
      Arc::new(segment_id),
      Arc::new(segment_index),
      Arc::new(status),
      Arc::new(content),
      Arc::new(content_combined),
      Arc::new(keywords),
      Arc::new(tools_json),
      Arc::new(file_uri),
      Arc::new(file_type),
      Arc::new(image_uri),
      Arc::new(zero_vector),
      Arc::new(created_at),
      Arc::new(updated_at),
      Arc::new(vector_list),
    ],
  )?;

  Ok(batch)
}

fn batch_to_record(batch: &RecordBatch, row: usize) -> Result<IndexRecord> {
  let get_string = |name: &str| -> Result<String> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<StringArray>())
      .map(|a| a.value(row).to_string())
      .ok_or_else(|| DbError::NotFound(format!("column {}", name)))
  };

  let get_u32 = |name: &str| -> Result<u32> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
      .map(|a| a.value(row))
      .ok_or_else(|| DbError::NotFound(format!("column {}", name)))
  };

  let get_i64 = |name: &str| -> Result<i64> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
      .map(|a| a.value(row))
      .ok_or_else(|| DbError::NotFound(format!("column {}", name)))
  };

  let image_uri = batch
    .column_by_name("image_uri")
    .and_then(|c| c.as_any().downcast_ref::<StringArray>())
    .and_then(|a| if a.is_null(row) { None } else { Some(a.value(row).to_string()) });

  let zero_vector = batch
    .column_by_name("zero_vector")
    .and_then(|c| c.as_any().downcast_ref::<BooleanArray>())
    .map(|a| a.value(row))
    .unwrap_or(false);

  let vector = batch
    .column_by_name("vector")
    .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
    .map(|a| {
      let values = a.value(row);
      values
        .as_any()
        .downcast_ref::<Float32Array>()
        .map(|f| f.values().to_vec())
        .unwrap_or_default()
    })
    .unwrap_or_default();

  Ok(IndexRecord {
    document_id: get_string("document_id")?,
    segment_id: get_string("segment_id")?,
    segment_index: get_u32("segment_index")? as usize,
    status: get_string("status")?,
    content: get_string("content")?,
    content_combined: get_string("content_combined")?,
    keywords: get_string("keywords")?,
    tools_json: get_string("tools_json")?,
    file_uri: get_string("file_uri")?,
    file_type: get_string("file_type")?,
    image_uri,
    zero_vector,
    created_at: get_i64("created_at")?,
    updated_at: get_i64("updated_at")?,
    vector,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(document_id: &str, segment_id: &str, index: usize) -> IndexRecord {
    IndexRecord {
      document_id: document_id.into(),
      segment_id: segment_id.into(),
      segment_index: index,
      status: "completed".into(),
      content: String::new(),
      content_combined: String::new(),
      keywords: String::new(),
      tools_json: "{}".into(),
      file_uri: String::new(),
      file_type: String::new(),
      image_uri: None,
      zero_vector: false,
      created_at: 0,
      updated_at: 0,
      vector: Vec::new(),
    }
  }

  #[test]
  fn merge_is_vector_first_with_dedup() {
    let vector_hits = vec![record("d", "s0", 0), record("d", "s1", 1)];
    let fts_hits = vec![record("d", "s1", 1), record("d", "s2", 2)];

    let merged = merge_hits(vector_hits, fts_hits, 10);
    let ids: Vec<&str> = merged.iter().map(|r| r.segment_id.as_str()).collect();
    assert_eq!(ids, vec!["s0", "s1", "s2"]);
  }

  #[test]
  fn merge_truncates_to_limit() {
    let vector_hits = vec![record("d", "s0", 0), record("d", "s1", 1)];
    let fts_hits = vec![record("d", "s2", 2), record("d", "s3", 3)];

    let merged = merge_hits(vector_hits, fts_hits, 3);
    assert_eq!(merged.len(), 3);
    assert_eq!(merged[2].segment_id, "s2");
  }

  #[test]
  fn merge_dedups_across_documents_independently() {
    let vector_hits = vec![record("a", "s0", 0)];
    let fts_hits = vec![record("b", "s0", 0)];

    // Same segment id under different documents is two distinct records
    let merged = merge_hits(vector_hits, fts_hits, 10);
    assert_eq!(merged.len(), 2);
  }

  #[test]
  fn batch_roundtrip_preserves_fields() {
    let new_record = NewIndexRecord {
      document_id: "d1".into(),
      segment_id: "d1-0001".into(),
      segment_index: 1,
      status: "completed".into(),
      content: "body".into(),
      content_combined: "## PDF Text\nbody".into(),
      keywords: "body".into(),
      tools_json: "{}".into(),
      file_uri: "store://b/projects/p/documents/d1/f.pdf".into(),
      file_type: "application/pdf".into(),
      image_uri: Some("store://b/img.png".into()),
      zero_vector: true,
      vector: vec![0.5, 0.25],
    };

    let batch = record_to_batch(&new_record, 1234, 4).unwrap();
    let record = batch_to_record(&batch, 0).unwrap();

    assert_eq!(record.segment_id, "d1-0001");
    assert_eq!(record.segment_index, 1);
    assert_eq!(record.image_uri.as_deref(), Some("store://b/img.png"));
    assert!(record.zero_vector);
    assert_eq!(record.created_at, 1234);
    // Vector padded out to the fixed dimension
    assert_eq!(record.vector, vec![0.5, 0.25, 0.0, 0.0]);
  }
}
