use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};

/// Schema for the segments table.
///
/// Two co-located indices cover the same row set: the ANN index on `vector`
/// and the full-text index on `keywords`.
pub fn segments_schema(vector_dim: usize) -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("document_id", DataType::Utf8, false),
    Field::new("segment_id", DataType::Utf8, false),
    Field::new("segment_index", DataType::UInt32, false),
    Field::new("status", DataType::Utf8, false),
    Field::new("content", DataType::Utf8, false), // embedder input, capped at 10k chars
    Field::new("content_combined", DataType::Utf8, false),
    Field::new("keywords", DataType::Utf8, false),
    Field::new("tools_json", DataType::Utf8, false), // JSON object of per-tool output arrays
    Field::new("file_uri", DataType::Utf8, false),
    Field::new("file_type", DataType::Utf8, false),
    Field::new("image_uri", DataType::Utf8, true),
    Field::new("zero_vector", DataType::Boolean, false), // embedder failed, retry-eligible
    Field::new("created_at", DataType::Int64, false),    // Unix timestamp ms
    Field::new("updated_at", DataType::Int64, false),
    Field::new(
      "vector",
      DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), vector_dim as i32),
      false,
    ),
  ]))
}
