use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use std::sync::Arc;

pub const VECTOR_COLUMN: &str = "vector";

pub fn vector_field(dim: usize) -> Field {
    Field::new(
        VECTOR_COLUMN,
        DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32),
        true,
    )
}

/// One row per chunk: `id` is `"<document_id>:<chunk_index>"`.
pub fn entries_schema(dim: usize) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("document_id", DataType::Utf8, false),
        Field::new("chunk_index", DataType::Int32, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("start_offset", DataType::Int64, false),
        Field::new("end_offset", DataType::Int64, false),
        Field::new("content_hash", DataType::Utf8, false),
        vector_field(dim),
    ]))
}

pub fn documents_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("path", DataType::Utf8, false),
        Field::new("content_hash", DataType::Utf8, false),
        Field::new("chunk_count", DataType::Int64, false),
        Field::new("ingested_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
    ]))
}

pub fn chunks_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("document_id", DataType::Utf8, false),
        Field::new("chunk_index", DataType::Int32, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("start_offset", DataType::Int64, false),
        Field::new("end_offset", DataType::Int64, false),
    ]))
}

pub fn cache_schema(dim: usize) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("content_hash", DataType::Utf8, false),
        Field::new("embedder_id", DataType::Utf8, false),
        Field::new("created_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
        vector_field(dim),
    ]))
}

/// Width of the `vector` column, if the schema has one.
pub fn vector_dim(schema: &Schema) -> Option<usize> {
    match schema.field_with_name(VECTOR_COLUMN).ok()?.data_type() {
        DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
        _ => None,
    }
}
