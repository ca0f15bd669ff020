//! LanceDB connection helpers and Arrow column accessors shared by the tables.

use std::path::Path;

use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Int32Array, Int64Array, RecordBatch, StringArray, TimestampMillisecondArray};
use arrow_schema::SchemaRef;
use docrag_core::{Error, Result};
use futures::TryStreamExt;
use lancedb::arrow::SendableRecordBatchStream;
use lancedb::{connect, Connection, Table};

pub async fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(Error::index_io)?;
        }
    }
    connect(path.to_string_lossy().as_ref()).execute().await.map_err(Error::index_io)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await.map_err(Error::index_io)?;
    Ok(names.iter().any(|n| n == name))
}

pub async fn open_table(conn: &Connection, name: &str) -> Result<Option<Table>> {
    if !table_exists(conn, name).await? {
        return Ok(None);
    }
    conn.open_table(name).execute().await.map(Some).map_err(Error::index_io)
}

/// Opens `name`, creating it empty with `schema` when absent.
pub async fn ensure_table(conn: &Connection, name: &str, schema: SchemaRef) -> Result<Table> {
    if let Some(table) = open_table(conn, name).await? {
        return Ok(table);
    }
    tracing::debug!(table = name, "creating table");
    conn.create_empty_table(name, schema).execute().await.map_err(Error::index_io)
}

pub async fn collect(stream: SendableRecordBatchStream) -> Result<Vec<RecordBatch>> {
    stream.try_collect().await.map_err(Error::index_io)
}

/// SQL string literal with embedded quotes doubled.
pub fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `column IN ('a', 'b')`; callers handle the empty set.
pub fn in_list(column: &str, values: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    let list: Vec<String> = values.into_iter().map(|v| sql_quote(v.as_ref())).collect();
    format!("{column} IN ({})", list.join(", "))
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::IndexIo(format!("column `{name}` missing or of unexpected type")))
}

pub fn str_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    column(batch, name)
}

pub fn i32_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array> {
    column(batch, name)
}

pub fn i64_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    column(batch, name)
}

pub fn ts_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a TimestampMillisecondArray> {
    column(batch, name)
}

pub fn vector_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a FixedSizeListArray> {
    column(batch, name)
}

/// Row `i` of a vector column; `None` for a null row.
pub fn vector_at(vectors: &FixedSizeListArray, i: usize) -> Option<Vec<f32>> {
    if vectors.is_null(i) {
        return None;
    }
    Some(vectors.value(i).as_primitive::<Float32Type>().values().to_vec())
}

pub fn vector_array(vectors: impl IntoIterator<Item = Vec<f32>>, dim: usize) -> FixedSizeListArray {
    let rows = vectors.into_iter().map(|v| Some(v.into_iter().map(Some).collect::<Vec<_>>()));
    FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(rows, dim as i32)
}

pub fn reader(batch: RecordBatch) -> Box<dyn arrow_array::RecordBatchReader + Send> {
    let schema = batch.schema();
    Box::new(arrow_array::RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema))
}

pub fn arrow_err(e: arrow_schema::ArrowError) -> Error {
    Error::IndexIo(e.to_string())
}
