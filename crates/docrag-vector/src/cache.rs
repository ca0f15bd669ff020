//! Lance-backed embedding cache keyed by `(content_hash, embedder_id)`.
//!
//! Consulted before calling the embedding gateway and written through on
//! misses, so re-ingesting or rebuilding unchanged chunks costs no model calls.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arrow_array::{RecordBatch, StringArray, TimestampMillisecondArray};
use chrono::Utc;
use docrag_core::{Error, Result};
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, Table};
use tokio::sync::OnceCell;

use crate::schema::{cache_schema, vector_dim, VECTOR_COLUMN};
use crate::table::{arrow_err, collect, ensure_table, in_list, open_table, reader, sql_quote, str_col, vector_array, vector_at, vector_col};

pub struct EmbeddingCache {
    conn: Connection,
    name: String,
    table: OnceCell<Table>,
}

impl EmbeddingCache {
    pub async fn open(conn: Connection, name: &str) -> Result<Self> {
        let table = OnceCell::new();
        if let Some(existing) = open_table(&conn, name).await? {
            let _ = table.set(existing);
        }
        Ok(Self { conn, name: name.to_string(), table })
    }

    async fn table_dim(table: &Table) -> Result<Option<usize>> {
        let schema = table.schema().await.map_err(Error::index_io)?;
        Ok(vector_dim(&schema))
    }

    /// Cached vectors for the given chunk hashes; misses are simply absent.
    pub async fn get_many(&self, embedder_id: &str, hashes: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        let mut out = HashMap::new();
        let Some(table) = self.table.get() else {
            return Ok(out);
        };
        if hashes.is_empty() {
            return Ok(out);
        }
        let predicate = format!("embedder_id = {} AND {}", sql_quote(embedder_id), in_list("content_hash", hashes));
        let stream = table.query().only_if(predicate).execute().await.map_err(Error::index_io)?;
        for batch in collect(stream).await? {
            let hash_col = str_col(&batch, "content_hash")?;
            let vec_col = vector_col(&batch, VECTOR_COLUMN)?;
            for i in 0..batch.num_rows() {
                if let Some(v) = vector_at(vec_col, i) {
                    out.insert(hash_col.value(i).to_string(), v);
                }
            }
        }
        Ok(out)
    }

    /// Stores `(content_hash, vector)` pairs; existing keys are left untouched.
    pub async fn put_many(&self, embedder_id: &str, entries: &[(String, Vec<f32>)]) -> Result<()> {
        let Some((_, first)) = entries.first() else {
            return Ok(());
        };
        let dim = first.len();
        let table = self.table.get_or_try_init(|| ensure_table(&self.conn, &self.name, cache_schema(dim))).await?;
        if Self::table_dim(table).await? != Some(dim) {
            tracing::warn!(embedder_id, dim, "embedding cache holds another dimension; not caching");
            return Ok(());
        }
        let mut seen = HashSet::new();
        let entries: Vec<&(String, Vec<f32>)> =
            entries.iter().filter(|(h, v)| v.len() == dim && seen.insert(h.as_str())).collect();
        let now = Utc::now().timestamp_millis();
        let batch = RecordBatch::try_new(
            cache_schema(dim),
            vec![
                Arc::new(StringArray::from_iter_values(entries.iter().map(|(h, _)| h.as_str()))),
                Arc::new(StringArray::from_iter_values(entries.iter().map(|_| embedder_id))),
                Arc::new(TimestampMillisecondArray::from(vec![now; entries.len()])),
                Arc::new(vector_array(entries.iter().map(|(_, v)| v.clone()), dim)),
            ],
        )
        .map_err(arrow_err)?;
        let mut merge = table.merge_insert(&["content_hash", "embedder_id"]);
        merge.when_not_matched_insert_all();
        merge.execute(reader(batch)).await.map_err(Error::index_io)?;
        Ok(())
    }

    pub async fn count(&self) -> Result<usize> {
        match self.table.get() {
            Some(table) => table.count_rows(None).await.map_err(Error::index_io),
            None => Ok(0),
        }
    }
}
