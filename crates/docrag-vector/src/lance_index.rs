//! Durable vector index over a LanceDB table.
//!
//! Every upsert is a single `merge_insert` commit keyed on `id` that also
//! deletes the document's rows missing from the new set, so each table version
//! holds either the old or the new entries of a document, never a mix.
//!
//! Commits through one handle run one at a time, whatever document they touch.
//! Two `merge_insert` commits racing on the same table version conflict, and
//! Lance reports that as an error rather than retrying the write.
//! Per-document ordering is the caller's concern (`DocumentLocks` in the
//! retrieval crate); this lock only keeps unrelated commits from colliding.

use std::sync::{Arc, OnceLock};

use arrow_array::{Int32Array, Int64Array, RecordBatch, StringArray};
use async_trait::async_trait;
use docrag_core::config::{IndexSettings, SearchMode};
use docrag_core::similarity::{cosine, normalize, TopK};
use docrag_core::traits::VectorIndex;
use docrag_core::types::{entry_id, DocumentFilter, IndexEntry, RankedChunk, SourceKind};
use docrag_core::{Error, Result};
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::index_build::{build_ivfpq_index, compute_ivfpq_params, has_vector_index};
use crate::memory::validate_entries;
use crate::schema::{entries_schema, vector_dim, VECTOR_COLUMN};
use crate::table::{
    arrow_err, collect, ensure_table, i32_col, i64_col, in_list, open_table, reader, sql_quote, str_col, table_exists, vector_array,
    vector_at, vector_col,
};

#[derive(Debug, Clone)]
pub struct LanceSearchOptions {
    pub mode: SearchMode,
    pub nprobes: usize,
    pub refine_factor: u32,
}

impl Default for LanceSearchOptions {
    fn default() -> Self {
        Self::from(&IndexSettings::default())
    }
}

impl From<&IndexSettings> for LanceSearchOptions {
    fn from(s: &IndexSettings) -> Self {
        Self { mode: s.mode, nprobes: s.nprobes, refine_factor: s.refine_factor }
    }
}

pub struct LanceIndex {
    conn: Connection,
    name: String,
    table: OnceCell<Table>,
    dim: OnceLock<usize>,
    options: LanceSearchOptions,
    // Serialises commits from this handle; readers never take it.
    writer: Mutex<()>,
}

impl LanceIndex {
    /// Opens table `name`. An existing table fixes the dimension; a configured
    /// `dim` that disagrees with it is an error. Without either, the table is
    /// created on the first upsert.
    pub async fn open(conn: Connection, name: &str, dim: Option<usize>, options: LanceSearchOptions) -> Result<Self> {
        let table = OnceCell::new();
        let pinned = OnceLock::new();
        if let Some(existing) = open_table(&conn, name).await? {
            let schema = existing.schema().await.map_err(Error::index_io)?;
            let stored = vector_dim(&schema)
                .ok_or_else(|| Error::IndexIo(format!("table `{name}` has no `{VECTOR_COLUMN}` column")))?;
            if let Some(expected) = dim {
                if expected != stored {
                    return Err(Error::DimensionMismatch { expected: stored, actual: expected });
                }
            }
            let _ = pinned.set(stored);
            let _ = table.set(existing);
        } else if let Some(d) = dim {
            let created = ensure_table(&conn, name, entries_schema(d)).await?;
            let _ = pinned.set(d);
            let _ = table.set(created);
        }
        debug!(table = name, dim = ?pinned.get(), "vector index opened");
        Ok(Self { conn, name: name.to_string(), table, dim: pinned, options, writer: Mutex::new(()) })
    }

    /// Like [`LanceIndex::open`], but a table whose schema or data cannot be
    /// read is dropped and recreated empty. The flag is `true` when that
    /// happened; the entries then have to be rebuilt from the registry.
    pub async fn open_or_recover(
        conn: Connection,
        name: &str,
        dim: Option<usize>,
        options: LanceSearchOptions,
    ) -> Result<(Self, bool)> {
        let opened = match Self::open(conn.clone(), name, dim, options.clone()).await {
            Ok(index) => index.verify().await.map(|()| index),
            Err(e) => Err(e),
        };
        match opened {
            Ok(index) => Ok((index, false)),
            Err(Error::IndexIo(reason)) => {
                warn!(table = name, %reason, "vector table unreadable, recreating it empty");
                Ok((Self::recreate(conn, name, dim, options).await?, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Drops table `name` if present and opens a fresh one.
    pub async fn recreate(conn: Connection, name: &str, dim: Option<usize>, options: LanceSearchOptions) -> Result<Self> {
        if table_exists(&conn, name).await? {
            conn.drop_table(name, &[]).await.map_err(Error::index_io)?;
            info!(table = name, "vector table dropped");
        }
        Self::open(conn, name, dim, options).await
    }

    /// Reads the `document_id` of every row; fails when the table data is unreadable.
    pub async fn verify(&self) -> Result<()> {
        self.documents().await.map(|_| ())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn table_for_write(&self, dim: usize) -> Result<&Table> {
        let expected = *self.dim.get_or_init(|| dim);
        if expected != dim {
            return Err(Error::DimensionMismatch { expected, actual: dim });
        }
        self.table
            .get_or_try_init(|| ensure_table(&self.conn, &self.name, entries_schema(expected)))
            .await
    }

    fn to_batch(&self, entries: &[IndexEntry], dim: usize) -> Result<RecordBatch> {
        let columns: Vec<arrow_array::ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(entries.iter().map(|e| entry_id(&e.document_id, e.chunk_index)))),
            Arc::new(StringArray::from_iter_values(entries.iter().map(|e| e.document_id.as_str()))),
            Arc::new(Int32Array::from_iter_values(entries.iter().map(|e| e.chunk_index as i32))),
            Arc::new(StringArray::from_iter_values(entries.iter().map(|e| e.text.as_str()))),
            Arc::new(Int64Array::from_iter_values(entries.iter().map(|e| e.start as i64))),
            Arc::new(Int64Array::from_iter_values(entries.iter().map(|e| e.end as i64))),
            Arc::new(StringArray::from_iter_values(entries.iter().map(|e| e.content_hash.as_str()))),
            Arc::new(vector_array(entries.iter().map(|e| normalize(&e.vector)), dim)),
        ];
        RecordBatch::try_new(entries_schema(dim), columns).map_err(arrow_err)
    }

    fn filter_predicate(filter: Option<&DocumentFilter>) -> Option<String> {
        filter.map(|f| in_list("document_id", &f.document_ids))
    }

    /// Full scan with exact cosine.
    async fn search_exact(&self, table: &Table, query: &[f32], k: usize, predicate: Option<String>) -> Result<Vec<RankedChunk>> {
        let mut q = table.query();
        if let Some(p) = predicate {
            q = q.only_if(p);
        }
        let batches = collect(q.execute().await.map_err(Error::index_io)?).await?;
        let mut top = TopK::new(k);
        for batch in &batches {
            for candidate in rows_to_ranked(batch, query)? {
                top.push(candidate);
            }
        }
        Ok(top.into_sorted())
    }

    /// ANN candidates re-scored with exact cosine.
    async fn search_approximate(&self, table: &Table, query: &[f32], k: usize, predicate: Option<String>) -> Result<Vec<RankedChunk>> {
        let mut q = table
            .vector_search(query.to_vec())
            .map_err(Error::index_io)?
            .column(VECTOR_COLUMN)
            .distance_type(DistanceType::Cosine)
            .nprobes(self.options.nprobes)
            .refine_factor(self.options.refine_factor)
            .limit(k);
        if let Some(p) = predicate {
            q = q.only_if(p);
        }
        let batches = collect(q.execute().await.map_err(Error::index_io)?).await?;
        let mut top = TopK::new(k);
        for batch in &batches {
            for candidate in rows_to_ranked(batch, query)? {
                top.push(candidate);
            }
        }
        Ok(top.into_sorted())
    }

    /// Trains an IVF_PQ index over the current rows. Returns `false` when the
    /// table is too small to train.
    pub async fn build_ann_index(&self) -> Result<bool> {
        let Some(table) = self.table.get() else {
            return Ok(false);
        };
        let Some(dim) = self.dim() else {
            return Ok(false);
        };
        let rows = table.count_rows(None).await.map_err(Error::index_io)?;
        let params = compute_ivfpq_params(rows, dim);
        if params.nlist < 2 || rows < 256 {
            info!(rows, "too few rows to train an ANN index");
            return Ok(false);
        }
        build_ivfpq_index(table, &params).await?;
        info!(rows, nlist = params.nlist, m = params.m, "ANN index built");
        Ok(true)
    }
}

/// Converts a result batch into scored candidates.
fn rows_to_ranked(batch: &RecordBatch, query: &[f32]) -> Result<Vec<RankedChunk>> {
    let doc = str_col(batch, "document_id")?;
    let idx = i32_col(batch, "chunk_index")?;
    let text = str_col(batch, "text")?;
    let start = i64_col(batch, "start_offset")?;
    let end = i64_col(batch, "end_offset")?;
    let vectors = vector_col(batch, VECTOR_COLUMN)?;
    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let Some(v) = vector_at(vectors, i) else { continue };
        out.push(RankedChunk {
            document_id: doc.value(i).to_string(),
            chunk_index: idx.value(i) as usize,
            text: text.value(i).to_string(),
            start: start.value(i) as usize,
            end: end.value(i) as usize,
            score: cosine(query, &v),
            source: SourceKind::Vector,
            path: None,
        });
    }
    Ok(out)
}

#[async_trait]
impl VectorIndex for LanceIndex {
    fn dim(&self) -> Option<usize> {
        self.dim.get().copied()
    }

    async fn upsert(&self, document_id: &str, mut entries: Vec<IndexEntry>) -> Result<()> {
        validate_entries(document_id, &entries)?;
        let Some(first) = entries.first() else {
            return self.delete(document_id).await;
        };
        let dim = first.vector.len();
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != dim) {
            return Err(Error::DimensionMismatch { expected: dim, actual: bad.vector.len() });
        }
        let _guard = self.writer.lock().await;
        let table = self.table_for_write(dim).await?;
        entries.sort_by_key(|e| e.chunk_index);

        let batch = self.to_batch(&entries, dim)?;
        let mut merge = table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all()
            .when_not_matched_by_source_delete(Some(format!("document_id = {}", sql_quote(document_id))));
        merge.execute(reader(batch)).await.map_err(Error::index_io)?;
        debug!(document_id, entries = entries.len(), "entries committed");
        Ok(())
    }

    async fn delete(&self, document_id: &str) -> Result<()> {
        if let Some(table) = self.table.get() {
            let _guard = self.writer.lock().await;
            table
                .delete(&format!("document_id = {}", sql_quote(document_id)))
                .await
                .map_err(Error::index_io)?;
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize, filter: Option<&DocumentFilter>) -> Result<Vec<RankedChunk>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".into()));
        }
        let (Some(table), Some(dim)) = (self.table.get(), self.dim()) else {
            return Ok(Vec::new());
        };
        if query.len() != dim {
            return Err(Error::DimensionMismatch { expected: dim, actual: query.len() });
        }
        if filter.is_some_and(|f| f.document_ids.is_empty()) {
            return Ok(Vec::new());
        }
        let predicate = Self::filter_predicate(filter);
        match self.options.mode {
            SearchMode::Approximate if has_vector_index(table).await? => {
                debug!(k, "approximate search");
                self.search_approximate(table, query, k, predicate).await
            }
            _ => {
                debug!(k, "exact search");
                self.search_exact(table, query, k, predicate).await
            }
        }
    }

    async fn count(&self) -> Result<usize> {
        match self.table.get() {
            Some(table) => table.count_rows(None).await.map_err(Error::index_io),
            None => Ok(0),
        }
    }

    async fn documents(&self) -> Result<Vec<(String, usize)>> {
        let Some(table) = self.table.get() else {
            return Ok(Vec::new());
        };
        let batches = collect(
            table
                .query()
                .select(lancedb::query::Select::columns(&["document_id"]))
                .execute()
                .await
                .map_err(Error::index_io)?,
        )
        .await?;
        let mut counts = std::collections::BTreeMap::<String, usize>::new();
        for batch in &batches {
            let ids = str_col(batch, "document_id")?;
            for i in 0..batch.num_rows() {
                *counts.entry(ids.value(i).to_string()).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }

    async fn clear(&self) -> Result<()> {
        if let Some(table) = self.table.get() {
            let _guard = self.writer.lock().await;
            table.delete("true").await.map_err(Error::index_io)?;
            info!(table = %self.name, "vector index cleared");
        }
        Ok(())
    }
}
