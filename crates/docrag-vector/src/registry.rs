//! Registry of ingested documents and their chunks.
//!
//! The registry is the visibility gate of the system: ingestion registers a
//! document only after its index entries are committed, and removal
//! unregisters before deleting entries. Readers consult the in-memory cache.
//!
//! The Lance-backed store writes two tables per registration, and those
//! writes go through one lock so concurrent registrations never race a
//! table commit.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use arrow_array::{Int32Array, Int64Array, RecordBatch, StringArray, TimestampMillisecondArray};
use chrono::{DateTime, Utc};
use docrag_core::traits::VectorIndex;
use docrag_core::types::{Chunk, Document};
use docrag_core::{Error, Result};
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, Table};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::schema::{chunks_schema, documents_schema};
use crate::table::{arrow_err, collect, ensure_table, i32_col, i64_col, in_list, reader, sql_quote, str_col, ts_col};

enum RegistryStore {
    Memory { chunks: RwLock<BTreeMap<String, Vec<Chunk>>> },
    Lance { documents: Table, chunks: Table, writer: Mutex<()> },
}

pub struct DocumentRegistry {
    docs: RwLock<BTreeMap<String, Document>>,
    store: RegistryStore,
}

/// Outcome of [`DocumentRegistry::reconcile`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Unregistered documents whose index entries were deleted.
    pub removed_orphans: Vec<String>,
    /// Registered documents whose entries are missing or incomplete.
    pub missing_entries: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.removed_orphans.is_empty() && self.missing_entries.is_empty()
    }
}

impl DocumentRegistry {
    pub fn in_memory() -> Self {
        Self { docs: RwLock::default(), store: RegistryStore::Memory { chunks: RwLock::default() } }
    }

    pub async fn open_lance(conn: &Connection, documents_table: &str, chunks_table: &str) -> Result<Self> {
        let documents = ensure_table(conn, documents_table, documents_schema()).await?;
        let chunks = ensure_table(conn, chunks_table, chunks_schema()).await?;
        let mut docs = BTreeMap::new();
        for batch in collect(documents.query().execute().await.map_err(Error::index_io)?).await? {
            for doc in documents_from_batch(&batch)? {
                docs.insert(doc.id.clone(), doc);
            }
        }
        info!(documents = docs.len(), "document registry loaded");
        Ok(Self {
            docs: RwLock::new(docs),
            store: RegistryStore::Lance { documents, chunks, writer: Mutex::new(()) },
        })
    }

    /// Records `document` with its chunks, replacing any previous version.
    pub async fn register(&self, document: Document, chunks: Vec<Chunk>) -> Result<()> {
        if chunks.len() != document.chunk_count {
            return Err(Error::InvalidArgument(format!(
                "document `{}` declares {} chunks, {} given",
                document.id,
                document.chunk_count,
                chunks.len()
            )));
        }
        if let Some(c) = chunks.iter().find(|c| c.document_id != document.id) {
            return Err(Error::InvalidArgument(format!("chunk of `{}` registered under `{}`", c.document_id, document.id)));
        }
        match &self.store {
            RegistryStore::Memory { chunks: store } => {
                store.write().unwrap_or_else(|e| e.into_inner()).insert(document.id.clone(), chunks);
            }
            RegistryStore::Lance { documents, chunks: chunk_table, writer } => {
                let _guard = writer.lock().await;
                // Chunks first: a document row always has its chunk rows.
                let mut merge = chunk_table.merge_insert(&["id"]);
                merge
                    .when_matched_update_all(None)
                    .when_not_matched_insert_all()
                    .when_not_matched_by_source_delete(Some(format!("document_id = {}", sql_quote(&document.id))));
                merge.execute(reader(chunks_batch(&chunks)?)).await.map_err(Error::index_io)?;

                let mut merge = documents.merge_insert(&["id"]);
                merge.when_matched_update_all(None).when_not_matched_insert_all();
                merge.execute(reader(documents_batch(std::slice::from_ref(&document))?)).await.map_err(Error::index_io)?;
            }
        }
        debug!(document_id = %document.id, chunks = document.chunk_count, "document registered");
        self.docs.write().unwrap_or_else(|e| e.into_inner()).insert(document.id.clone(), document);
        Ok(())
    }

    /// True when some registered document has exactly this content hash.
    pub fn exists(&self, content_hash: &str) -> bool {
        self.read().values().any(|d| d.content_hash == content_hash)
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    pub fn list(&self) -> Vec<Document> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Document>> {
        self.docs.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Stored chunks of `id`, ordered by chunk index.
    pub async fn chunks(&self, id: &str) -> Result<Vec<Chunk>> {
        if !self.contains(id) {
            return Err(Error::NotFound(format!("document `{id}`")));
        }
        match &self.store {
            RegistryStore::Memory { chunks } => {
                Ok(chunks.read().unwrap_or_else(|e| e.into_inner()).get(id).cloned().unwrap_or_default())
            }
            RegistryStore::Lance { chunks, .. } => {
                let stream = chunks
                    .query()
                    .only_if(format!("document_id = {}", sql_quote(id)))
                    .execute()
                    .await
                    .map_err(Error::index_io)?;
                let mut out = Vec::new();
                for batch in collect(stream).await? {
                    out.extend(chunks_from_batch(&batch)?);
                }
                out.sort_by_key(|c| c.index);
                Ok(out)
            }
        }
    }

    /// Unregisters `id`. Returns whether it was registered; absent ids are not an error.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let was_registered = self.docs.write().unwrap_or_else(|e| e.into_inner()).remove(id).is_some();
        match &self.store {
            RegistryStore::Memory { chunks } => {
                chunks.write().unwrap_or_else(|e| e.into_inner()).remove(id);
            }
            RegistryStore::Lance { documents, chunks, writer } => {
                let _guard = writer.lock().await;
                let predicate = format!("id = {}", sql_quote(id));
                documents.delete(&predicate).await.map_err(Error::index_io)?;
                let predicate = format!("document_id = {}", sql_quote(id));
                chunks.delete(&predicate).await.map_err(Error::index_io)?;
            }
        }
        if was_registered {
            debug!(document_id = id, "document unregistered");
        }
        Ok(was_registered)
    }

    /// Repairs skew left by an interrupted ingestion or removal: deletes index
    /// entries and chunk rows of unregistered documents, and reports registered
    /// documents whose entries are missing.
    pub async fn reconcile(&self, index: &dyn VectorIndex) -> Result<ReconcileReport> {
        let registered = self.list();
        let indexed: BTreeMap<String, usize> = index.documents().await?.into_iter().collect();
        let mut report = ReconcileReport::default();

        for id in indexed.keys() {
            if !self.contains(id) {
                index.delete(id).await?;
                report.removed_orphans.push(id.clone());
            }
        }
        for doc in &registered {
            if indexed.get(&doc.id).copied().unwrap_or(0) != doc.chunk_count {
                report.missing_entries.push(doc.id.clone());
            }
        }
        if let RegistryStore::Lance { chunks, writer, .. } = &self.store {
            let ids: BTreeSet<&str> = registered.iter().map(|d| d.id.as_str()).collect();
            let predicate =
                if ids.is_empty() { "true".to_string() } else { format!("NOT ({})", in_list("document_id", &ids)) };
            let _guard = writer.lock().await;
            chunks.delete(&predicate).await.map_err(Error::index_io)?;
        }
        if !report.is_clean() {
            warn!(orphans = report.removed_orphans.len(), missing = report.missing_entries.len(), "registry and index were out of sync");
        }
        Ok(report)
    }
}

fn documents_batch(docs: &[Document]) -> Result<RecordBatch> {
    RecordBatch::try_new(
        documents_schema(),
        vec![
            Arc::new(StringArray::from_iter_values(docs.iter().map(|d| d.id.as_str()))),
            Arc::new(StringArray::from_iter_values(docs.iter().map(|d| d.path.as_str()))),
            Arc::new(StringArray::from_iter_values(docs.iter().map(|d| d.content_hash.as_str()))),
            Arc::new(Int64Array::from_iter_values(docs.iter().map(|d| d.chunk_count as i64))),
            Arc::new(TimestampMillisecondArray::from_iter_values(docs.iter().map(|d| d.ingested_at.timestamp_millis()))),
        ],
    )
    .map_err(arrow_err)
}

fn documents_from_batch(batch: &RecordBatch) -> Result<Vec<Document>> {
    let id = str_col(batch, "id")?;
    let path = str_col(batch, "path")?;
    let hash = str_col(batch, "content_hash")?;
    let count = i64_col(batch, "chunk_count")?;
    let at = ts_col(batch, "ingested_at")?;
    Ok((0..batch.num_rows())
        .map(|i| Document {
            id: id.value(i).to_string(),
            path: path.value(i).to_string(),
            content_hash: hash.value(i).to_string(),
            chunk_count: count.value(i) as usize,
            ingested_at: DateTime::<Utc>::from_timestamp_millis(at.value(i)).unwrap_or_default(),
        })
        .collect())
}

fn chunks_batch(chunks: &[Chunk]) -> Result<RecordBatch> {
    RecordBatch::try_new(
        chunks_schema(),
        vec![
            Arc::new(StringArray::from_iter_values(chunks.iter().map(Chunk::entry_id))),
            Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.document_id.as_str()))),
            Arc::new(Int32Array::from_iter_values(chunks.iter().map(|c| c.index as i32))),
            Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.text.as_str()))),
            Arc::new(Int64Array::from_iter_values(chunks.iter().map(|c| c.start as i64))),
            Arc::new(Int64Array::from_iter_values(chunks.iter().map(|c| c.end as i64))),
        ],
    )
    .map_err(arrow_err)
}

fn chunks_from_batch(batch: &RecordBatch) -> Result<Vec<Chunk>> {
    let doc = str_col(batch, "document_id")?;
    let idx = i32_col(batch, "chunk_index")?;
    let text = str_col(batch, "text")?;
    let start = i64_col(batch, "start_offset")?;
    let end = i64_col(batch, "end_offset")?;
    Ok((0..batch.num_rows())
        .map(|i| Chunk {
            document_id: doc.value(i).to_string(),
            index: idx.value(i) as usize,
            text: text.value(i).to_string(),
            start: start.value(i) as usize,
            end: end.value(i) as usize,
        })
        .collect())
}
