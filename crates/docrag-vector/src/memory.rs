//! In-process vector index: exact cosine over per-document snapshots.
//!
//! Each document's entries live in an immutable `Arc<[StoredEntry]>`. An upsert
//! builds the new slice off-lock and swaps it in, so a search that cloned the
//! map sees each document either fully old or fully new.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;
use docrag_core::similarity::{dot, normalize, TopK};
use docrag_core::traits::VectorIndex;
use docrag_core::types::{DocumentFilter, IndexEntry, RankedChunk, SourceKind};
use docrag_core::{Error, Result};

struct StoredEntry {
    entry: IndexEntry,
    unit: Vec<f32>,
}

type Snapshot = BTreeMap<String, Arc<[StoredEntry]>>;

#[derive(Default)]
pub struct MemoryIndex {
    docs: RwLock<Snapshot>,
    dim: OnceLock<usize>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dim(dim: usize) -> Self {
        let index = Self::default();
        let _ = index.dim.set(dim);
        index
    }

    fn snapshot(&self) -> Snapshot {
        self.docs.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn check_dim(&self, actual: usize) -> Result<()> {
        let expected = *self.dim.get_or_init(|| actual);
        if expected != actual {
            return Err(Error::DimensionMismatch { expected, actual });
        }
        Ok(())
    }
}

pub(crate) fn validate_entries(document_id: &str, entries: &[IndexEntry]) -> Result<()> {
    for e in entries {
        if e.document_id != document_id {
            return Err(Error::InvalidArgument(format!(
                "entry for document `{}` passed to upsert of `{document_id}`",
                e.document_id
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn dim(&self) -> Option<usize> {
        self.dim.get().copied()
    }

    async fn upsert(&self, document_id: &str, entries: Vec<IndexEntry>) -> Result<()> {
        validate_entries(document_id, &entries)?;
        for e in &entries {
            self.check_dim(e.vector.len())?;
        }
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        if entries.is_empty() {
            docs.remove(document_id);
            return Ok(());
        }
        let stored: Arc<[StoredEntry]> = entries
            .into_iter()
            .map(|entry| StoredEntry { unit: normalize(&entry.vector), entry })
            .collect::<Vec<_>>()
            .into();
        docs.insert(document_id.to_string(), stored);
        Ok(())
    }

    async fn delete(&self, document_id: &str) -> Result<()> {
        self.docs.write().unwrap_or_else(|e| e.into_inner()).remove(document_id);
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize, filter: Option<&DocumentFilter>) -> Result<Vec<RankedChunk>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".into()));
        }
        let Some(dim) = self.dim() else {
            return Ok(Vec::new());
        };
        if query.len() != dim {
            return Err(Error::DimensionMismatch { expected: dim, actual: query.len() });
        }
        let q = normalize(query);
        let mut top = TopK::new(k);
        for (doc_id, entries) in self.snapshot() {
            if filter.is_some_and(|f| !f.allows(&doc_id)) {
                continue;
            }
            for stored in entries.iter() {
                let e = &stored.entry;
                top.push(RankedChunk {
                    document_id: e.document_id.clone(),
                    chunk_index: e.chunk_index,
                    text: e.text.clone(),
                    start: e.start,
                    end: e.end,
                    score: dot(&q, &stored.unit).clamp(-1.0, 1.0),
                    source: SourceKind::Vector,
                    path: None,
                });
            }
        }
        Ok(top.into_sorted())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.snapshot().values().map(|e| e.len()).sum())
    }

    async fn documents(&self) -> Result<Vec<(String, usize)>> {
        Ok(self.snapshot().into_iter().map(|(id, e)| (id, e.len())).collect())
    }

    async fn clear(&self) -> Result<()> {
        self.docs.write().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }
}
