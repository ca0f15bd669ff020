//! Document ingestion, removal and index recovery.
//!
//! Ingesting a document runs in two phases. The prepare phase (chunk, embed)
//! can be cancelled and touches no shared state. The commit phase writes the
//! index, then the registry, and runs in its own task so that dropping the
//! caller cannot interrupt it midway.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use docrag_core::chunker::Chunker;
use docrag_core::traits::VectorIndex;
use docrag_core::types::{hash_content, Chunk, Document, IndexEntry, SourceDocument};
use docrag_core::{Error, Result};
use docrag_embed::EmbeddingGateway;
use docrag_text::KeywordIndex;
use docrag_vector::{DocumentRegistry, EmbeddingCache, ReconcileReport};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::locks::DocumentLocks;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested { chunks: usize },
    /// Same content hash as the registered version; nothing was written.
    Unchanged,
    /// No text to index; any previous version was removed.
    Empty,
}

#[derive(Debug)]
pub struct IngestReport {
    pub document_id: String,
    pub path: String,
    pub result: Result<IngestOutcome>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub documents: usize,
    pub entries: usize,
    /// Chunks that had to be re-embedded because the cache missed.
    pub embedded: usize,
    pub reconcile: ReconcileReport,
}

#[derive(Clone)]
pub struct Ingestor {
    chunker: Chunker,
    gateway: EmbeddingGateway,
    index: Arc<dyn VectorIndex>,
    registry: Arc<DocumentRegistry>,
    keyword: Option<Arc<KeywordIndex>>,
    cache: Option<Arc<EmbeddingCache>>,
    locks: DocumentLocks,
    max_concurrency: usize,
}

impl Ingestor {
    pub fn new(
        chunker: Chunker,
        gateway: EmbeddingGateway,
        index: Arc<dyn VectorIndex>,
        registry: Arc<DocumentRegistry>,
    ) -> Self {
        Self { chunker, gateway, index, registry, keyword: None, cache: None, locks: DocumentLocks::new(), max_concurrency: 1 }
    }

    pub fn with_keyword_index(mut self, keyword: Arc<KeywordIndex>) -> Self {
        self.keyword = Some(keyword);
        self
    }

    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn locks(&self) -> &DocumentLocks {
        &self.locks
    }

    pub async fn ingest(&self, doc: SourceDocument) -> Result<IngestOutcome> {
        self.ingest_with_cancel(doc, &CancellationToken::new()).await
    }

    /// Ingests one document. Cancellation is honoured until the commit phase starts.
    pub async fn ingest_with_cancel(&self, doc: SourceDocument, cancel: &CancellationToken) -> Result<IngestOutcome> {
        let guard = self.locks.lock(&doc.id).await;
        let content_hash = doc.content_hash();
        if let Some(existing) = self.registry.get(&doc.id) {
            if existing.content_hash == content_hash {
                debug!(document_id = %doc.id, "content unchanged; skipping");
                return Ok(IngestOutcome::Unchanged);
            }
        }

        let chunks = self.chunker.chunk_document(&doc.id, &doc.text)?;
        if chunks.is_empty() {
            self.remove_locked(&doc.id).await?;
            return Ok(IngestOutcome::Empty);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (vectors, _) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            embedded = self.embed_chunks(&chunks) => embedded?,
        };
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let document = Document {
            id: doc.id.clone(),
            path: doc.path.clone(),
            content_hash,
            chunk_count: chunks.len(),
            ingested_at: Utc::now(),
        };
        let count = chunks.len();
        let this = self.clone();
        let commit = tokio::spawn(async move {
            // Held until the commit lands, even when the caller is dropped.
            let _guard = guard;
            this.commit(document, chunks, vectors).await
        });
        commit.await.map_err(|e| Error::IndexIo(format!("commit task failed: {e}")))??;
        info!(document_id = %doc.id, path = %doc.path, chunks = count, "document ingested");
        Ok(IngestOutcome::Ingested { chunks: count })
    }

    /// Ingests documents concurrently up to the configured limit. Results keep
    /// input order; one document failing does not affect the others.
    pub async fn ingest_many<F>(&self, docs: Vec<SourceDocument>, cancel: &CancellationToken, on_done: F) -> Vec<IngestReport>
    where
        F: Fn(&IngestReport) + Send + Sync,
    {
        let on_done = &on_done;
        stream::iter(docs)
            .map(|doc| async move {
                let document_id = doc.id.clone();
                let path = doc.path.clone();
                let result = self.ingest_with_cancel(doc, cancel).await;
                if let Err(e) = &result {
                    warn!(document_id = %document_id, path = %path, error = %e, "ingestion failed");
                }
                let report = IngestReport { document_id, path, result };
                on_done(&report);
                report
            })
            .buffered(self.max_concurrency)
            .collect()
            .await
    }

    /// Vectors for `chunks`, served from the cache where possible. Returns the
    /// number of chunks sent to the gateway alongside.
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<(Vec<Vec<f32>>, usize)> {
        let hashes: Vec<String> = chunks.iter().map(|c| hash_content(&c.text)).collect();
        let cached = match &self.cache {
            Some(cache) => match cache.get_many(self.gateway.embedder_id(), &hashes).await {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(error = %e, "embedding cache read failed");
                    HashMap::new()
                }
            },
            None => HashMap::new(),
        };
        let misses: Vec<usize> = (0..chunks.len()).filter(|i| !cached.contains_key(&hashes[*i])).collect();
        let texts: Vec<String> = misses.iter().map(|i| chunks[*i].text.clone()).collect();
        let fresh = self.gateway.embed_batch(&texts).await?;

        let mut by_hash = cached;
        let mut new_entries = Vec::with_capacity(misses.len());
        for (i, vector) in misses.iter().zip(fresh) {
            new_entries.push((hashes[*i].clone(), vector.clone()));
            by_hash.insert(hashes[*i].clone(), vector);
        }
        if let (Some(cache), false) = (&self.cache, new_entries.is_empty()) {
            if let Err(e) = cache.put_many(self.gateway.embedder_id(), &new_entries).await {
                warn!(error = %e, "embedding cache write failed");
            }
        }
        let vectors = hashes
            .iter()
            .map(|h| by_hash.get(h).cloned().ok_or_else(|| Error::EmbeddingBackend(format!("no vector for chunk {h}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok((vectors, misses.len()))
    }

    async fn commit(self, document: Document, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<()> {
        let entries: Vec<IndexEntry> = chunks.iter().zip(vectors).map(|(c, v)| IndexEntry::from_chunk(c, v)).collect();
        self.index.upsert(&document.id, entries).await?;
        self.update_keyword(&document.id, Some(chunks.clone())).await;
        self.registry.register(document, chunks).await
    }

    async fn update_keyword(&self, document_id: &str, chunks: Option<Vec<Chunk>>) {
        let Some(keyword) = self.keyword.clone() else { return };
        let id = document_id.to_string();
        let result = tokio::task::spawn_blocking(move || match chunks {
            Some(chunks) => keyword.upsert(&id, &chunks),
            None => keyword.delete(&id),
        })
        .await
        .map_err(Error::index_io)
        .and_then(|r| r);
        if let Err(e) = result {
            warn!(document_id, error = %e, "keyword index update failed");
        }
    }

    /// Unregisters the document, then deletes its entries. Absent ids are not an error.
    pub async fn remove(&self, document_id: &str) -> Result<bool> {
        let _guard = self.locks.lock(document_id).await;
        self.remove_locked(document_id).await
    }

    async fn remove_locked(&self, document_id: &str) -> Result<bool> {
        let was_registered = self.registry.remove(document_id).await?;
        self.index.delete(document_id).await?;
        self.update_keyword(document_id, None).await;
        if was_registered {
            info!(document_id, "document removed");
        }
        Ok(was_registered)
    }

    /// Regenerates every document's index entries from the registry's chunks,
    /// then drops entries of unregistered documents.
    pub async fn rebuild(&self) -> Result<RebuildReport> {
        let mut report = RebuildReport::default();
        for doc in self.registry.list() {
            let _guard = self.locks.lock(&doc.id).await;
            let chunks = self.registry.chunks(&doc.id).await?;
            let (vectors, embedded) = self.embed_chunks(&chunks).await?;
            let entries: Vec<IndexEntry> = chunks.iter().zip(vectors).map(|(c, v)| IndexEntry::from_chunk(c, v)).collect();
            report.entries += entries.len();
            report.embedded += embedded;
            self.index.upsert(&doc.id, entries).await?;
            self.update_keyword(&doc.id, Some(chunks)).await;
            report.documents += 1;
        }
        report.reconcile = self.registry.reconcile(self.index.as_ref()).await?;
        info!(documents = report.documents, entries = report.entries, embedded = report.embedded, "index rebuilt");
        Ok(report)
    }

    /// Empties the vector and keyword indexes, then rebuilds them from the registry.
    /// Needed after switching embedders, when stale vectors must not survive.
    pub async fn rebuild_fresh(&self) -> Result<RebuildReport> {
        self.index.clear().await?;
        if let Some(keyword) = self.keyword.clone() {
            tokio::task::spawn_blocking(move || keyword.clear()).await.map_err(Error::index_io)??;
        }
        info!("indexes cleared");
        self.rebuild().await
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.registry.reconcile(self.index.as_ref()).await
    }
}
