//! Retrieval pipeline: ingestion into the vector and keyword indexes, and
//! ranked query-time retrieval gated on the document registry.

pub mod context;
pub mod ingest;
pub mod locks;
pub mod ranking;
pub mod retriever;

use std::sync::Arc;

use docrag_core::chunker::Chunker;
use docrag_core::config::{Settings, StorageBackend};
use docrag_core::traits::{Embedder, VectorIndex};
use docrag_core::{Error, Result};
use docrag_embed::{EmbeddingBackend, EmbeddingGateway, GatewayOptions};
use docrag_text::KeywordIndex;
use docrag_vector::{open_db, DocumentRegistry, EmbeddingCache, LanceIndex, LanceSearchOptions, MemoryIndex};
use tracing::info;

pub use context::{build_context, sources};
pub use ingest::{IngestOutcome, IngestReport, Ingestor, RebuildReport};
pub use locks::DocumentLocks;
pub use retriever::Retriever;

/// Explicitly scoped handles for one index; nothing is process-global.
pub struct Engine {
    pub index: Arc<dyn VectorIndex>,
    pub registry: Arc<DocumentRegistry>,
    pub keyword: Option<Arc<KeywordIndex>>,
    pub gateway: EmbeddingGateway,
    ann: Option<Arc<LanceIndex>>,
    ingestor: Ingestor,
    retriever: Retriever,
    needs_rebuild: bool,
}

impl Engine {
    /// Opens the stores named by `settings` and the configured embedding backend.
    pub async fn open(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let backend = EmbeddingBackend::from_settings(&settings.embedding)?;
        Self::open_with_embedder(settings, Arc::new(backend)).await
    }

    /// Like [`Engine::open`] with a caller-supplied embedder.
    pub async fn open_with_embedder(settings: &Settings, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let gateway = EmbeddingGateway::new(embedder, GatewayOptions::from(&settings.embedding))?;
        match settings.storage.backend {
            StorageBackend::Memory => {
                let index: Arc<dyn VectorIndex> = match gateway.dim() {
                    Some(d) => Arc::new(MemoryIndex::with_dim(d)),
                    None => Arc::new(MemoryIndex::new()),
                };
                let keyword = Arc::new(KeywordIndex::in_ram()?);
                Self::assemble(settings, gateway, index, None, Arc::new(DocumentRegistry::in_memory()), Some(keyword), None)
            }
            StorageBackend::Lance => {
                let storage = &settings.storage;
                let data = storage.data_path();
                let conn = open_db(&data.join("lancedb")).await?;
                let (lance, recovered) = LanceIndex::open_or_recover(
                    conn.clone(),
                    &storage.entries_table,
                    gateway.dim(),
                    LanceSearchOptions::from(&settings.index),
                )
                .await?;
                let lance = Arc::new(lance);
                let registry = Arc::new(DocumentRegistry::open_lance(&conn, &storage.documents_table, &storage.chunks_table).await?);
                let cache = Arc::new(EmbeddingCache::open(conn, &storage.cache_table).await?);
                let keyword = Arc::new(KeywordIndex::open_or_create(&storage.keyword_path())?);
                let index: Arc<dyn VectorIndex> = lance.clone();
                let mut engine = Self::assemble(settings, gateway, index, Some(lance), registry, Some(keyword), Some(cache))?;
                let report = engine.ingestor.reconcile().await?;
                engine.needs_rebuild = recovered || !report.missing_entries.is_empty();
                info!(
                    documents = engine.registry.len(),
                    orphans = report.removed_orphans.len(),
                    missing = report.missing_entries.len(),
                    needs_rebuild = engine.needs_rebuild,
                    data_dir = %data.display(),
                    "engine opened"
                );
                Ok(engine)
            }
        }
    }

    /// Isolated in-memory engine around the given parts.
    pub fn in_memory(settings: &Settings, embedder: Arc<dyn Embedder>) -> Result<Self> {
        settings.validate()?;
        let gateway = EmbeddingGateway::new(embedder, GatewayOptions::from(&settings.embedding))?;
        let keyword = Arc::new(KeywordIndex::in_ram()?);
        Self::assemble(
            settings,
            gateway,
            Arc::new(MemoryIndex::new()),
            None,
            Arc::new(DocumentRegistry::in_memory()),
            Some(keyword),
            None,
        )
    }

    fn assemble(
        settings: &Settings,
        gateway: EmbeddingGateway,
        index: Arc<dyn VectorIndex>,
        ann: Option<Arc<LanceIndex>>,
        registry: Arc<DocumentRegistry>,
        keyword: Option<Arc<KeywordIndex>>,
        cache: Option<Arc<EmbeddingCache>>,
    ) -> Result<Self> {
        let chunker = Chunker::new(settings.chunking.clone())?;
        let mut ingestor = Ingestor::new(chunker, gateway.clone(), index.clone(), registry.clone())
            .with_max_concurrency(settings.ingest.max_concurrency);
        if let Some(k) = &keyword {
            ingestor = ingestor.with_keyword_index(k.clone());
        }
        if let Some(c) = cache {
            ingestor = ingestor.with_cache(c);
        }
        let retriever = Retriever::new(gateway.clone(), index.clone(), registry.clone(), keyword.clone(), settings.retrieval.clone());
        Ok(Self { index, registry, keyword, gateway, ann, ingestor, retriever, needs_rebuild: false })
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Set when opening found registered documents without their index
    /// entries, including after an unreadable vector table was recreated.
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    /// Trains the ANN index; only the LanceDB backend supports it.
    pub async fn build_ann_index(&self) -> Result<bool> {
        match &self.ann {
            Some(lance) => lance.build_ann_index().await,
            None => Err(Error::InvalidArgument("the memory backend has no ANN index".into())),
        }
    }
}
