use std::sync::Arc;

use docrag_core::config::RetrievalSettings;
use docrag_core::traits::VectorIndex;
use docrag_core::types::{Query, RankedChunk};
use docrag_core::{Error, Result};
use docrag_embed::EmbeddingGateway;
use docrag_text::KeywordIndex;
use docrag_vector::DocumentRegistry;
use tracing::{debug, warn};

use crate::ranking::{candidate_count, finalize, RankingPolicy};

/// Query-time pipeline: embed, over-fetch, gate on the registry, rank.
#[derive(Clone)]
pub struct Retriever {
    gateway: EmbeddingGateway,
    index: Arc<dyn VectorIndex>,
    registry: Arc<DocumentRegistry>,
    keyword: Option<Arc<KeywordIndex>>,
    settings: RetrievalSettings,
}

impl Retriever {
    pub fn new(
        gateway: EmbeddingGateway,
        index: Arc<dyn VectorIndex>,
        registry: Arc<DocumentRegistry>,
        keyword: Option<Arc<KeywordIndex>>,
        settings: RetrievalSettings,
    ) -> Self {
        Self { gateway, index, registry, keyword, settings }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Ranked fragments for `query`. Every failure is reported as
    /// [`Error::RetrievalUnavailable`]; `Ok(vec![])` means nothing matched.
    pub async fn retrieve(&self, query: &Query) -> Result<Vec<RankedChunk>> {
        self.run(query).await.map_err(Error::retrieval)
    }

    async fn run(&self, query: &Query) -> Result<Vec<RankedChunk>> {
        let k = query.k.unwrap_or(self.settings.top_k);
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".into()));
        }
        if query.text.trim().is_empty() {
            return Err(Error::InvalidArgument("query text is empty".into()));
        }
        let fetch = candidate_count(k, self.settings.over_fetch);
        let filter = query.filter.as_ref();

        let candidates = match self.gateway.embed(&query.text).await {
            Ok(vector) => {
                debug!(k, fetch, filtered = filter.is_some(), "vector search");
                self.index.search(&vector, fetch, filter).await?
            }
            Err(err) => match self.keyword.as_ref().filter(|_| self.settings.keyword_fallback) {
                Some(keyword) => {
                    warn!(error = %err, "embedding failed; answering from the keyword index");
                    let keyword = Arc::clone(keyword);
                    let text = query.text.clone();
                    let filter = query.filter.clone();
                    tokio::task::spawn_blocking(move || keyword.search(&text, fetch, filter.as_ref()))
                        .await
                        .map_err(Error::index_io)??
                }
                None => return Err(err),
            },
        };

        let policy = RankingPolicy::from(&self.settings);
        let mut ranked = finalize(candidates, k, &policy, |id| {
            self.registry.contains(id) && query.filter.as_ref().map_or(true, |f| f.allows(id))
        });
        for r in &mut ranked {
            r.path = self.registry.get(&r.document_id).map(|d| d.path);
        }
        debug!(results = ranked.len(), "retrieval finished");
        Ok(ranked)
    }
}
