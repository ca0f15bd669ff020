use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DocumentFilter, IndexEntry, RankedChunk};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier for the backend/model (e.g. `hashed:d384`), used as a cache key.
    fn id(&self) -> &str;
    /// Embedding dimensionality, when known before the first call.
    fn dim(&self) -> Option<usize>;
    /// Order-preserving: one vector per input text.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop().ok_or_else(|| crate::error::Error::EmbeddingBackend("empty embedding response".into()))
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Pinned vector dimension, `None` until the first entry is stored.
    fn dim(&self) -> Option<usize>;
    /// Replaces every entry of `document_id` with `entries` in one step.
    async fn upsert(&self, document_id: &str, entries: Vec<IndexEntry>) -> Result<()>;
    /// Removes every entry of `document_id`; absent documents are not an error.
    async fn delete(&self, document_id: &str) -> Result<()>;
    async fn search(&self, query: &[f32], k: usize, filter: Option<&DocumentFilter>) -> Result<Vec<RankedChunk>>;
    async fn count(&self) -> Result<usize>;
    /// Distinct document ids with their entry counts, ordered by id.
    async fn documents(&self) -> Result<Vec<(String, usize)>>;
    /// Drops every entry, keeping the table and its schema.
    async fn clear(&self) -> Result<()>;
}
