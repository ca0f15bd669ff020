//! Batching, bounded concurrency, retry and dimension pinning in front of an [`Embedder`].

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use docrag_core::config::EmbeddingSettings;
use docrag_core::{traits::Embedder, Error, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Expected dimension; when `None` the first vector seen pins it.
    pub dim: Option<usize>,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self::from(&EmbeddingSettings::default())
    }
}

impl From<&EmbeddingSettings> for GatewayOptions {
    fn from(s: &EmbeddingSettings) -> Self {
        Self {
            batch_size: s.batch_size.max(1),
            max_concurrency: s.max_concurrency.max(1),
            max_retries: s.max_retries,
            retry_backoff: Duration::from_millis(s.retry_backoff_ms),
            dim: s.dim,
        }
    }
}

#[derive(Clone)]
pub struct EmbeddingGateway {
    embedder: Arc<dyn Embedder>,
    options: GatewayOptions,
    pinned: Arc<OnceLock<usize>>,
}

impl EmbeddingGateway {
    pub fn new(embedder: Arc<dyn Embedder>, options: GatewayOptions) -> Result<Self> {
        let pinned = OnceLock::new();
        match (options.dim, embedder.dim()) {
            (Some(expected), Some(actual)) if expected != actual => {
                return Err(Error::EmbeddingDimensionMismatch { expected, actual });
            }
            (Some(d), _) | (None, Some(d)) => {
                let _ = pinned.set(d);
            }
            (None, None) => {}
        }
        Ok(Self { embedder, options, pinned: Arc::new(pinned) })
    }

    pub fn embedder_id(&self) -> &str {
        self.embedder.id()
    }

    /// The pinned dimension, once known.
    pub fn dim(&self) -> Option<usize> {
        self.pinned.get().copied()
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop().ok_or_else(|| Error::EmbeddingBackend("empty embedding response".into()))
    }

    /// One vector per input, in input order. Any failing sub-batch fails the whole call.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batches: Vec<&[String]> = texts.chunks(self.options.batch_size).collect();
        debug!(texts = texts.len(), batches = batches.len(), embedder = self.embedder.id(), "embedding");
        let results: Vec<Vec<Vec<f32>>> = stream::iter(batches.into_iter().map(|batch| self.embed_with_retry(batch)))
            .buffered(self.options.max_concurrency)
            .try_collect()
            .await?;
        Ok(results.into_iter().flatten().collect())
    }

    async fn embed_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt: u32 = 0;
        loop {
            match self.embedder.embed_batch(batch).await {
                Ok(vectors) => return self.check(batch.len(), vectors),
                Err(e) if e.is_transient() && attempt < self.options.max_retries => {
                    attempt += 1;
                    let delay = self.options.retry_backoff.saturating_mul(1u32 << (attempt - 1).min(16));
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "embedding request failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn check(&self, expected_count: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
        if vectors.len() != expected_count {
            return Err(Error::EmbeddingBackend(format!(
                "embedder returned {} vectors for {} inputs",
                vectors.len(),
                expected_count
            )));
        }
        for v in &vectors {
            let expected = *self.pinned.get_or_init(|| v.len());
            if v.len() != expected {
                return Err(Error::EmbeddingDimensionMismatch { expected, actual: v.len() });
            }
        }
        Ok(vectors)
    }
}
