use std::path::PathBuf;

use async_trait::async_trait;
use docrag_core::config::{expand_path, EmbeddingBackendKind, EmbeddingSettings};
use docrag_core::{traits::Embedder, Error, Result};

use crate::hashed::{HashEmbedder, DEFAULT_DIM};
use crate::local::LocalEmbedder;
use crate::remote::RemoteEmbedder;

/// The embedding capability chosen at construction time.
pub enum EmbeddingBackend {
    Local(LocalEmbedder),
    Remote(RemoteEmbedder),
    Hashed(HashEmbedder),
}

fn fake_embeddings_forced() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

impl EmbeddingBackend {
    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self> {
        if fake_embeddings_forced() {
            tracing::info!("APP_USE_FAKE_EMBEDDINGS set; using the hashed embedder");
            return Ok(Self::Hashed(HashEmbedder::new(settings.dim.unwrap_or(DEFAULT_DIM))));
        }
        match settings.backend {
            EmbeddingBackendKind::Hashed => Ok(Self::Hashed(HashEmbedder::new(settings.dim.unwrap_or(DEFAULT_DIM)))),
            EmbeddingBackendKind::Remote => Ok(Self::Remote(RemoteEmbedder::from_settings(&settings.remote, settings.dim)?)),
            EmbeddingBackendKind::Local => {
                let dir: Option<PathBuf> = settings.model_dir.as_deref().map(expand_path);
                let local = LocalEmbedder::load(dir.as_deref(), settings.max_tokens)
                    .map_err(|e| Error::InvalidConfig(format!("local embedding model: {e:#}")))?;
                if let (Some(expected), Some(actual)) = (settings.dim, local.dim()) {
                    if expected != actual {
                        return Err(Error::EmbeddingDimensionMismatch { expected, actual });
                    }
                }
                Ok(Self::Local(local))
            }
        }
    }

    fn inner(&self) -> &dyn Embedder {
        match self {
            Self::Local(e) => e,
            Self::Remote(e) => e,
            Self::Hashed(e) => e,
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingBackend {
    fn id(&self) -> &str {
        self.inner().id()
    }

    fn dim(&self) -> Option<usize> {
        self.inner().dim()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.inner().embed_batch(texts).await
    }
}
