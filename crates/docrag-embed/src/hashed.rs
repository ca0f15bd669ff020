//! Deterministic feature-hashing embedder for tests and offline development.

use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use docrag_core::{traits::Embedder, Result};
use twox_hash::XxHash64;

pub const DEFAULT_DIM: usize = 384;

/// Hashes lower-cased word tokens into `dim` buckets and L2-normalises.
/// Texts sharing vocabulary land close together; identical texts embed identically.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
    id: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self { dim, id: format!("hashed:d{dim}") }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
        {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            let weight = 0.5 + (((h >> 32) as u32) as f32) / (u32::MAX as f32) * 0.5;
            v[idx] += sign * weight;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIM)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> Option<usize> {
        Some(self.dim)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }
}
