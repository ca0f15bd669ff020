//! BGE-M3 (XLM-RoBERTa) embeddings computed in-process with candle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use docrag_core::{traits::Embedder, Error, Result};
use tokenizers::Tokenizer;

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

struct LoadedModel {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    max_tokens: usize,
}

impl LoadedModel {
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, self.max_tokens, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?.to_dtype(DType::I64)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let rows: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2()?;
        tracing::debug!(batch = texts.len(), elapsed_ms = start.elapsed().as_millis() as u64, "local embedding batch");
        Ok(rows)
    }
}

#[derive(Clone)]
pub struct LocalEmbedder {
    inner: Arc<LoadedModel>,
    dim: usize,
    id: String,
}

impl LocalEmbedder {
    /// Loads `tokenizer.json`, `config.json` and the weights from `model_dir`
    /// (or the first directory found by [`resolve_model_dir`]).
    pub fn load(model_dir: Option<&Path>, max_tokens: usize) -> anyhow::Result<Self> {
        let device = select_device();
        let model_dir = match model_dir {
            Some(dir) => dir.to_path_buf(),
            None => resolve_model_dir()?,
        };
        tracing::info!(dir = %model_dir.display(), "loading embedding model");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;

        let config_path = model_dir.join("config.json");
        let raw_config = std::fs::read_to_string(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        let config: XLMRobertaConfig = serde_json::from_str(&raw_config)?;
        let dim = serde_json::from_str::<serde_json::Value>(&raw_config)?
            .get("hidden_size")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow!("config.json has no hidden_size"))? as usize;

        let weights = load_weights(&model_dir, &device)?;
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;

        let name = model_dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "model".into());
        tracing::info!(model = %name, dim, "embedding model loaded");
        Ok(Self {
            inner: Arc::new(LoadedModel { model, tokenizer, device, max_tokens: max_tokens.max(1) }),
            dim,
            id: format!("local:{name}:d{dim}"),
        })
    }
}

fn load_weights(model_dir: &Path, device: &Device) -> anyhow::Result<HashMap<String, Tensor>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        return Ok(candle_core::safetensors::load(&safetensors, device)?);
    }
    let pickle = model_dir.join("pytorch_model.bin");
    let weights = candle_core::pickle::read_all(&pickle).with_context(|| format!("reading {}", pickle.display()))?;
    Ok(weights.into_iter().collect())
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> Option<usize> {
        Some(self.dim)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inner = Arc::clone(&self.inner);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || inner.embed_batch(&texts))
            .await
            .map_err(|e| Error::EmbeddingBackend(format!("embedding task failed: {e}")))?
            .map_err(|e| Error::EmbeddingBackend(e.to_string()))
    }
}

/// `APP_MODEL_DIR`, then `MODEL_DIR`, then `../models/bge-m3`, then `models/bge-m3`.
pub fn resolve_model_dir() -> anyhow::Result<PathBuf> {
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            let p = PathBuf::from(&dir);
            if p.exists() {
                return Ok(p);
            }
        }
    }
    for candidate in ["../models/bge-m3", "models/bge-m3"] {
        let p = Path::new(candidate);
        if p.exists() {
            return Ok(p.to_path_buf());
        }
    }
    Err(anyhow!("Could not locate BGE-M3 model directory"))
}
