#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use docrag_core::config::Settings;
use docrag_core::traits::Embedder;
use docrag_core::types::{Chunk, Document, IndexEntry};
use docrag_core::{Error, Result};
use docrag_embed::HashEmbedder;
use docrag_retrieval::Engine;

/// Hashed embeddings with call counting and injectable failures.
pub struct ControlledEmbedder {
    inner: HashEmbedder,
    pub calls: AtomicUsize,
    pub texts: AtomicUsize,
    /// 1-based call number that fails once.
    pub fail_on_call: Option<usize>,
    pub unavailable: AtomicBool,
    pub delay: Option<Duration>,
}

impl ControlledEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashEmbedder::new(64),
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
            fail_on_call: None,
            unavailable: AtomicBool::new(false),
            delay: None,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl Embedder for ControlledEmbedder {
    fn id(&self) -> &str {
        "controlled"
    }

    fn dim(&self) -> Option<usize> {
        self.inner.dim()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::EmbeddingUnavailable("service down".into()));
        }
        if self.fail_on_call == Some(call) {
            return Err(Error::EmbeddingBackend(format!("injected failure on call {call}")));
        }
        self.inner.embed_batch(texts).await
    }
}

/// Separable fixture: texts mentioning "alpha" point one way, "beta" another.
pub struct TopicEmbedder;

#[async_trait]
impl Embedder for TopicEmbedder {
    fn id(&self) -> &str {
        "topic"
    }

    fn dim(&self) -> Option<usize> {
        Some(3)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| topic_vector(t)).collect())
    }
}

pub fn topic_vector(text: &str) -> Vec<f32> {
    let alpha = if text.contains("alpha") { 1.0 } else { 0.0 };
    let beta = if text.contains("beta") { 1.0 } else { 0.0 };
    vec![alpha, beta, 0.1]
}

pub fn memory_settings() -> Settings {
    let mut settings = Settings::default();
    settings.storage.backend = docrag_core::config::StorageBackend::Memory;
    settings.chunking.max_chars = 100;
    settings.chunking.overlap = 20;
    settings.embedding.retry_backoff_ms = 1;
    settings
}

pub fn engine_with(settings: &Settings, embedder: Arc<dyn Embedder>) -> Engine {
    Engine::in_memory(settings, embedder).expect("engine")
}

/// Registers a document and its entries directly, bypassing chunking.
pub async fn seed_document(engine: &Engine, id: &str, texts: &[&str], embed: impl Fn(&str) -> Vec<f32>) {
    let chunks: Vec<Chunk> = texts
        .iter()
        .enumerate()
        .map(|(i, t)| Chunk { document_id: id.into(), index: i, text: t.to_string(), start: i * 1000, end: i * 1000 + t.len() })
        .collect();
    let entries = chunks.iter().map(|c| IndexEntry::from_chunk(c, embed(&c.text))).collect();
    engine.index.upsert(id, entries).await.expect("upsert");
    let doc = Document {
        id: id.into(),
        path: format!("/corpus/{id}.txt"),
        content_hash: format!("hash-{id}"),
        chunk_count: chunks.len(),
        ingested_at: Utc::now(),
    };
    engine.registry.register(doc, chunks).await.expect("register");
}

pub fn prose(topic: &str, sentences: usize) -> String {
    (0..sentences).map(|i| format!("The {topic} note {i} covers shelter and water.")).collect::<Vec<_>>().join(" ")
}
