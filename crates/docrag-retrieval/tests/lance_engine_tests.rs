mod common;

use std::sync::Arc;

use common::{memory_settings, prose};
use docrag_core::config::{Settings, StorageBackend};
use docrag_core::types::{Query, SourceDocument};
use docrag_embed::HashEmbedder;
use docrag_retrieval::{Engine, IngestOutcome};
use tempfile::TempDir;

fn lance_settings(dir: &TempDir) -> Settings {
    let mut settings = memory_settings();
    settings.storage.backend = StorageBackend::Lance;
    settings.storage.data_dir = dir.path().to_string_lossy().to_string();
    settings
}

async fn open(settings: &Settings) -> Engine {
    Engine::open_with_embedder(settings, Arc::new(HashEmbedder::new(64))).await.expect("open engine")
}

#[tokio::test]
async fn documents_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let settings = lance_settings(&dir);
    {
        let engine = open(&settings).await;
        let outcome = engine.ingestor().ingest(SourceDocument::new("doc-a", "/a.txt", prose("snowshoe", 8))).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Ingested { .. }));
        engine.ingestor().ingest(SourceDocument::new("doc-b", "/b.txt", prose("canning", 8))).await.unwrap();
    }

    let engine = open(&settings).await;
    assert_eq!(engine.registry.len(), 2);
    let doc = engine.registry.get("doc-a").unwrap();
    assert_eq!(engine.registry.chunks("doc-a").await.unwrap().len(), doc.chunk_count);
    assert_eq!(
        engine.index.count().await.unwrap(),
        engine.registry.list().iter().map(|d| d.chunk_count).sum::<usize>()
    );

    let results = engine.retriever().retrieve(&Query::new("snowshoe note").with_k(3)).await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].document_id, "doc-a");
    assert_eq!(results[0].path.as_deref(), Some("/a.txt"));

    let again = engine.ingestor().ingest(SourceDocument::new("doc-a", "/a.txt", prose("snowshoe", 8))).await.unwrap();
    assert_eq!(again, IngestOutcome::Unchanged);
}

#[tokio::test]
async fn removal_persists() {
    let dir = TempDir::new().unwrap();
    let settings = lance_settings(&dir);
    {
        let engine = open(&settings).await;
        engine.ingestor().ingest(SourceDocument::new("doc-a", "/a.txt", prose("snowshoe", 4))).await.unwrap();
        engine.ingestor().ingest(SourceDocument::new("doc-b", "/b.txt", prose("snowshoe", 4))).await.unwrap();
        assert!(engine.ingestor().remove("doc-a").await.unwrap());
    }

    let engine = open(&settings).await;
    assert!(!engine.registry.contains("doc-a"));
    let results = engine.retriever().retrieve(&Query::new("snowshoe").with_k(10)).await.unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.document_id == "doc-b"));
}

#[tokio::test]
async fn rebuild_reuses_cached_embeddings() {
    let dir = TempDir::new().unwrap();
    let engine = open(&lance_settings(&dir)).await;
    engine.ingestor().ingest(SourceDocument::new("doc-a", "/a.txt", prose("pemmican", 10))).await.unwrap();
    let count = engine.index.count().await.unwrap();

    engine.index.clear().await.unwrap();
    let report = engine.ingestor().rebuild().await.unwrap();

    assert_eq!(report.documents, 1);
    assert_eq!(report.entries, count);
    assert_eq!(report.embedded, 0, "every chunk vector should come from the cache");
    assert_eq!(engine.index.count().await.unwrap(), count);
}

#[tokio::test]
async fn ann_index_needs_enough_rows() {
    let dir = TempDir::new().unwrap();
    let engine = open(&lance_settings(&dir)).await;
    engine.ingestor().ingest(SourceDocument::new("doc-a", "/a.txt", prose("tinder", 4))).await.unwrap();
    assert!(!engine.build_ann_index().await.unwrap());

    let memory = Engine::in_memory(&memory_settings(), Arc::new(HashEmbedder::new(64))).unwrap();
    assert!(memory.build_ann_index().await.is_err());
}

#[tokio::test]
async fn unreadable_entries_table_is_recreated_and_rebuilt() {
    let dir = TempDir::new().unwrap();
    let settings = lance_settings(&dir);
    let count = {
        let engine = open(&settings).await;
        engine.ingestor().ingest(SourceDocument::new("doc-a", "/a.txt", prose("cordage", 8))).await.unwrap();
        assert!(!engine.needs_rebuild());
        engine.index.count().await.unwrap()
    };

    let data = dir.path().join("lancedb").join("entries.lance").join("data");
    for file in std::fs::read_dir(&data).unwrap() {
        std::fs::remove_file(file.unwrap().path()).unwrap();
    }

    let engine = open(&settings).await;
    assert!(engine.needs_rebuild());
    assert!(engine.registry.contains("doc-a"));
    assert_eq!(engine.index.count().await.unwrap(), 0);

    let report = engine.ingestor().rebuild().await.unwrap();
    assert_eq!(report.documents, 1);
    assert_eq!(report.entries, count);
    assert!(report.reconcile.is_clean());
    assert_eq!(engine.index.count().await.unwrap(), count);

    let results = engine.retriever().retrieve(&Query::new("cordage note").with_k(3)).await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].document_id, "doc-a");
}
