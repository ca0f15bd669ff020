mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{engine_with, memory_settings, seed_document, topic_vector, ControlledEmbedder, TopicEmbedder};
use docrag_core::types::{Chunk, Document, DocumentFilter, IndexEntry, Query, SourceDocument, SourceKind};
use docrag_core::Error;
use docrag_retrieval::Engine;

async fn topic_engine(settings: &docrag_core::config::Settings) -> Engine {
    let engine = engine_with(settings, Arc::new(TopicEmbedder));
    seed_document(
        &engine,
        "doc-1",
        &["alpha one", "beta one", "beta two", "alpha two", "beta three", "beta four", "beta five"],
        topic_vector,
    )
    .await;
    seed_document(&engine, "doc-2", &["beta six", "beta seven", "alpha three", "beta eight", "beta nine", "beta ten"], topic_vector)
        .await;
    engine
}

#[tokio::test]
async fn top_k_returns_relevant_chunks_first() {
    let engine = topic_engine(&memory_settings()).await;

    let results = engine.retriever().retrieve(&Query::new("alpha").with_k(5)).await.unwrap();

    assert_eq!(results.len(), 5);
    assert!(results[..3].iter().all(|r| r.text.starts_with("alpha")), "{results:?}");
    assert!(results[3..].iter().all(|r| r.text.starts_with("beta")));
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(results.iter().all(|r| r.source == SourceKind::Vector));
    let top: Vec<(&str, usize)> = results[..3].iter().map(|r| (r.document_id.as_str(), r.chunk_index)).collect();
    assert_eq!(top, vec![("doc-1", 0), ("doc-1", 3), ("doc-2", 2)], "ties break on (document_id, chunk_index)");
}

#[tokio::test]
async fn results_carry_registry_paths() {
    let engine = topic_engine(&memory_settings()).await;
    let results = engine.retriever().retrieve(&Query::new("alpha").with_k(2)).await.unwrap();
    assert_eq!(results[0].path.as_deref(), Some("/corpus/doc-1.txt"));
}

#[tokio::test]
async fn default_k_comes_from_settings() {
    let mut settings = memory_settings();
    settings.retrieval.top_k = 4;
    let engine = topic_engine(&settings).await;
    let results = engine.retriever().retrieve(&Query::new("alpha")).await.unwrap();
    assert_eq!(results.len(), 4);
}

#[tokio::test]
async fn filter_restricts_documents() {
    let engine = topic_engine(&memory_settings()).await;
    let query = Query::new("alpha").with_k(5).with_filter(DocumentFilter::new(["doc-2"]));

    let results = engine.retriever().retrieve(&query).await.unwrap();
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.document_id == "doc-2"));
    assert_eq!(results[0].text, "alpha three");
}

#[tokio::test]
async fn min_score_drops_weak_matches() {
    let mut settings = memory_settings();
    settings.retrieval.min_score = Some(0.5);
    let engine = topic_engine(&settings).await;

    let results = engine.retriever().retrieve(&Query::new("alpha").with_k(10)).await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.score >= 0.5));
}

#[tokio::test]
async fn unregistered_entries_are_never_returned() {
    let engine = topic_engine(&memory_settings()).await;
    let chunk = Chunk { document_id: "pending".into(), index: 0, text: "alpha pending".into(), start: 0, end: 13 };
    engine.index.upsert("pending", vec![IndexEntry::from_chunk(&chunk, topic_vector(&chunk.text))]).await.unwrap();

    let results = engine.retriever().retrieve(&Query::new("alpha").with_k(10)).await.unwrap();
    assert!(results.iter().all(|r| r.document_id != "pending"));
}

#[tokio::test]
async fn empty_index_is_ok_and_empty() {
    let engine = engine_with(&memory_settings(), Arc::new(ControlledEmbedder::new()));
    let results = engine.retriever().retrieve(&Query::new("anything at all")).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn embedding_outage_is_reported_not_empty() {
    let mut settings = memory_settings();
    settings.embedding.max_retries = 1;
    let embedder = Arc::new(ControlledEmbedder::new());
    let engine = engine_with(&settings, embedder.clone());
    engine.ingestor().ingest(SourceDocument::new("doc-a", "/a.txt", "Boil water before drinking it.")).await.unwrap();

    embedder.set_unavailable(true);
    let err = engine.retriever().retrieve(&Query::new("water")).await.unwrap_err();
    match err {
        Error::RetrievalUnavailable { source } => assert!(matches!(*source, Error::EmbeddingUnavailable(_))),
        other => panic!("expected RetrievalUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_queries_are_retrieval_errors() {
    let engine = engine_with(&memory_settings(), Arc::new(ControlledEmbedder::new()));

    for query in [Query::new("   "), Query::new("water").with_k(0)] {
        let err = engine.retriever().retrieve(&query).await.unwrap_err();
        let Error::RetrievalUnavailable { source } = err else { panic!("expected RetrievalUnavailable") };
        assert!(matches!(*source, Error::InvalidArgument(_)));
    }
}

#[tokio::test]
async fn keyword_fallback_answers_during_outage() {
    let mut settings = memory_settings();
    settings.embedding.max_retries = 0;
    settings.retrieval.keyword_fallback = true;
    let embedder = Arc::new(ControlledEmbedder::new());
    let engine = engine_with(&settings, embedder.clone());
    engine.ingestor().ingest(SourceDocument::new("doc-a", "/a.txt", "Glacier water must be filtered.")).await.unwrap();
    engine.ingestor().ingest(SourceDocument::new("doc-b", "/b.txt", "Split dry wood for the stove.")).await.unwrap();

    embedder.set_unavailable(true);
    let results = engine.retriever().retrieve(&Query::new("glacier").with_k(3)).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document_id, "doc-a");
    assert_eq!(results[0].source, SourceKind::Keyword);
    assert_eq!(results[0].path.as_deref(), Some("/a.txt"));
}

#[tokio::test]
async fn keyword_fallback_skips_removed_documents() {
    let mut settings = memory_settings();
    settings.embedding.max_retries = 0;
    settings.retrieval.keyword_fallback = true;
    let embedder = Arc::new(ControlledEmbedder::new());
    let engine = engine_with(&settings, embedder.clone());
    engine.ingestor().ingest(SourceDocument::new("doc-a", "/a.txt", "Glacier water must be filtered.")).await.unwrap();
    engine.ingestor().remove("doc-a").await.unwrap();

    embedder.set_unavailable(true);
    let results = engine.retriever().retrieve(&Query::new("glacier")).await.unwrap();
    assert!(results.is_empty());
}

async fn overlapping_engine(dedup: bool) -> Engine {
    let mut settings = memory_settings();
    settings.retrieval.dedup = dedup;
    let engine = engine_with(&settings, Arc::new(TopicEmbedder));
    let chunks = vec![
        Chunk { document_id: "doc-o".into(), index: 0, text: "alpha start".into(), start: 0, end: 100 },
        Chunk { document_id: "doc-o".into(), index: 1, text: "alpha overlap".into(), start: 80, end: 180 },
        Chunk { document_id: "doc-o".into(), index: 2, text: "alpha later".into(), start: 400, end: 500 },
    ];
    let entries = chunks.iter().map(|c| IndexEntry::from_chunk(c, topic_vector(&c.text))).collect();
    engine.index.upsert("doc-o", entries).await.unwrap();
    let doc = Document {
        id: "doc-o".into(),
        path: "/o.txt".into(),
        content_hash: "h".into(),
        chunk_count: 3,
        ingested_at: chrono::Utc::now(),
    };
    engine.registry.register(doc, chunks).await.unwrap();
    engine
}

#[tokio::test]
async fn overlapping_near_duplicates_collapse() {
    let engine = overlapping_engine(true).await;
    let results = engine.retriever().retrieve(&Query::new("alpha").with_k(5)).await.unwrap();
    let indexes: Vec<usize> = results.iter().map(|r| r.chunk_index).collect();
    assert_eq!(indexes, vec![0, 2]);
}

#[tokio::test]
async fn dedup_can_be_disabled() {
    let engine = overlapping_engine(false).await;
    let results = engine.retriever().retrieve(&Query::new("alpha").with_k(5)).await.unwrap();
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn queries_never_observe_mixed_versions() {
    let mut settings = memory_settings();
    settings.retrieval.dedup = false;
    let engine = Arc::new(engine_with(&settings, Arc::new(ControlledEmbedder::new())));
    engine.ingestor().ingest(SourceDocument::new("doc-a", "/a.txt", "aaa ".repeat(60))).await.unwrap();

    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for letter in ['b', 'c', 'd', 'e', 'f', 'g'] {
                let text = format!("{letter}{letter}{letter} ").repeat(60);
                engine.ingestor().ingest(SourceDocument::new("doc-a", "/a.txt", text)).await.unwrap();
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    };
    let mut readers = Vec::new();
    for _ in 0..4 {
        let engine = engine.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..25 {
                let results = engine.retriever().retrieve(&Query::new("aaa ddd ggg").with_k(20)).await.unwrap();
                let letters: std::collections::BTreeSet<char> =
                    results.iter().flat_map(|r| r.text.chars()).filter(|c| !c.is_whitespace()).collect();
                assert!(letters.len() <= 1, "mixed versions in one answer: {letters:?}");
                tokio::task::yield_now().await;
            }
        }));
    }
    writer.await.unwrap();
    for r in readers {
        r.await.unwrap();
    }
}
