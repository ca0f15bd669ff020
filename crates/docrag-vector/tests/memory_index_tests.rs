use std::sync::Arc;

use docrag_core::traits::VectorIndex;
use docrag_core::types::{DocumentFilter, IndexEntry};
use docrag_core::Error;
use docrag_vector::MemoryIndex;

fn entry(doc: &str, idx: usize, vector: Vec<f32>) -> IndexEntry {
    IndexEntry {
        document_id: doc.to_string(),
        chunk_index: idx,
        text: format!("{doc} chunk {idx}"),
        start: idx * 10,
        end: idx * 10 + 10,
        content_hash: format!("{doc}-{idx}"),
        vector,
    }
}

#[tokio::test]
async fn search_ranks_by_cosine_with_deterministic_ties() {
    let index = MemoryIndex::new();
    index
        .upsert("b", vec![entry("b", 0, vec![1.0, 0.0, 0.0]), entry("b", 1, vec![0.0, 1.0, 0.0])])
        .await
        .unwrap();
    index
        .upsert("a", vec![entry("a", 0, vec![2.0, 0.0, 0.0]), entry("a", 1, vec![0.6, 0.8, 0.0])])
        .await
        .unwrap();

    let hits = index.search(&[1.0, 0.0, 0.0], 3, None).await.unwrap();
    assert_eq!(hits.len(), 3);
    // a:0 and b:0 tie at 1.0; document id breaks the tie.
    assert_eq!((hits[0].document_id.as_str(), hits[0].chunk_index), ("a", 0));
    assert_eq!((hits[1].document_id.as_str(), hits[1].chunk_index), ("b", 0));
    assert!((hits[2].score - 0.6).abs() < 1e-5);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn upsert_replaces_whole_document() {
    let index = MemoryIndex::new();
    index.upsert("a", (0..4).map(|i| entry("a", i, vec![1.0, i as f32])).collect()).await.unwrap();
    assert_eq!(index.count().await.unwrap(), 4);
    index.upsert("a", vec![entry("a", 0, vec![0.0, 1.0])]).await.unwrap();
    assert_eq!(index.count().await.unwrap(), 1);
    assert_eq!(index.documents().await.unwrap(), vec![("a".to_string(), 1)]);
}

#[tokio::test]
async fn delete_is_idempotent_and_hides_document() {
    let index = MemoryIndex::new();
    index.upsert("a", vec![entry("a", 0, vec![1.0, 0.0])]).await.unwrap();
    index.upsert("b", vec![entry("b", 0, vec![0.9, 0.1])]).await.unwrap();
    index.delete("a").await.unwrap();
    index.delete("a").await.unwrap();
    index.delete("never-existed").await.unwrap();
    let hits = index.search(&[1.0, 0.0], 10, None).await.unwrap();
    assert!(hits.iter().all(|h| h.document_id != "a"));
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn filter_restricts_documents() {
    let index = MemoryIndex::new();
    for doc in ["a", "b", "c"] {
        index.upsert(doc, vec![entry(doc, 0, vec![1.0, 0.0])]).await.unwrap();
    }
    let filter = DocumentFilter::new(["b", "c"]);
    let hits = index.search(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
    let docs: Vec<&str> = hits.iter().map(|h| h.document_id.as_str()).collect();
    assert_eq!(docs, vec!["b", "c"]);
    let none = index.search(&[1.0, 0.0], 10, Some(&DocumentFilter::default())).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn rejects_bad_arguments() {
    let index = MemoryIndex::new();
    assert!(index.search(&[1.0, 0.0], 5, None).await.unwrap().is_empty(), "empty index returns nothing");
    index.upsert("a", vec![entry("a", 0, vec![1.0, 0.0])]).await.unwrap();
    assert!(matches!(index.search(&[1.0, 0.0], 0, None).await, Err(Error::InvalidArgument(_))));
    assert!(matches!(
        index.search(&[1.0, 0.0, 0.0], 1, None).await,
        Err(Error::DimensionMismatch { expected: 2, actual: 3 })
    ));
    assert!(matches!(
        index.upsert("b", vec![entry("b", 0, vec![1.0])]).await,
        Err(Error::DimensionMismatch { .. })
    ));
    assert!(matches!(index.upsert("b", vec![entry("a", 0, vec![1.0, 0.0])]).await, Err(Error::InvalidArgument(_))));
}

#[tokio::test]
async fn concurrent_readers_never_see_mixed_versions() {
    let index = Arc::new(MemoryIndex::new());
    let version = |v: f32| (0..8).map(|i| IndexEntry { text: format!("v{v}"), ..entry("doc", i, vec![1.0, v]) }).collect::<Vec<_>>();
    index.upsert("doc", version(1.0)).await.unwrap();

    let writer = {
        let index = Arc::clone(&index);
        tokio::spawn(async move {
            for round in 0..200 {
                let v = if round % 2 == 0 { 2.0 } else { 1.0 };
                index.upsert("doc", version(v)).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    let mut readers = Vec::new();
    for _ in 0..4 {
        let index = Arc::clone(&index);
        readers.push(tokio::spawn(async move {
            for _ in 0..200 {
                let hits = index.search(&[1.0, 1.0], 8, None).await.unwrap();
                assert_eq!(hits.len(), 8);
                let first = &hits[0].text;
                assert!(hits.iter().all(|h| &h.text == first), "mixed versions in one result");
                tokio::task::yield_now().await;
            }
        }));
    }
    writer.await.unwrap();
    for r in readers {
        r.await.unwrap();
    }
}
