use docrag_core::types::{RankedChunk, SourceKind};
use docrag_retrieval::locks::DocumentLocks;
use docrag_retrieval::ranking::{candidate_count, dedup_overlapping, finalize, RankingPolicy};
use docrag_retrieval::{build_context, sources};

fn ranked(doc: &str, index: usize, span: (usize, usize), score: f32) -> RankedChunk {
    RankedChunk {
        document_id: doc.into(),
        chunk_index: index,
        text: format!("{doc} chunk {index}"),
        start: span.0,
        end: span.1,
        score,
        source: SourceKind::Vector,
        path: None,
    }
}

#[test]
fn candidate_count_over_fetches() {
    assert_eq!(candidate_count(5, 3), 15);
    assert_eq!(candidate_count(5, 1), 5);
    assert_eq!(candidate_count(5, 0), 5);
    assert_eq!(candidate_count(usize::MAX, 2), usize::MAX);
}

#[test]
fn dedup_keeps_distinct_scores_and_other_documents() {
    let input = vec![
        ranked("a", 0, (0, 100), 0.90),
        ranked("a", 1, (80, 180), 0.88),
        ranked("b", 0, (0, 100), 0.87),
        ranked("a", 2, (160, 260), 0.70),
    ];
    let out = dedup_overlapping(input, 0.05);
    let keys: Vec<(&str, usize)> = out.iter().map(|r| (r.document_id.as_str(), r.chunk_index)).collect();
    // a:1 overlaps a:0 within delta; a:2 overlaps only the dropped a:1.
    assert_eq!(keys, vec![("a", 0), ("b", 0), ("a", 2)]);
}

#[test]
fn dedup_keeps_overlap_with_large_score_gap() {
    let input = vec![ranked("a", 0, (0, 100), 0.9), ranked("a", 1, (50, 150), 0.6)];
    assert_eq!(dedup_overlapping(input, 0.05).len(), 2);
}

#[test]
fn finalize_orders_filters_and_truncates() {
    let candidates = vec![
        ranked("b", 0, (0, 10), 0.5),
        ranked("hidden", 0, (0, 10), 0.99),
        ranked("a", 1, (20, 30), 0.5),
        ranked("a", 0, (0, 10), 0.8),
        ranked("c", 0, (0, 10), 0.1),
    ];
    let policy = RankingPolicy { dedup: true, dedup_score_delta: 0.05, min_score: Some(0.2) };
    let out = finalize(candidates, 2, &policy, |id| id != "hidden");
    let keys: Vec<(&str, usize)> = out.iter().map(|r| (r.document_id.as_str(), r.chunk_index)).collect();
    assert_eq!(keys, vec![("a", 0), ("a", 1)]);
}

#[test]
fn context_numbers_sources() {
    let mut first = ranked("doc-1", 3, (0, 10), 0.9);
    first.path = Some("/notes/water.md".into());
    first.text = "Boil for one minute.".into();
    let mut second = ranked("doc-2", 0, (0, 10), 0.8);
    second.text = "Store in the dark.".into();
    let mut third = ranked("doc-1", 4, (10, 20), 0.7);
    third.path = Some("/notes/water.md".into());

    let context = build_context(&[first.clone(), second.clone()]);
    assert_eq!(
        context,
        "[Source 1: /notes/water.md, chunk 3]\nBoil for one minute.\n\n[Source 2: doc-2, chunk 0]\nStore in the dark."
    );
    assert_eq!(sources(&[first, second, third]), vec!["/notes/water.md".to_string(), "doc-2".to_string()]);
    assert_eq!(build_context(&[]), "");
}

#[tokio::test]
async fn document_locks_serialise_same_id_only() {
    let locks = DocumentLocks::new();
    let held = locks.lock("a").await;

    let other = tokio::time::timeout(std::time::Duration::from_millis(50), locks.lock("b")).await;
    assert!(other.is_ok(), "unrelated ids must not wait");
    drop(other);

    let same = tokio::time::timeout(std::time::Duration::from_millis(50), locks.lock("a")).await;
    assert!(same.is_err(), "same id must wait for the holder");

    drop(held);
    let _again = locks.lock("a").await;
    assert!(locks.len() <= 2);
}
