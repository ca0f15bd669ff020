use docrag_core::types::{Chunk, DocumentFilter, SourceKind};
use docrag_text::KeywordIndex;
use tempfile::TempDir;

fn chunk(doc: &str, index: usize, text: &str) -> Chunk {
    Chunk { document_id: doc.into(), index, text: text.into(), start: index * 100, end: index * 100 + text.chars().count() }
}

fn seed(index: &KeywordIndex) {
    index
        .upsert(
            "water",
            &[
                chunk("water", 0, "Boil river water for one minute before drinking."),
                chunk("water", 1, "Ceramic filters remove bacteria from water."),
            ],
        )
        .unwrap();
    index.upsert("fire", &[chunk("fire", 0, "Feather sticks help start a fire in wet weather.")]).unwrap();
}

#[test]
fn finds_and_normalises_scores() {
    let index = KeywordIndex::in_ram().unwrap();
    seed(&index);
    assert_eq!(index.num_chunks(), 3);

    let hits = index.search("water filters", 5, None).unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].document_id, "water");
    assert_eq!(hits[0].chunk_index, 1);
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    assert!(hits.iter().all(|h| h.source == SourceKind::Keyword && h.score <= 1.0));
    assert_eq!(hits[0].start, 100);
}

#[test]
fn upsert_replaces_and_delete_removes() {
    let index = KeywordIndex::in_ram().unwrap();
    seed(&index);
    index.upsert("water", &[chunk("water", 0, "Collect rain in a clean tarp.")]).unwrap();
    assert!(index.search("bacteria", 5, None).unwrap().is_empty());
    assert_eq!(index.search("rain", 5, None).unwrap().len(), 1);

    index.delete("fire").unwrap();
    index.delete("fire").unwrap();
    assert!(index.search("fire", 5, None).unwrap().is_empty());
}

#[test]
fn filter_and_lenient_parsing() {
    let index = KeywordIndex::in_ram().unwrap();
    seed(&index);
    let only_fire = DocumentFilter::new(["fire"]);
    assert!(index.search("water", 5, Some(&only_fire)).unwrap().is_empty());
    assert_eq!(index.search("wet weather", 5, Some(&only_fire)).unwrap().len(), 1);
    // Unbalanced syntax must not fail the query.
    assert!(index.search("water AND (", 5, None).is_ok());
    assert!(index.search("   ", 5, None).unwrap().is_empty());
    assert!(index.search("water", 0, None).is_err());
}

#[test]
fn persists_on_disk() {
    let tmp = TempDir::new().unwrap();
    {
        let index = KeywordIndex::open_or_create(tmp.path()).unwrap();
        seed(&index);
    }
    let index = KeywordIndex::open_or_create(tmp.path()).unwrap();
    assert_eq!(index.num_chunks(), 3);
    index.clear().unwrap();
    assert_eq!(index.num_chunks(), 0);
}
