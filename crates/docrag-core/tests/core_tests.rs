use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

use docrag_core::loader::{list_files, load_document, read_text};
use docrag_core::similarity::{cosine, normalize, TopK};
use docrag_core::types::{document_id_for_path, hash_content, DocumentFilter, RankedChunk, SourceKind};

fn exts() -> Vec<String> {
    vec!["txt".to_string(), "md".to_string()]
}

fn ranked(doc: &str, idx: usize, score: f32) -> RankedChunk {
    RankedChunk {
        document_id: doc.to_string(),
        chunk_index: idx,
        text: String::new(),
        start: idx * 10,
        end: idx * 10 + 10,
        score,
        source: SourceKind::Vector,
        path: None,
    }
}

#[test]
fn list_files_filters_extensions_and_sorts() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::create_dir_all(dir.join("nested")).unwrap();
    fs::write(dir.join("b.txt"), "bravo").unwrap();
    fs::write(dir.join("a.md"), "alpha").unwrap();
    fs::write(dir.join("nested/c.TXT"), "charlie").unwrap();
    fs::write(dir.join("skip.pdf"), "%PDF").unwrap();

    let files = list_files(dir, &exts());
    let names: Vec<String> = files.iter().map(|p| p.file_name().unwrap().to_string_lossy().to_string()).collect();
    assert_eq!(names, vec!["a.md", "b.txt", "c.TXT"]);
}

#[test]
fn list_files_accepts_single_file_root() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("one.txt");
    fs::write(&file, "x").unwrap();
    assert_eq!(list_files(&file, &exts()), vec![file.clone()]);
    assert!(list_files(&file, &["md".to_string()]).is_empty());
}

#[test]
fn read_text_falls_back_to_lossy_utf8() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("latin1.txt");
    let mut f = fs::File::create(&file).unwrap();
    f.write_all(b"caf\xe9 au lait").unwrap();
    let text = read_text(&file).expect("read");
    assert!(text.starts_with("caf"));
    assert!(text.ends_with("au lait"));
}

#[test]
fn load_document_derives_stable_id_and_hash() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("doc.txt");
    fs::write(&file, "Short text").unwrap();
    let a = load_document(&file).expect("load");
    let b = load_document(&file).expect("load again");
    assert_eq!(a.id, b.id);
    assert_eq!(a.id, document_id_for_path(&file));
    assert_eq!(a.id.len(), 16);
    assert_eq!(a.content_hash(), hash_content("Short text"));
    assert_ne!(document_id_for_path(Path::new("/tmp/other.txt")), a.id);
}

#[test]
fn ranking_breaks_ties_by_document_then_chunk() {
    let mut results = vec![ranked("b", 0, 0.5), ranked("a", 2, 0.5), ranked("a", 1, 0.5), ranked("c", 0, 0.9)];
    docrag_core::types::sort_ranked(&mut results);
    let order: Vec<(String, usize)> = results.iter().map(|r| (r.document_id.clone(), r.chunk_index)).collect();
    assert_eq!(
        order,
        vec![("c".to_string(), 0), ("a".to_string(), 1), ("a".to_string(), 2), ("b".to_string(), 0)]
    );
}

#[test]
fn top_k_keeps_best_in_ranking_order() {
    let mut top = TopK::new(3);
    for (i, score) in [0.1f32, 0.9, 0.4, 0.9, 0.7, -0.2].iter().enumerate() {
        top.push(ranked("d", i, *score));
    }
    let out = top.into_sorted();
    let idx: Vec<usize> = out.iter().map(|r| r.chunk_index).collect();
    assert_eq!(idx, vec![1, 3, 4]);
}

#[test]
fn cosine_ignores_magnitude() {
    let a = [1.0f32, 2.0, 3.0];
    let b = [2.0f32, 4.0, 6.0];
    assert!((cosine(&a, &b) - 1.0).abs() < 1e-6);
    assert!((cosine(&a, &[0.0, 0.0, 0.0])).abs() < 1e-6);
    let n = normalize(&b);
    let norm: f32 = n.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-6);
}

#[test]
fn filter_and_span_overlap() {
    let filter = DocumentFilter::new(["a", "b"]);
    assert!(filter.allows("a"));
    assert!(!filter.allows("z"));

    let x = ranked("a", 0, 0.5);
    let mut y = ranked("a", 1, 0.5);
    assert!(!x.spans_overlap(&y), "touching spans do not overlap");
    y.start = 5;
    assert!(x.spans_overlap(&y));
    y.document_id = "b".into();
    assert!(!x.spans_overlap(&y), "different documents never overlap");
}
