//! Context assembly for an external answer generator.

use docrag_core::types::RankedChunk;

fn source_label(result: &RankedChunk) -> &str {
    result.path.as_deref().unwrap_or(&result.document_id)
}

/// Numbered `[Source i: path, chunk j]` blocks separated by blank lines.
pub fn build_context(results: &[RankedChunk]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[Source {}: {}, chunk {}]\n{}", i + 1, source_label(r), r.chunk_index, r.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Distinct sources in first-seen order.
pub fn sources(results: &[RankedChunk]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for r in results {
        let label = source_label(r);
        if !out.iter().any(|s| s == label) {
            out.push(label.to_string());
        }
    }
    out
}
