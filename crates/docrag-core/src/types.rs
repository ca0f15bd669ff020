//! Domain types shared by the chunker, the indexes and the retriever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::Path;

pub type DocumentId = String;

/// Hex-encoded blake3 digest of `text`.
pub fn hash_content(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Stable document key derived from a source path.
pub fn document_id_for_path(path: &Path) -> DocumentId {
    let digest = hash_content(&path.to_string_lossy());
    digest[..16].to_string()
}

/// Extracted plain text handed to ingestion.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: DocumentId,
    pub path: String,
    pub text: String,
}

impl SourceDocument {
    pub fn new(id: impl Into<String>, path: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), path: path.into(), text: text.into() }
    }

    pub fn from_path(path: &Path, text: impl Into<String>) -> Self {
        Self {
            id: document_id_for_path(path),
            path: path.to_string_lossy().to_string(),
            text: text.into(),
        }
    }

    pub fn content_hash(&self) -> String {
        hash_content(&self.text)
    }
}

/// Registry record for an ingested document.
///
/// - `id`: stable document key (path-derived unless supplied by the caller)
/// - `content_hash`: blake3 of the full extracted text, used to skip unchanged re-ingestion
/// - `chunk_count`: number of chunks (and index entries) the document owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub path: String,
    pub content_hash: String,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
}

/// A chunk of a document, the unit of embedding and retrieval.
///
/// `start`/`end` are character offsets into the source text, end exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: DocumentId,
    pub index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    pub fn entry_id(&self) -> String {
        entry_id(&self.document_id, self.index)
    }
}

pub fn entry_id(document_id: &str, chunk_index: usize) -> String {
    format!("{document_id}:{chunk_index}")
}

/// A chunk paired with its embedding, as stored by a vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub document_id: DocumentId,
    pub chunk_index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub content_hash: String,
    pub vector: Vec<f32>,
}

impl IndexEntry {
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>) -> Self {
        Self {
            document_id: chunk.document_id.clone(),
            chunk_index: chunk.index,
            text: chunk.text.clone(),
            start: chunk.start,
            end: chunk.end,
            content_hash: hash_content(&chunk.text),
            vector,
        }
    }

    pub fn to_chunk(&self) -> Chunk {
        Chunk {
            document_id: self.document_id.clone(),
            index: self.chunk_index,
            text: self.text.clone(),
            start: self.start,
            end: self.end,
        }
    }
}

/// Restricts a query to a set of documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFilter {
    pub document_ids: BTreeSet<DocumentId>,
}

impl DocumentFilter {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { document_ids: ids.into_iter().map(Into::into).collect() }
    }

    pub fn allows(&self, document_id: &str) -> bool {
        self.document_ids.contains(document_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Query {
    pub text: String,
    pub k: Option<usize>,
    pub filter: Option<DocumentFilter>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), k: None, filter: None }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn with_filter(mut self, filter: DocumentFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Indicates which engine produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceKind {
    Vector,
    Keyword,
}

/// One fragment of a ranked result list.
///
/// `score` is cosine similarity for vector results and a max-normalised
/// BM25 score for keyword results; higher is always better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedChunk {
    pub document_id: DocumentId,
    pub chunk_index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub score: f32,
    pub source: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl RankedChunk {
    /// Descending score, then `(document_id, chunk_index)` ascending.
    pub fn ranking_cmp(a: &RankedChunk, b: &RankedChunk) -> Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    }

    pub fn spans_overlap(&self, other: &RankedChunk) -> bool {
        self.document_id == other.document_id && self.start < other.end && other.start < self.end
    }
}

pub fn sort_ranked(results: &mut [RankedChunk]) {
    results.sort_by(RankedChunk::ranking_cmp);
}
