use std::path::Path;
use std::sync::Mutex;

use docrag_core::types::{Chunk, DocumentFilter, RankedChunk, SourceKind};
use docrag_core::{Error, Result};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::debug;

use crate::tantivy_utils::{build_schema, register_tokenizer};

const WRITER_HEAP_BYTES: usize = 50_000_000;

struct Fields {
    id: Field,
    document_id: Field,
    chunk_index: Field,
    start: Field,
    end: Field,
    text: Field,
}

/// Per-document keyword index. All methods block; async callers should run
/// them on a blocking thread.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: Fields,
}

fn tantivy_err(e: impl std::fmt::Display) -> Error {
    Error::IndexIo(format!("keyword index: {e}"))
}

impl KeywordIndex {
    /// Opens the index in `dir`, creating it when the directory holds none.
    pub fn open_or_create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(tantivy_err)?;
        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir).map_err(tantivy_err)?
        } else {
            Index::create_in_dir(dir, build_schema()).map_err(tantivy_err)?
        };
        Self::from_index(index)
    }

    pub fn in_ram() -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()))
    }

    fn from_index(index: Index) -> Result<Self> {
        register_tokenizer(&index);
        let schema = index.schema();
        let field = |name: &str| schema.get_field(name).map_err(tantivy_err);
        let fields = Fields {
            id: field("id")?,
            document_id: field("document_id")?,
            chunk_index: field("chunk_index")?,
            start: field("start")?,
            end: field("end")?,
            text: field("text")?,
        };
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().map_err(tantivy_err)?;
        let writer = index.writer(WRITER_HEAP_BYTES).map_err(tantivy_err)?;
        Ok(Self { index, reader, writer: Mutex::new(writer), fields })
    }

    /// Replaces the chunks of `document_id` in one commit.
    pub fn upsert(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.delete_term(Term::from_field_text(self.fields.document_id, document_id));
        for c in chunks {
            writer
                .add_document(doc!(
                    self.fields.id => c.entry_id(),
                    self.fields.document_id => c.document_id.clone(),
                    self.fields.chunk_index => c.index as u64,
                    self.fields.start => c.start as u64,
                    self.fields.end => c.end as u64,
                    self.fields.text => c.text.clone(),
                ))
                .map_err(tantivy_err)?;
        }
        writer.commit().map_err(tantivy_err)?;
        drop(writer);
        self.reader.reload().map_err(tantivy_err)
    }

    pub fn delete(&self, document_id: &str) -> Result<()> {
        self.upsert(document_id, &[])
    }

    pub fn clear(&self) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.delete_all_documents().map_err(tantivy_err)?;
        writer.commit().map_err(tantivy_err)?;
        drop(writer);
        self.reader.reload().map_err(tantivy_err)
    }

    pub fn num_chunks(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// BM25 search; scores are divided by the best score so they fall in (0, 1].
    pub fn search(&self, query: &str, k: usize, filter: Option<&DocumentFilter>) -> Result<Vec<RankedChunk>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".into()));
        }
        if query.trim().is_empty() || filter.is_some_and(|f| f.document_ids.is_empty()) {
            return Ok(Vec::new());
        }
        let parser = QueryParser::for_index(&self.index, vec![self.fields.text]);
        let (parsed, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            debug!(errors = errors.len(), "keyword query parsed leniently");
        }
        let query: Box<dyn Query> = match filter {
            Some(f) => {
                let ids: Vec<(Occur, Box<dyn Query>)> = f
                    .document_ids
                    .iter()
                    .map(|id| {
                        let term = Term::from_field_text(self.fields.document_id, id);
                        (Occur::Should, Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>)
                    })
                    .collect();
                Box::new(BooleanQuery::new(vec![(Occur::Must, parsed), (Occur::Must, Box::new(BooleanQuery::new(ids)))]))
            }
            None => parsed,
        };

        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&query, &TopDocs::with_limit(k)).map_err(tantivy_err)?;
        let max = top_docs.first().map(|(s, _)| *s).unwrap_or(1.0).max(f32::EPSILON);
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument = searcher.doc(addr).map_err(tantivy_err)?;
            let text = |f: Field| doc.get_first(f).and_then(|v| v.as_str()).unwrap_or("").to_string();
            let num = |f: Field| doc.get_first(f).and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            hits.push(RankedChunk {
                document_id: text(self.fields.document_id),
                chunk_index: num(self.fields.chunk_index),
                text: text(self.fields.text),
                start: num(self.fields.start),
                end: num(self.fields.end),
                score: score / max,
                source: SourceKind::Keyword,
                path: None,
            });
        }
        docrag_core::types::sort_ranked(&mut hits);
        Ok(hits)
    }
}
