//! Character-window chunking with natural-boundary preference.
//!
//! Chunks are at most `max_chars` characters long and consecutive chunks share
//! exactly `overlap` characters. Before falling back to a hard cut, the chunker
//! looks back up to `boundary_window` characters for a paragraph break, then a
//! sentence end, then any whitespace.

use serde::{Deserialize, Serialize};

use crate::error::ChunkingError;
use crate::types::Chunk;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap: usize,
    /// Look-back distance for natural boundaries; `None` means `max_chars / 5`.
    pub boundary_window: Option<usize>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_chars: 1000, overlap: 200, boundary_window: None }
    }
}

impl ChunkingConfig {
    pub fn new(max_chars: usize, overlap: usize) -> Self {
        Self { max_chars, overlap, boundary_window: None }
    }

    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.max_chars == 0 {
            return Err(ChunkingError::InvalidConfig("max_chars must be greater than zero".into()));
        }
        if self.overlap >= self.max_chars {
            return Err(ChunkingError::InvalidConfig(format!(
                "overlap ({}) must be smaller than max_chars ({})",
                self.overlap, self.max_chars
            )));
        }
        Ok(())
    }

    fn window(&self) -> usize {
        self.boundary_window.unwrap_or(self.max_chars / 5).max(1)
    }
}

/// A chunk before it is attached to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, ChunkingError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub fn chunk(&self, text: &str) -> Result<Vec<TextChunk>, ChunkingError> {
        chunk_with(text, &self.config)
    }

    pub fn chunk_document(&self, document_id: &str, text: &str) -> Result<Vec<Chunk>, ChunkingError> {
        Ok(self
            .chunk(text)?
            .into_iter()
            .map(|c| Chunk { document_id: document_id.to_string(), index: c.index, text: c.text, start: c.start, end: c.end })
            .collect())
    }
}

/// Splits `text` into overlapping chunks of at most `max_chars` characters.
pub fn chunk(text: &str, max_chars: usize, overlap: usize) -> Result<Vec<TextChunk>, ChunkingError> {
    chunk_with(text, &ChunkingConfig::new(max_chars, overlap))
}

pub fn chunk_with(text: &str, config: &ChunkingConfig) -> Result<Vec<TextChunk>, ChunkingError> {
    config.validate()?;
    reject_binary(text)?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let hard_end = start + config.max_chars;
        if hard_end >= len {
            chunks.push(make_chunk(&chars, chunks.len(), start, len));
            break;
        }
        let end = find_boundary(&chars, start, hard_end, config);
        chunks.push(make_chunk(&chars, chunks.len(), start, end));
        start = end - config.overlap;
    }
    Ok(chunks)
}

fn make_chunk(chars: &[char], index: usize, start: usize, end: usize) -> TextChunk {
    TextChunk { index, text: chars[start..end].iter().collect(), start, end }
}

/// Best cut position in `(start + overlap, hard_end]`; falls back to `hard_end`.
fn find_boundary(chars: &[char], start: usize, hard_end: usize, config: &ChunkingConfig) -> usize {
    let min_end = (start + config.overlap + 1).max(hard_end.saturating_sub(config.window()));
    let mut paragraph = None;
    let mut sentence = None;
    let mut word = None;
    let mut p = hard_end;
    while p >= min_end && p >= 2 {
        let prev = chars[p - 1];
        let before = chars[p - 2];
        if paragraph.is_none() && prev == '\n' && before == '\n' {
            paragraph = Some(p);
        }
        if sentence.is_none() && (prev == '\n' || (prev.is_whitespace() && matches!(before, '.' | '?' | '!'))) {
            sentence = Some(p);
        }
        if word.is_none() && prev.is_whitespace() {
            word = Some(p);
        }
        if paragraph.is_some() {
            break;
        }
        p -= 1;
    }
    paragraph.or(sentence).or(word).unwrap_or(hard_end)
}

fn reject_binary(text: &str) -> Result<(), ChunkingError> {
    let mut total = 0usize;
    let mut control = 0usize;
    for c in text.chars() {
        total += 1;
        if c == '\0' {
            return Err(ChunkingError::BinaryContent { control: control + 1, total });
        }
        if c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\u{c}') {
            control += 1;
        }
    }
    if total > 0 && control * 10 > total {
        return Err(ChunkingError::BinaryContent { control, total });
    }
    Ok(())
}
