use thiserror::Error;

/// Reasons a document's text could not be split into chunks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkingError {
    #[error("invalid chunking parameters: {0}")]
    InvalidConfig(String),

    #[error("input looks like binary data ({control} control characters in {total})")]
    BinaryContent { control: usize, total: usize },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Chunking failed: {0}")]
    Chunking(#[from] ChunkingError),

    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding dimension changed: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding backend error: {0}")]
    EmbeddingBackend(String),

    #[error("Index I/O error: {0}")]
    IndexIo(String),

    #[error("Vector dimension mismatch: index has {expected}, query has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Retrieval unavailable: {source}")]
    RetrievalUnavailable {
        #[source]
        source: Box<Error>,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Transport-level failures that may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::EmbeddingUnavailable(_))
    }

    pub fn index_io(err: impl std::fmt::Display) -> Self {
        Error::IndexIo(err.to_string())
    }

    /// Wraps any failure of the query path, leaving an already wrapped error untouched.
    pub fn retrieval(self) -> Self {
        match self {
            Error::RetrievalUnavailable { .. } => self,
            other => Error::RetrievalUnavailable { source: Box::new(other) },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
