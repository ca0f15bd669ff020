//! docrag-text
//!
//! Tantivy keyword index over chunks. It mirrors the vector index per document
//! and answers queries when the embedding service is unavailable.

pub mod keyword;
pub mod tantivy_utils;

pub use keyword::KeywordIndex;
