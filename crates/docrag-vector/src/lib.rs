//! Vector storage: the in-memory and LanceDB [`VectorIndex`] implementations,
//! the document registry and the embedding cache.
//!
//! [`VectorIndex`]: docrag_core::traits::VectorIndex

pub mod cache;
pub mod index_build;
pub mod lance_index;
pub mod memory;
pub mod registry;
pub mod schema;
pub mod table;

pub use cache::EmbeddingCache;
pub use lance_index::{LanceIndex, LanceSearchOptions};
pub use memory::MemoryIndex;
pub use registry::{DocumentRegistry, ReconcileReport};
pub use table::open_db;
