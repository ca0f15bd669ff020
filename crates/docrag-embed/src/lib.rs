//! Embedding backends and the batching/retrying gateway in front of them.

pub mod backend;
pub mod device;
pub mod gateway;
pub mod hashed;
pub mod local;
pub mod pool;
pub mod remote;
pub mod tokenize;

pub use backend::EmbeddingBackend;
pub use gateway::{EmbeddingGateway, GatewayOptions};
pub use hashed::HashEmbedder;
pub use local::LocalEmbedder;
pub use pool::masked_mean_l2;
pub use remote::RemoteEmbedder;
