//! Tool-protocol server over stdio: newline-delimited JSON-RPC exposing
//! document search, listing and ingestion to an assistant client.

pub mod server;
pub mod types;

pub use server::McpServer;
pub use types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, ToolContent, ToolsCallResult, PROTOCOL_VERSION};
