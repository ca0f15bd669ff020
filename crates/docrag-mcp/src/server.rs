//! Stdio server: reads one JSON-RPC message per line and answers on the writer.
//!
//! Messages are handled in arrival order. Logging goes through `tracing`, so
//! the subscriber must not write to the same stream as the responses.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use docrag_core::loader::load_document;
use docrag_core::types::{DocumentFilter, Query, RankedChunk, SourceDocument};
use docrag_retrieval::{Engine, IngestOutcome};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

use crate::types::{
    InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpToolDef, ServerCapabilities, ServerInfo,
    ToolsCallParams, ToolsCallResult, ToolsListResult, INTERNAL_ERROR, INVALID_REQUEST, JSONRPC_VERSION,
    METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION,
};

const DEFAULT_TOP_K: usize = 5;
const PREVIEW_CHARS: usize = 200;

pub const NO_RESULTS: &str = "No results found";
pub const NO_DOCUMENTS: &str = "No documents ingested";

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    document_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IngestArgs {
    File { file_path: String },
    Text { id: String, text: String, #[serde(default)] path: Option<String> },
}

#[derive(Debug, Deserialize)]
struct RemoveArgs {
    id: String,
}

pub struct McpServer {
    engine: Arc<Engine>,
}

impl McpServer {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Serves until `reader` reaches end of input.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(protocol = PROTOCOL_VERSION, "tool server listening on stdio");
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            trace!(raw = %trimmed, "client -> server");
            let Some(response) = self.handle_line(trimmed).await else { continue };

            let mut payload = serde_json::to_string(&response)?;
            payload.push('\n');
            writer.write_all(payload.as_bytes()).await?;
            writer.flush().await?;
        }
        debug!("client closed input");
        Ok(())
    }

    /// Answers one raw message; `None` for notifications.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "unparseable message");
                return Some(JsonRpcResponse::failure(Value::Null, JsonRpcError::new(PARSE_ERROR, format!("parse error: {e}"))));
            }
        };
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle(request).await,
            Err(e) => Some(JsonRpcResponse::failure(id, JsonRpcError::new(INVALID_REQUEST, format!("invalid request: {e}")))),
        }
    }

    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id else {
            debug!(method = %request.method, "notification");
            return None;
        };
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::failure(
                id,
                JsonRpcError::new(INVALID_REQUEST, format!("unsupported jsonrpc version `{}`", request.jsonrpc)),
            ));
        }
        let outcome = match request.method.as_str() {
            "initialize" => to_json(&InitializeResult {
                protocol_version: PROTOCOL_VERSION.into(),
                capabilities: ServerCapabilities::default(),
                server_info: ServerInfo { name: "docrag".into(), version: env!("CARGO_PKG_VERSION").into() },
            }),
            "ping" => Ok(json!({})),
            "tools/list" => to_json(&ToolsListResult { tools: tool_defs() }),
            "tools/call" => self.call_tool(request.params).await,
            other => Err(JsonRpcError::new(METHOD_NOT_FOUND, format!("method not found: {other}"))),
        };
        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> std::result::Result<Value, JsonRpcError> {
        let params: ToolsCallParams = parse(params.unwrap_or(Value::Null))?;
        info!(tool = %params.name, "tool call");
        let result = match params.name.as_str() {
            "search_documents" => self.search(parse(params.arguments)?).await,
            "list_documents" => Ok(self.list_documents()),
            "ingest_document" => self.ingest(parse(params.arguments)?).await,
            "remove_document" => self.remove(parse(params.arguments)?).await,
            other => return Err(JsonRpcError::invalid_params(format!("unknown tool: {other}"))),
        };
        let call = match result {
            Ok(text) => ToolsCallResult::text(text),
            Err(e) => {
                warn!(tool = %params.name, error = %e, "tool failed");
                ToolsCallResult::error(e.to_string())
            }
        };
        to_json(&call)
    }

    async fn search(&self, args: SearchArgs) -> docrag_core::Result<String> {
        let k = args.top_k.unwrap_or(DEFAULT_TOP_K);
        if k == 0 {
            return Err(docrag_core::Error::InvalidArgument("top_k must be at least 1".into()));
        }
        let mut query = Query::new(args.query).with_k(k);
        if !args.document_ids.is_empty() {
            query = query.with_filter(DocumentFilter::new(args.document_ids));
        }
        let results = self.engine.retriever().retrieve(&query).await?;
        info!(results = results.len(), "search answered");
        if results.is_empty() {
            return Ok(NO_RESULTS.into());
        }
        Ok(format_results(&results))
    }

    fn list_documents(&self) -> String {
        let docs = self.engine.registry.list();
        if docs.is_empty() {
            return NO_DOCUMENTS.into();
        }
        docs.iter()
            .map(|d| format!("{}  {}  ({} chunks)", d.id, d.path, d.chunk_count))
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn ingest(&self, args: IngestArgs) -> docrag_core::Result<String> {
        let doc = match args {
            IngestArgs::File { file_path } => load_document(Path::new(&file_path))?,
            IngestArgs::Text { id, text, path } => {
                let path = path.unwrap_or_else(|| id.clone());
                SourceDocument::new(id, path, text)
            }
        };
        let (id, path) = (doc.id.clone(), doc.path.clone());
        Ok(match self.engine.ingestor().ingest(doc).await? {
            IngestOutcome::Ingested { chunks } => format!("Ingested {chunks} chunks from {path} as {id}"),
            IngestOutcome::Unchanged => format!("{id} is already up to date"),
            IngestOutcome::Empty => format!("{path} has no text to index"),
        })
    }

    async fn remove(&self, args: RemoveArgs) -> docrag_core::Result<String> {
        Ok(if self.engine.ingestor().remove(&args.id).await? {
            format!("Removed {}", args.id)
        } else {
            format!("{} was not registered", args.id)
        })
    }
}

fn format_results(results: &[RankedChunk]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let source = r.path.as_deref().unwrap_or(&r.document_id);
            format!("{}. [{source} #{}] {}", i + 1, r.chunk_index, preview(&r.text))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let head: String = flat.chars().take(PREVIEW_CHARS).collect();
    format!("{head}...")
}

fn parse<T: DeserializeOwned>(value: Value) -> std::result::Result<T, JsonRpcError> {
    serde_json::from_value(value).map_err(|e| JsonRpcError::invalid_params(format!("invalid arguments: {e}")))
}

fn to_json<T: Serialize>(value: &T) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string()))
}

fn tool_defs() -> Vec<McpToolDef> {
    vec![
        McpToolDef {
            name: "search_documents".into(),
            description: "Search ingested documents for passages relevant to a query".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "top_k": { "type": "integer", "description": "Number of results", "default": DEFAULT_TOP_K, "minimum": 1 },
                    "document_ids": { "type": "array", "items": { "type": "string" }, "description": "Only search these documents" }
                },
                "required": ["query"]
            }),
        },
        McpToolDef {
            name: "list_documents".into(),
            description: "List all ingested documents".into(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        McpToolDef {
            name: "ingest_document".into(),
            description: "Ingest a text file by path, or raw text under a document id".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string", "description": "Path of a text file to ingest" },
                    "id": { "type": "string", "description": "Document id for raw text" },
                    "text": { "type": "string", "description": "Raw document text" },
                    "path": { "type": "string", "description": "Source path recorded for raw text" }
                }
            }),
        },
        McpToolDef {
            name: "remove_document".into(),
            description: "Remove a document and its index entries".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "id": { "type": "string", "description": "Document id" } },
                "required": ["id"]
            }),
        },
    ]
}
