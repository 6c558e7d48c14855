//! Read-only tools served over the Model Context Protocol: JSON-RPC 2.0,
//! one message per line on stdin/stdout.

mod tools;

use std::path::PathBuf;

use bwh_config::ConfigStore;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::Result;
use tools::{Args, Tool};

pub const PROTOCOL_VERSION: &str = "2025-06-18";

const SERVER_NAME: &str = "bwh";
const SESSION_URI: &str = "bwh://session/default";

// JSON-RPC error codes
const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
struct Request {
    /// Absent on notifications.
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Connects to the resolved instance once (rate-limit status is the
/// cheapest call), then answers requests until stdin closes.
pub async fn serve(config_path: Option<PathBuf>, instance: Option<String>) -> Result<()> {
    let store = ConfigStore::open(config_path)?;
    let resolved = store.resolve(instance.as_deref())?;
    resolved.client().get_rate_limit_status().await?;
    info!(instance = %resolved.name, "mcp server ready");

    let server = Server::new(store, instance);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(response) = server.handle_line(&line).await {
            let mut out = serde_json::to_string(&response)?;
            out.push('\n');
            stdout.write_all(out.as_bytes()).await?;
            stdout.flush().await?;
        }
    }

    info!("stdin closed, mcp server exiting");
    Ok(())
}

pub struct Server {
    store: ConfigStore,
    /// Used when a tool call names no instance.
    instance: Option<String>,
}

impl Server {
    pub fn new(store: ConfigStore, instance: Option<String>) -> Self {
        Self { store, instance }
    }

    /// Answer one line. Notifications get no response.
    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "unparsable message");
                return Some(error_response(Value::Null, RpcError::new(PARSE_ERROR, e.to_string())));
            }
        };

        let request: Request = match serde_json::from_value(value.clone()) {
            Ok(r) => r,
            Err(e) => {
                let id = value.get("id").cloned().unwrap_or(Value::Null);
                return Some(error_response(id, RpcError::new(INVALID_REQUEST, e.to_string())));
            }
        };

        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "notification ignored");
            return None;
        };

        debug!(method = %request.method, "request");
        Some(match self.dispatch(&request).await {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(err) => error_response(id, err),
        })
    }

    async fn dispatch(&self, request: &Request) -> std::result::Result<Value, RpcError> {
        match request.method.as_str() {
            "initialize" => Ok(initialize_result(&request.params)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({
                "tools": Tool::ALL.iter().map(|t| t.definition()).collect::<Vec<_>>(),
            })),
            "tools/call" => {
                let name = request
                    .params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::new(INVALID_PARAMS, "missing tool name"))?;
                let tool = Tool::from_name(name)
                    .ok_or_else(|| RpcError::new(INVALID_PARAMS, format!("unknown tool: {name}")))?;
                let arguments = request.params.get("arguments").unwrap_or(&Value::Null);
                Ok(self.call_tool(tool, &Args::new(arguments)).await)
            }
            "resources/list" => Ok(json!({
                "resources": [{
                    "uri": SESSION_URI,
                    "name": "Session Config",
                    "description": "Default instance and configured instances (API keys omitted)",
                    "mimeType": "application/json",
                }],
            })),
            "resources/read" => {
                let uri = request.params.get("uri").and_then(Value::as_str);
                if uri != Some(SESSION_URI) {
                    return Err(RpcError::new(
                        INVALID_PARAMS,
                        format!("unknown resource: {}", uri.unwrap_or("")),
                    ));
                }
                Ok(json!({
                    "contents": [{
                        "uri": SESSION_URI,
                        "mimeType": "application/json",
                        "text": self.session_view().to_string(),
                    }],
                }))
            }
            other => Err(RpcError::new(METHOD_NOT_FOUND, format!("method not found: {other}"))),
        }
    }

    /// Failures become `isError` tool results rather than protocol errors.
    async fn call_tool(&self, tool: Tool, args: &Args<'_>) -> Value {
        let requested = args.string("instance").or(self.instance.as_deref());
        let resolved = match self.store.resolve(requested) {
            Ok(r) => r,
            Err(e) => return tool_error(format!("resolve instance failed: {e}")),
        };

        debug!(tool = tool.name(), instance = %resolved.name, "tool call");
        match tools::execute(tool, &resolved.client(), &resolved.name, args).await {
            Ok(payload) => json!({
                "content": [{ "type": "text", "text": payload.to_string() }],
                "structuredContent": payload,
                "isError": false,
            }),
            Err(e) => {
                warn!(tool = tool.name(), error = %e, "tool failed");
                tool_error(format!("{} failed: {e}", tool.action()))
            }
        }
    }

    fn session_view(&self) -> Value {
        let instances: serde_json::Map<String, Value> = self
            .store
            .instances()
            .iter()
            .map(|(name, inst)| {
                let view = json!({
                    "veid": inst.veid,
                    "endpoint": inst.endpoint,
                    "description": inst.description,
                    "tags": inst.tags,
                });
                (name.clone(), view)
            })
            .collect();
        json!({
            "default_instance": self.store.default_instance(),
            "instances": instances,
        })
    }
}

fn initialize_result(params: &Value) -> Value {
    let version = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or(PROTOCOL_VERSION);
    json!({
        "protocolVersion": version,
        "capabilities": {
            "tools": { "listChanged": false },
            "resources": { "subscribe": false, "listChanged": false },
        },
        "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
    })
}

fn tool_error(message: String) -> Value {
    json!({
        "content": [{ "type": "text", "text": message }],
        "isError": true,
    })
}

fn error_response(id: Value, err: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": err.code, "message": err.message },
    })
}
