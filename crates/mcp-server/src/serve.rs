//! Server-side protocol loop.
//!
//! Reads newline-delimited JSON-RPC frames, answers `initialize`,
//! `tools/list` and `tools/call`, and ignores notifications. Handler
//! failures are answered as `isError` result payloads; only transport
//! I/O errors end the loop. The loop handles one request at a time, so
//! dispatch against the shared store is naturally serialized.

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::registry::ToolRegistry;

/// MCP protocol revision spoken by this server.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Serve `registry` over a byte stream until EOF.
pub async fn serve<R, W>(mut reader: R, mut writer: W, registry: ToolRegistry) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tracing::info!(tools = registry.len(), "tool server ready");

    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            tracing::info!("client closed the stream, shutting down");
            return Ok(());
        }
        let frame = line.trim();
        if frame.is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(frame) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, frame, "dropping undecodable frame");
                continue;
            }
        };

        let method = value.get("method").and_then(Value::as_str);
        let id = value.get("id").and_then(Value::as_u64);

        let response = match (id, method) {
            (None, Some(method)) => {
                tracing::debug!(method, "ignoring notification");
                continue;
            }
            (None, None) | (Some(_), None) => {
                tracing::warn!(frame, "dropping frame with no method");
                continue;
            }
            (Some(id), Some(method)) => handle_request(&registry, id, method, value.get("params")),
        };

        let json = response.to_string();
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
}

fn handle_request(registry: &ToolRegistry, id: u64, method: &str, params: Option<&Value>) -> Value {
    match method {
        "initialize" => success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": "toolwire-server",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
        ),
        "tools/list" => success(id, json!({ "tools": registry.descriptors() })),
        "tools/call" => {
            let Some(name) = params
                .and_then(|p| p.get("name"))
                .and_then(Value::as_str)
            else {
                return error(id, -32602, "tools/call requires a string \"name\" parameter");
            };
            let arguments = params
                .and_then(|p| p.get("arguments"))
                .cloned()
                .unwrap_or_else(|| json!({}));

            tracing::debug!(tool = name, "dispatching");
            match registry.dispatch(name, arguments) {
                Ok(value) => success(
                    id,
                    json!({
                        "content": [{ "type": "text", "text": value_to_text(&value) }],
                        "isError": false
                    }),
                ),
                Err(e) => success(
                    id,
                    json!({
                        "content": [{ "type": "text", "text": e.to_string() }],
                        "isError": true
                    }),
                ),
            }
        }
        other => error(id, -32601, &format!("method not found: {other}")),
    }
}

/// Render a tool result value as display text: bare strings stay bare,
/// everything else is compact JSON.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn success(id: u64, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error(id: u64, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}
