//! Line-delimited JSON-RPC loop that serves an [`Endpoint`] over a byte
//! stream (stdio for `mcpz run`).

use crate::endpoint::Endpoint;
use crate::protocol::{
    IncomingMessage, JsonRpcError, OutgoingResponse, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
use mcpz_core::McpzResult;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Serve `endpoint` until `reader` reaches EOF.
///
/// Requests are answered in arrival order except `tools/call`, which runs
/// on its own task so a slow tool does not stall `ping` or `tools/list`.
pub async fn serve<R, W>(endpoint: Arc<Endpoint>, reader: R, writer: W) -> McpzResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<OutgoingResponse>(64);
    let writer_task = tokio::spawn(write_loop(writer, rx));

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let msg: IncomingMessage = match serde_json::from_str(trimmed) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "Unparseable request");
                let _ = tx
                    .send(OutgoingResponse::err(Value::Null, PARSE_ERROR, e.to_string()))
                    .await;
                continue;
            }
        };

        let (Some(id), Some(method)) = (msg.id, msg.method) else {
            // notifications and stray responses need no answer
            continue;
        };

        if method == "tools/call" {
            let endpoint = Arc::clone(&endpoint);
            let tx = tx.clone();
            tokio::spawn(async move {
                let response = match call(&endpoint, msg.params).await {
                    Ok(result) => OutgoingResponse::ok(id, result),
                    Err(e) => error_response(id, e),
                };
                let _ = tx.send(response).await;
            });
            continue;
        }

        let response = match dispatch(&endpoint, &method, msg.params) {
            Ok(result) => OutgoingResponse::ok(id, result),
            Err(e) => error_response(id, e),
        };
        if tx.send(response).await.is_err() {
            break;
        }
    }

    info!(endpoint = %endpoint.name(), "Client closed the stream");
    drop(tx);
    match writer_task.await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Endpoint writer task failed");
            Ok(())
        }
    }
}

/// Answer a non-`tools/call` request.
pub fn dispatch(
    endpoint: &Endpoint,
    method: &str,
    params: Option<Value>,
) -> Result<Value, JsonRpcError> {
    match method {
        "initialize" => {
            if let Some(requested) = mismatched_version(endpoint, params.as_ref()) {
                warn!(
                    endpoint = %endpoint.name(),
                    requested,
                    served = %endpoint.dialect().protocol_version(),
                    "Client asked for a different protocol version"
                );
            }
            serde_json::to_value(endpoint.initialize_result())
                .map_err(|e| rpc_error(INTERNAL_ERROR, e.to_string()))
        }
        "ping" => Ok(serde_json::json!({})),
        "tools/list" => Ok(serde_json::json!({ "tools": endpoint.list_tools() })),
        other => Err(rpc_error(
            METHOD_NOT_FOUND,
            format!("method '{other}' not found"),
        )),
    }
}

/// The `protocolVersion` a client sent with `initialize`, when it is not the
/// one the endpoint serves.
fn mismatched_version<'p>(endpoint: &Endpoint, params: Option<&'p Value>) -> Option<&'p str> {
    params?
        .get("protocolVersion")
        .and_then(Value::as_str)
        .filter(|v| *v != endpoint.dialect().protocol_version())
}

async fn call(endpoint: &Endpoint, params: Option<Value>) -> Result<Value, JsonRpcError> {
    let params = params.unwrap_or(Value::Null);
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| rpc_error(INVALID_PARAMS, "missing tool name"))?;
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    let result = endpoint
        .call_tool(name, arguments)
        .await
        .map_err(|e| rpc_error(INVALID_PARAMS, e.to_string()))?;
    serde_json::to_value(result).map_err(|e| rpc_error(INTERNAL_ERROR, e.to_string()))
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<OutgoingResponse>) -> McpzResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_string(&response)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

fn rpc_error(code: i64, message: impl Into<String>) -> JsonRpcError {
    JsonRpcError {
        code,
        message: message.into(),
        data: None,
    }
}

fn error_response(id: Value, e: JsonRpcError) -> OutgoingResponse {
    OutgoingResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(e),
    }
}
