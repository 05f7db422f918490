//! MCP client: talks to an MCP server over its stdio (or any byte stream)
//! with line-delimited JSON-RPC 2.0 messages.

use crate::dialect::CURRENT_PROTOCOL_VERSION;
use crate::protocol::*;
use mcpz_core::{McpzError, McpzResult, ToolDefinition};
use std::collections::{BTreeMap, HashMap};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

/// Default bound on a single request/response exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// MCP client bound to one server.
///
/// Created by [`McpClient::spawn`] for a child process or
/// [`McpClient::from_transport`] for an existing stream. The `initialize`
/// handshake is a separate step so callers can retry and time it.
pub struct McpClient {
    writer: Mutex<Option<Writer>>,
    child: Option<Mutex<Child>>,
    pid: Option<u32>,
    pending: Pending,
    next_id: AtomicU64,
    server_name: String,
    request_timeout: Duration,
}

impl McpClient {
    /// Spawn `command` with piped stdio. The child's stderr is discarded.
    pub fn spawn(
        server_name: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> McpzResult<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| McpzError::spawn_failed(server_name, format!("{command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpzError::spawn_failed(server_name, "stdin not available"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpzError::spawn_failed(server_name, "stdout not available"))?;

        let pid = child.id();
        let mut client = Self::from_transport(server_name, stdout, stdin);
        client.child = Some(Mutex::new(child));
        client.pid = pid;
        debug!(server = %server_name, pid = ?pid, "MCP server process spawned");
        Ok(client)
    }

    /// Wrap an already-connected byte stream.
    pub fn from_transport<R, W>(server_name: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(read_loop(server_name.to_string(), reader, Arc::clone(&pending)));

        Self {
            writer: Mutex::new(Some(Box::new(writer))),
            child: None,
            pid: None,
            pending,
            next_id: AtomicU64::new(1),
            server_name: server_name.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound on how long a single request waits for its response.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Name the client was created for, used in logs and errors.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// OS pid of the child, when the client owns one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Send a JSON-RPC request and wait for the response.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> McpzResult<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.send_line(&serde_json::to_string(&req)?).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let resp = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => {
                return Err(McpzError::Protocol(format!(
                    "'{}' closed its stream during '{method}'",
                    self.server_name
                )))
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(McpzError::Protocol(format!(
                    "'{method}' to '{}' timed out",
                    self.server_name
                )));
            }
        };

        if let Some(err) = &resp.error {
            return Err(McpzError::Protocol(format!(
                "MCP error {}: {}",
                err.code, err.message
            )));
        }

        Ok(resp)
    }

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> McpzResult<()> {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params.unwrap_or(serde_json::json!({})),
        });
        self.send_line(&serde_json::to_string(&msg)?).await
    }

    async fn send_line(&self, line: &str) -> McpzResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| {
            McpzError::Protocol(format!("connection to '{}' is closed", self.server_name))
        })?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Perform the MCP initialize handshake, proposing the newest protocol
    /// version. The server's answer decides the dialect of its tools.
    pub async fn initialize(&self) -> McpzResult<InitializeResult> {
        let params = serde_json::json!({
            "protocolVersion": CURRENT_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "mcpz",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let resp = self.request("initialize", Some(params)).await?;
        let result: InitializeResult = serde_json::from_value(
            resp.result
                .ok_or_else(|| McpzError::Protocol("empty initialize result".into()))?,
        )
        .map_err(|e| McpzError::Protocol(format!("bad initialize result: {e}")))?;

        self.notify("notifications/initialized", None).await?;
        info!(
            server = %self.server_name,
            version = %result.protocol_version,
            "MCP server initialized"
        );
        Ok(result)
    }

    /// List every tool, following `nextCursor` pagination.
    pub async fn list_tools(&self) -> McpzResult<Vec<ToolDefinition>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let resp = self.request("tools/list", params).await?;
            let result = resp
                .result
                .ok_or_else(|| McpzError::Protocol("empty tools/list result".into()))?;

            cursor = result
                .get("nextCursor")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string);
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| McpzError::Protocol(format!("bad tools/list result: {e}")))?;
            tools.extend(page.tools);

            if cursor.is_none() {
                break;
            }
        }
        debug!(server = %self.server_name, tools = tools.len(), "MCP tools listed");
        Ok(tools)
    }

    /// Call a tool on the MCP server.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> McpzResult<McpToolResult> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });

        let resp = self.request("tools/call", Some(params)).await?;
        let result = resp
            .result
            .ok_or_else(|| McpzError::Protocol("empty tools/call result".into()))?;

        serde_json::from_value(result)
            .map_err(|e| McpzError::Protocol(format!("bad tool result: {e}")))
    }

    /// Send `ping`.
    pub async fn ping(&self) -> McpzResult<()> {
        self.request("ping", None).await.map(|_| ())
    }

    /// Health check: `ping`, falling back to `tools/list` for servers that
    /// predate it.
    pub async fn health_check(&self) -> McpzResult<()> {
        match self.ping().await {
            Ok(()) => Ok(()),
            Err(McpzError::Protocol(msg)) if msg.contains("-32601") => {
                self.list_tools().await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    /// Non-blocking exit check on the owned child.
    pub async fn try_wait(&self) -> McpzResult<Option<ExitStatus>> {
        match &self.child {
            Some(child) => Ok(child.lock().await.try_wait()?),
            None => Ok(None),
        }
    }

    /// Close stdin and wait up to `grace` for the child to exit, then kill it.
    ///
    /// Returns true when the child exited on its own.
    pub async fn shutdown(&self, grace: Duration) -> McpzResult<bool> {
        self.writer.lock().await.take();
        let Some(child) = &self.child else {
            return Ok(true);
        };
        let mut child = child.lock().await;

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(server = %self.server_name, ?status, "MCP server exited");
                Ok(true)
            }
            Err(_) => {
                warn!(server = %self.server_name, "MCP server ignored shutdown, killing");
                child.kill().await?;
                Ok(false)
            }
        }
    }
}

async fn read_loop<R>(server_name: String, reader: R, pending: Pending)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!(server = %server_name, "MCP server stdout closed");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let value: serde_json::Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!(server = %server_name, error = %e, "Non-JSON line from MCP server");
                        continue;
                    }
                };
                if value.get("method").is_some() {
                    // server-initiated requests and notifications are not handled
                    continue;
                }
                match serde_json::from_value::<JsonRpcResponse>(value) {
                    Ok(resp) => {
                        if let Some(id) = resp.id {
                            if let Some(tx) = pending.lock().await.remove(&id) {
                                let _ = tx.send(resp);
                            }
                        }
                    }
                    Err(e) => {
                        debug!(server = %server_name, error = %e, "Malformed JSON-RPC response");
                    }
                }
            }
            Err(e) => {
                error!(server = %server_name, error = %e, "Error reading MCP server stdout");
                break;
            }
        }
    }
    // wake every waiter instead of letting them time out
    pending.lock().await.clear();
}
