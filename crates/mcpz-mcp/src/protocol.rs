//! MCP (Model Context Protocol) JSON-RPC 2.0 message types.

use mcpz_core::ToolDefinition;
use serde::{Deserialize, Serialize};

/// JSON-RPC error code: method not found.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code: invalid params.
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC error code: internal error.
pub const INTERNAL_ERROR: i64 = -32603;
/// JSON-RPC error code: parse error.
pub const PARSE_ERROR: i64 = -32700;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Request id, unique per client.
    pub id: u64,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// A request with the given id.
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version marker.
    #[allow(dead_code)]
    pub jsonrpc: String,
    /// Id of the request answered; absent for notifications.
    pub id: Option<u64>,
    /// Result on success.
    pub result: Option<serde_json::Value>,
    /// Error on failure.
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Extra error data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Any message arriving at the endpoint side: a request (has `method` and
/// `id`) or a notification (has `method`, no `id`).
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    /// Absent for notifications.
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    /// Absent for responses.
    #[serde(default)]
    pub method: Option<String>,
    /// Method parameters.
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

/// Response written by the endpoint side.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingResponse {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Id of the request answered.
    pub id: serde_json::Value,
    /// Result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl OutgoingResponse {
    /// A success response.
    pub fn ok(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    /// An error response.
    pub fn err(id: serde_json::Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// `tools/list` result.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListToolsResult {
    /// Tools on this page.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// MCP tool call result from the `tools/call` response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpToolResult {
    /// Content blocks.
    #[serde(default)]
    pub content: Vec<McpContent>,
    /// Whether the tool reported a failure.
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl McpToolResult {
    /// A single text block.
    pub fn text(text: impl Into<String>, is_error: bool) -> Self {
        Self {
            content: vec![McpContent {
                content_type: "text".into(),
                text: text.into(),
            }],
            is_error,
        }
    }
}

/// MCP content block.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpContent {
    /// Block type, `text` for text blocks.
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text of a text block.
    #[serde(default)]
    pub text: String,
}

/// MCP server capabilities from the `initialize` response.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ServerCapabilities {
    /// Tool capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
    /// Resource capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<serde_json::Value>,
    /// Prompt capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<serde_json::Value>,
}

/// MCP initialize response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InitializeResult {
    /// Protocol version the server agreed to.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// What the server supports.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Server name and version.
    #[serde(default, rename = "serverInfo", skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
}

/// `serverInfo` of an initialize result.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    #[serde(default)]
    pub version: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "test/method", Some(serde_json::json!({"key": "value"})));
        let parsed = serde_json::to_value(&req).unwrap();
        assert_eq!(parsed["jsonrpc"], "2.0");
        assert_eq!(parsed["id"], 1);
        assert_eq!(parsed["method"], "test/method");
        assert_eq!(parsed["params"]["key"], "value");
    }

    #[test]
    fn test_json_rpc_request_no_params() {
        let req = JsonRpcRequest::new(2, "tools/list", None);
        let parsed = serde_json::to_value(&req).unwrap();
        assert!(parsed.get("params").is_none());
    }

    #[test]
    fn test_json_rpc_error_parse() {
        let json =
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"Invalid request"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32600);
        assert_eq!(err.message, "Invalid request");
    }

    #[test]
    fn test_incoming_notification_has_no_id() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap();
        assert!(msg.id.is_none());
        assert_eq!(msg.method.as_deref(), Some("notifications/initialized"));
    }

    #[test]
    fn test_outgoing_error_shape() {
        let resp = OutgoingResponse::err(serde_json::json!("abc"), METHOD_NOT_FOUND, "nope");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["error"]["code"], -32601);
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_initialize_result_parse() {
        let json = r#"{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"test-server","version":"1.0"}}"#;
        let result: InitializeResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.protocol_version, "2024-11-05");
        assert!(result.capabilities.tools.is_some());
        assert_eq!(result.server_info.unwrap().name, "test-server");
    }

    #[test]
    fn test_mcp_tool_result_parse() {
        let json = r#"{"content":[{"type":"text","text":"file contents here"}],"isError":false}"#;
        let result: McpToolResult = serde_json::from_str(json).unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content[0].text, "file contents here");
    }
}
