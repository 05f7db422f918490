//! MCP protocol adapter for mcpz.
//!
//! This is the only crate that speaks the wire protocol. It provides the
//! JSON-RPC message types, the two tool-schema dialects and translation
//! between them, a stdio client for talking to server processes, and the
//! composed [`Endpoint`] together with the loop that serves it.

/// Stdio MCP client.
pub mod client;
/// Tool-schema dialects and translation.
pub mod dialect;
/// The composed endpoint.
pub mod endpoint;
/// JSON-RPC and MCP wire types.
pub mod protocol;
/// Serving an endpoint over a byte stream.
pub mod server;

pub use client::McpClient;
pub use dialect::{translate_schema, Dialect};
pub use endpoint::{Endpoint, RegisteredTool, ToolBackend, ToolRoute};
pub use protocol::{InitializeResult, McpContent, McpToolResult};
pub use server::serve;
