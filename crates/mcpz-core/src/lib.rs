//! Core types and error definitions for mcpz.
//!
//! This crate provides the foundational types shared across all mcpz crates,
//! including the error taxonomy, server specifications and tool definitions.
//!
//! # Main types
//!
//! - [`McpzError`]: Unified error enum for all mcpz subsystems.
//! - [`McpzResult`]: Convenience alias for `Result<T, McpzError>`.
//! - [`ServerSpec`]: A named MCP server launch definition.
//! - [`ServerOrigin`]: Whether a server is builtin or contributed by a plugin.
//! - [`ToolDefinition`]: A tool advertised by a server or contributed by a skill.
//! - [`ToolFilter`]: An allow-list narrowing the tools a run advertises.

/// Server launch specifications.
pub mod server;
/// Tool definitions and tool filters.
pub mod tool;

pub use server::{ServerOrigin, ServerSpec};
pub use tool::{ToolDefinition, ToolFilter};

// --- Error types ---

/// Top-level error type for mcpz.
///
/// Variants are grouped by the component that raises them. User-input errors
/// carry the offending name so they can be reported verbatim.
#[derive(Debug, thiserror::Error)]
pub enum McpzError {
    /// The config file exists but could not be parsed, migrated or validated.
    #[error("config file is corrupt: {0}")]
    ConfigCorrupt(String),

    /// The config file could not be read from disk.
    #[error("config file is unreadable: {0}")]
    ConfigUnreadable(String),

    /// The config file could not be written.
    #[error("failed to write config: {0}")]
    ConfigWriteFailed(String),

    /// A logical config edit was rejected (duplicate name, missing entry).
    #[error("Config error: {0}")]
    Config(String),

    /// A requested or referenced server does not exist.
    #[error("unknown server '{0}'")]
    UnknownServer(String),

    /// A requested toolbox does not exist.
    #[error("unknown toolbox '{0}'")]
    UnknownToolbox(String),

    /// The request resolved to no servers at all.
    #[error("request resolved to no servers")]
    EmptyResolution,

    /// A server process could not be started or never completed its handshake.
    #[error("failed to spawn server '{server}': {reason}")]
    SpawnFailed {
        /// Server name.
        server: String,
        /// Human-readable cause.
        reason: String,
    },

    /// The loopback port a server declares is already bound.
    #[error("port {port} required by server '{server}' is already in use")]
    PortInUse {
        /// Server name.
        server: String,
        /// The occupied port.
        port: u16,
    },

    /// An instance did not terminate within the stop grace period.
    #[error("instance {0} did not stop in time")]
    StopTimeout(String),

    /// No instance with the given id is known.
    #[error("instance {0} not found")]
    NotFound(String),

    /// A tool cannot be registered on an endpoint.
    #[error("tool '{tool}' is incompatible with the endpoint: {reason}")]
    SchemaIncompatible {
        /// Tool name.
        tool: String,
        /// Human-readable cause.
        reason: String,
    },

    /// A schema keyword has no representation in the target dialect.
    #[error("schema construct '{keyword}' at '{pointer}' has no {dialect} representation")]
    UnsupportedConstruct {
        /// The offending JSON Schema keyword.
        keyword: String,
        /// JSON pointer to the schema object holding the keyword.
        pointer: String,
        /// Name of the target dialect.
        dialect: String,
    },

    /// An advisory lock could not be acquired within the bounded wait.
    #[error("timed out waiting for lock on {0}")]
    LockTimeout(String),

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// A capability source failed while enumerating plugins or skills.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// A package or skill registry call failed.
    #[error("Registry error: {0}")]
    Registry(String),

    /// The MCP peer sent something the adapter could not understand.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl McpzError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout(_))
    }

    /// Shorthand for a [`McpzError::SpawnFailed`].
    pub fn spawn_failed(server: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            server: server.into(),
            reason: reason.into(),
        }
    }
}

/// A convenience `Result` alias using [`McpzError`].
pub type McpzResult<T> = Result<T, McpzError>;
