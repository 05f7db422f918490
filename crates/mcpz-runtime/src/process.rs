//! Seams between the instance manager and the operating system.
//!
//! [`ProcessSpawner`] and [`ServerProcess`] cover processes this controller
//! starts and talks to; [`ProcessTable`] covers inspecting and killing
//! processes by pid, including ones started by an earlier controller.

use crate::instance::InstanceRecord;
use async_trait::async_trait;
use mcpz_core::{McpzError, McpzResult, ServerSpec, ToolDefinition};
use mcpz_mcp::{Dialect, McpClient, McpToolResult};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, warn};

/// Environment variable carrying a server's declared port.
pub const PORT_ENV: &str = "PORT";

/// Whether the process behind a record still exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The recorded process is running.
    Alive,
    /// The recorded process is verifiably gone (or its pid was reused).
    Gone,
    /// Could not be confirmed either way.
    Unknown,
}

/// What a server reports during its handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct Handshake {
    /// Negotiated protocol version.
    pub protocol_version: String,
    /// Tools reported by `tools/list`.
    pub tools: Vec<ToolDefinition>,
}

impl Handshake {
    /// Schema dialect of the reported tools. Versions newer than any known
    /// one are read with the current vocabulary.
    pub fn dialect(&self) -> Dialect {
        Dialect::from_protocol_version(&self.protocol_version).unwrap_or_else(|| {
            warn!(version = %self.protocol_version, "Unknown protocol version, assuming current dialect");
            Dialect::Current
        })
    }
}

/// A started server process this controller can talk to.
#[async_trait]
pub trait ServerProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Protocol handshake followed by tool listing.
    async fn handshake(&self) -> McpzResult<Handshake>;

    async fn health_check(&self) -> McpzResult<()>;

    async fn call_tool(&self, tool: &str, arguments: serde_json::Value)
        -> McpzResult<McpToolResult>;

    /// Non-blocking check for process exit.
    async fn try_exited(&self) -> McpzResult<bool>;

    /// Ask the process to stop, killing it after `grace`. Returns true when
    /// it exited on its own.
    async fn shutdown(&self, grace: Duration) -> McpzResult<bool>;
}

/// Starts server processes.
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn spawn(&self, spec: &ServerSpec) -> McpzResult<Arc<dyn ServerProcess>>;
}

/// Pid-level view of the OS process table.
pub trait ProcessTable: Send + Sync {
    /// Whether the process `record` describes is still the one running
    /// under its pid.
    fn liveness(&self, record: &InstanceRecord) -> Liveness;

    /// Whether any process currently runs under `pid`.
    fn pid_exists(&self, pid: u32) -> bool;

    /// Kill `pid`. Returns false when no such process exists.
    fn kill(&self, pid: u32) -> McpzResult<bool>;
}

// --- stdio implementation ---

/// Spawns servers as child processes speaking MCP over stdio.
#[derive(Debug, Clone, Default)]
pub struct StdioSpawner {
    request_timeout: Option<Duration>,
}

impl StdioSpawner {
    /// A spawner with the default request timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every request to the spawned servers by `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl ProcessSpawner for StdioSpawner {
    async fn spawn(&self, spec: &ServerSpec) -> McpzResult<Arc<dyn ServerProcess>> {
        if spec.command.trim().is_empty() {
            return Err(McpzError::spawn_failed(&spec.name, "empty command"));
        }
        let mut env = spec.env.clone();
        if let Some(port) = spec.port {
            env.insert(PORT_ENV.to_string(), port.to_string());
        }
        let mut client = McpClient::spawn(&spec.name, &spec.command, &spec.args, &env)?;
        if let Some(timeout) = self.request_timeout {
            client = client.with_request_timeout(timeout);
        }
        Ok(Arc::new(StdioProcess { client }))
    }
}

struct StdioProcess {
    client: McpClient,
}

#[async_trait]
impl ServerProcess for StdioProcess {
    fn pid(&self) -> Option<u32> {
        self.client.pid()
    }

    async fn handshake(&self) -> McpzResult<Handshake> {
        let init = self.client.initialize().await?;
        let tools = self.client.list_tools().await?;
        Ok(Handshake {
            protocol_version: init.protocol_version,
            tools,
        })
    }

    async fn health_check(&self) -> McpzResult<()> {
        self.client.health_check().await
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> McpzResult<McpToolResult> {
        self.client.call_tool(tool, arguments).await
    }

    async fn try_exited(&self) -> McpzResult<bool> {
        Ok(self.client.try_wait().await?.is_some())
    }

    async fn shutdown(&self, grace: Duration) -> McpzResult<bool> {
        self.client.shutdown(grace).await
    }
}

// --- sysinfo implementation ---

/// Process table backed by `sysinfo`.
///
/// A recorded pid is trusted only when the live process was started by the
/// recorded owner or started when the record says it did.
#[derive(Debug, Clone)]
pub struct SystemProcessTable {
    start_tolerance: Duration,
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self {
            // start times have one-second resolution
            start_tolerance: Duration::from_secs(2),
        }
    }
}

impl SystemProcessTable {
    /// A table with a two second start-time tolerance.
    pub fn new() -> Self {
        Self::default()
    }

    /// How far a process start may lag the recorded start and still match.
    pub fn with_start_tolerance(mut self, tolerance: Duration) -> Self {
        self.start_tolerance = tolerance;
        self
    }

    fn snapshot(pid: Pid) -> System {
        let mut sys = System::new();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        sys
    }
}

impl ProcessTable for SystemProcessTable {
    fn liveness(&self, record: &InstanceRecord) -> Liveness {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Liveness::Unknown;
        }
        let Some(pid) = record.pid else {
            return Liveness::Unknown;
        };
        let pid = Pid::from_u32(pid);
        let sys = Self::snapshot(pid);
        let Some(process) = sys.process(pid) else {
            return Liveness::Gone;
        };

        let recorded = u64::try_from(record.started_at.timestamp()).unwrap_or(0);
        let actual = process.start_time();
        let tolerance = self.start_tolerance.as_secs();

        if actual > recorded + tolerance {
            debug!(instance = %record.id, pid = %pid, "Pid reused by a newer process");
            return Liveness::Gone;
        }
        let owned = process.parent() == Some(Pid::from_u32(record.owner_pid));
        if owned || recorded.abs_diff(actual) <= tolerance {
            Liveness::Alive
        } else {
            Liveness::Unknown
        }
    }

    fn pid_exists(&self, pid: u32) -> bool {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return true;
        }
        let pid = Pid::from_u32(pid);
        Self::snapshot(pid).process(pid).is_some()
    }

    fn kill(&self, pid: u32) -> McpzResult<bool> {
        let pid = Pid::from_u32(pid);
        let sys = Self::snapshot(pid);
        match sys.process(pid) {
            Some(process) => {
                debug!(pid = %pid, "Killing process");
                Ok(process.kill())
            }
            None => Ok(false),
        }
    }
}
