use crate::instance::InstanceRecord;
use crate::process::ServerProcess;
use crate::resolver::SkillTool;
use async_trait::async_trait;
use mcpz_core::{McpzError, McpzResult, ToolDefinition, ToolFilter};
use mcpz_mcp::{Dialect, Endpoint, McpToolResult, ToolBackend};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A server that completed its handshake.
#[derive(Clone)]
pub struct RunningInstance {
    /// The record as of the end of launch.
    pub record: InstanceRecord,
    /// The live process.
    pub process: Arc<dyn ServerProcess>,
    /// Dialect the server's tools are written in.
    pub dialect: Dialect,
    /// Tools the server reported at handshake.
    pub tools: Vec<ToolDefinition>,
}

impl fmt::Debug for RunningInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningInstance")
            .field("record", &self.record)
            .field("dialect", &self.dialect)
            .field("tools", &self.tools.len())
            .finish()
    }
}

/// A server of the plan that did not reach `running`.
#[derive(Debug)]
pub struct LaunchFailure {
    /// Name of the server that failed.
    pub server: String,
    /// Why it failed.
    pub error: McpzError,
}

/// Result of a launch: every server that came up, and every one that did
/// not. Instances are in plan order.
#[derive(Debug, Default)]
pub struct RunHandle {
    /// Instances that reached `running`, in plan order.
    pub instances: Vec<RunningInstance>,
    /// Servers that did not, in plan order.
    pub failures: Vec<LaunchFailure>,
}

impl RunHandle {
    /// True when some, but not all, servers failed.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty() && !self.instances.is_empty()
    }

    /// Ids of the running instances.
    pub fn instance_ids(&self) -> Vec<String> {
        self.instances.iter().map(|i| i.record.id.clone()).collect()
    }

    /// Compose the tools of every running instance and every skill into one
    /// endpoint, narrowed by `filter`.
    ///
    /// Tools the endpoint cannot represent are logged and left out rather
    /// than failing the whole run.
    pub fn build_endpoint(
        &self,
        name: &str,
        dialect: Dialect,
        filter: Option<&ToolFilter>,
        skill_tools: &[SkillTool],
    ) -> Endpoint {
        let mut endpoint = Endpoint::with_dialect(name, dialect);
        let allowed = |source: &str, tool: &str| filter.map_or(true, |f| f.allows(source, tool));

        for instance in &self.instances {
            let server = instance.record.server_name.as_str();
            let backend: Arc<dyn ToolBackend> = Arc::new(InstanceBackend {
                server: server.to_string(),
                process: Arc::clone(&instance.process),
            });
            for tool in &instance.tools {
                if !allowed(server, &tool.name) {
                    debug!(server, tool = %tool.name, "Tool filtered out");
                    continue;
                }
                if let Err(e) = endpoint.register_tool(
                    server,
                    tool.clone(),
                    instance.dialect,
                    Arc::clone(&backend),
                ) {
                    warn!(server, tool = %tool.name, error = %e, "Skipping tool");
                }
            }
        }

        for skill_tool in skill_tools {
            let skill = skill_tool.skill.as_str();
            if !allowed(skill, &skill_tool.definition.name) {
                debug!(skill, tool = %skill_tool.definition.name, "Tool filtered out");
                continue;
            }
            let backend = Arc::new(SkillBackend {
                instructions: skill_tool.instructions.clone(),
            });
            if let Err(e) = endpoint.register_tool(
                skill,
                skill_tool.definition.clone(),
                Dialect::Current,
                backend,
            ) {
                warn!(skill, tool = %skill_tool.definition.name, error = %e, "Skipping skill tool");
            }
        }

        info!(
            endpoint = %name,
            dialect = %dialect,
            instances = self.instances.len(),
            tools = endpoint.tool_count(),
            "Endpoint composed"
        );
        endpoint
    }
}

/// Routes calls to a running server process.
struct InstanceBackend {
    server: String,
    process: Arc<dyn ServerProcess>,
}

#[async_trait]
impl ToolBackend for InstanceBackend {
    async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> McpzResult<McpToolResult> {
        debug!(server = %self.server, tool, "Forwarding tool call");
        self.process.call_tool(tool, arguments).await
    }
}

/// Answers every call with the skill's instructions.
struct SkillBackend {
    instructions: String,
}

#[async_trait]
impl ToolBackend for SkillBackend {
    async fn call_tool(
        &self,
        _tool: &str,
        _arguments: serde_json::Value,
    ) -> McpzResult<McpToolResult> {
        Ok(McpToolResult::text(self.instructions.clone(), false))
    }
}
