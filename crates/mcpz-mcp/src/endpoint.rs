use crate::dialect::{translate_schema, Dialect};
use crate::protocol::{InitializeResult, McpToolResult, ServerCapabilities, ServerInfo};
use async_trait::async_trait;
use mcpz_core::{McpzError, McpzResult, ToolDefinition};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Something that can execute a tool on behalf of the endpoint: a running
/// server instance, or a skill.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Run `tool` (the name the backend itself advertised) with `arguments`.
    async fn call_tool(&self, tool: &str, arguments: serde_json::Value)
        -> McpzResult<McpToolResult>;
}

/// Where an exposed tool name is dispatched to.
#[derive(Clone)]
pub struct ToolRoute {
    /// Handler that executes the call.
    pub backend: Arc<dyn ToolBackend>,
    /// The tool's name on the backend.
    pub tool: String,
}

impl fmt::Debug for ToolRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRoute").field("tool", &self.tool).finish()
    }
}

/// A tool as the endpoint exposes it.
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    /// Server or skill that contributed the tool.
    pub source: String,
    /// Definition rewritten for the endpoint's dialect, under the exposed name.
    pub definition: ToolDefinition,
    /// Where calls to the tool go.
    pub route: ToolRoute,
}

/// The composed MCP surface presented to the outside world.
///
/// Tools from every backend are registered in order; the first registration
/// of a name keeps it and later ones are exposed as `<source>__<tool>`.
#[derive(Debug)]
pub struct Endpoint {
    name: String,
    dialect: Dialect,
    tools: Vec<RegisteredTool>,
    by_name: HashMap<String, usize>,
}

impl Endpoint {
    /// Create an endpoint speaking the given protocol version.
    pub fn new(name: impl Into<String>, protocol_version: &str) -> McpzResult<Self> {
        let dialect = Dialect::from_protocol_version(protocol_version).ok_or_else(|| {
            McpzError::Protocol(format!("unsupported protocol version '{protocol_version}'"))
        })?;
        Ok(Self::with_dialect(name, dialect))
    }

    /// An endpoint speaking `dialect`.
    pub fn with_dialect(name: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            name: name.into(),
            dialect,
            tools: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Name reported in `serverInfo`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dialect the endpoint advertises its tools in.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Register a tool advertised by `source` in `from` dialect.
    ///
    /// Returns the name the tool is exposed under.
    pub fn register_tool(
        &mut self,
        source: &str,
        def: ToolDefinition,
        from: Dialect,
        backend: Arc<dyn ToolBackend>,
    ) -> McpzResult<String> {
        let incompatible = |reason: String| McpzError::SchemaIncompatible {
            tool: def.name.clone(),
            reason,
        };

        if !is_object_schema(&def.input_schema) {
            return Err(incompatible("input schema must be an object schema".into()));
        }
        let input_schema = translate_schema(&def.input_schema, from, self.dialect)
            .map_err(|e| incompatible(e.to_string()))?;

        let output_schema = match &def.output_schema {
            Some(_) if !self.dialect.supports_output_schema() => {
                return Err(incompatible(format!(
                    "output schemas are not representable in the {} dialect",
                    self.dialect
                )));
            }
            Some(schema) => Some(
                translate_schema(schema, from, self.dialect)
                    .map_err(|e| incompatible(e.to_string()))?,
            ),
            None => None,
        };

        let (title, annotations) = match self.dialect {
            Dialect::Current => (def.title.clone(), def.annotations.clone()),
            Dialect::Legacy => {
                if def.title.is_some() || def.annotations.is_some() {
                    debug!(tool = %def.name, "Dropping title/annotations for legacy endpoint");
                }
                (None, None)
            }
        };

        let exposed = if self.by_name.contains_key(&def.name) {
            let qualified = format!("{source}__{}", def.name);
            if self.by_name.contains_key(&qualified) {
                return Err(incompatible(format!(
                    "name '{qualified}' is already registered"
                )));
            }
            warn!(tool = %def.name, source, exposed = %qualified, "Tool name collision");
            qualified
        } else {
            def.name.clone()
        };

        let definition = ToolDefinition {
            name: exposed.clone(),
            title,
            description: def.description.clone(),
            input_schema,
            output_schema,
            annotations,
        };
        self.by_name.insert(exposed.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            source: source.to_string(),
            definition,
            route: ToolRoute {
                backend,
                tool: def.name,
            },
        });
        debug!(endpoint = %self.name, tool = %exposed, source, "Tool registered");
        Ok(exposed)
    }

    /// The tools as advertised by `tools/list`, in registration order.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    /// Registered tools, in registration order.
    pub fn registered(&self) -> &[RegisteredTool] {
        &self.tools
    }

    /// Number of registered tools.
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Dispatch a `tools/call` to the backend owning `name`.
    ///
    /// Backend failures become error results rather than protocol errors.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> McpzResult<McpToolResult> {
        let tool = self
            .by_name
            .get(name)
            .and_then(|&i| self.tools.get(i))
            .ok_or_else(|| McpzError::Protocol(format!("unknown tool '{name}'")))?;

        match tool.route.backend.call_tool(&tool.route.tool, arguments).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(tool = %name, source = %tool.source, error = %e, "Tool call failed");
                Ok(McpToolResult::text(e.to_string(), true))
            }
        }
    }

    /// The `initialize` result this endpoint answers with.
    pub fn initialize_result(&self) -> InitializeResult {
        info!(endpoint = %self.name, tools = self.tools.len(), "Endpoint initialized");
        InitializeResult {
            protocol_version: self.dialect.protocol_version().to_string(),
            capabilities: ServerCapabilities {
                tools: Some(serde_json::json!({})),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: self.name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            }),
        }
    }
}

fn is_object_schema(schema: &serde_json::Value) -> bool {
    match schema.as_object() {
        Some(map) => !matches!(map.get("type"), Some(t) if t != "object"),
        None => false,
    }
}
