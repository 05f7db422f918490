use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A tool as advertised over MCP (`tools/list`) or contributed by a skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name, unique per server.
    pub name: String,
    /// Display title (newer dialect only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool arguments.
    #[serde(default = "default_input_schema")]
    pub input_schema: serde_json::Value,
    /// JSON Schema for structured results (newer dialect only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    /// Behavioural hints (newer dialect only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<serde_json::Value>,
}

fn default_input_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolDefinition {
    /// Create a tool with an empty object input schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: description.into(),
            input_schema: default_input_schema(),
            output_schema: None,
            annotations: None,
        }
    }

    /// Replace the input schema.
    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Set the output schema.
    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// Allow-list of tool names applied per server once it reports its tools.
///
/// An entry matches either a bare tool name or `server/tool`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolFilter {
    names: BTreeSet<String>,
}

impl ToolFilter {
    /// Build a filter from tool names. Blank entries are ignored.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names
                .into_iter()
                .map(Into::into)
                .map(|n: String| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    /// Whether the tool `tool` of `server` may be advertised.
    pub fn allows(&self, server: &str, tool: &str) -> bool {
        self.names.contains(tool) || self.names.contains(&format!("{server}/{tool}"))
    }

    /// Returns true when the filter names no tools.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The configured entries, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}
