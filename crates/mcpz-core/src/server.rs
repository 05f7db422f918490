use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Where a server definition came from.
///
/// Serialized as `"builtin"` or `"plugin:<pluginId>"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ServerOrigin {
    /// Defined directly in the user's config.
    #[default]
    Builtin,
    /// Contributed by the plugin with the given id.
    Plugin(String),
}

impl ServerOrigin {
    /// Returns true for servers defined in the config itself.
    pub fn is_builtin(&self) -> bool {
        matches!(self, Self::Builtin)
    }

    /// The contributing plugin id, if any.
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::Builtin => None,
            Self::Plugin(id) => Some(id),
        }
    }
}

impl fmt::Display for ServerOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => f.write_str("builtin"),
            Self::Plugin(id) => write!(f, "plugin:{id}"),
        }
    }
}

impl From<ServerOrigin> for String {
    fn from(origin: ServerOrigin) -> Self {
        origin.to_string()
    }
}

impl TryFrom<String> for ServerOrigin {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "builtin" {
            return Ok(Self::Builtin);
        }
        match value.strip_prefix("plugin:") {
            Some(id) if !id.is_empty() => Ok(Self::Plugin(id.to_string())),
            _ => Err(format!(
                "invalid server origin '{value}', expected 'builtin' or 'plugin:<id>'"
            )),
        }
    }
}

/// A named MCP server launch definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Unique, stable key.
    pub name: String,
    /// Executable to launch.
    #[serde(default)]
    pub command: String,
    /// Command-line arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment-variable overrides.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Loopback port the server listens on, if any. Checked before spawn and
    /// exported to the process as `PORT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Where the definition came from.
    #[serde(default, skip_serializing_if = "ServerOrigin::is_builtin")]
    pub origin: ServerOrigin,
}

impl ServerSpec {
    /// Create a builtin server spec with no arguments or environment.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            port: None,
            origin: ServerOrigin::Builtin,
        }
    }

    /// Set the argument list.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add one environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the loopback port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the origin.
    pub fn with_origin(mut self, origin: ServerOrigin) -> Self {
        self.origin = origin;
        self
    }
}
