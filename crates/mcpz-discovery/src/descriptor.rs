use mcpz_config::PluginOrigin;
use mcpz_core::{McpzError, McpzResult, ServerOrigin, ServerSpec, ToolDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A plugin found by a capability source.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginDescriptor {
    /// Package or manifest name.
    pub id: String,
    /// Version from the manifest.
    pub version: String,
    /// Where the plugin was found.
    pub origin: PluginOrigin,
    /// Contributed servers, each with origin `plugin:<id>`.
    pub servers: Vec<ServerSpec>,
    /// Manifest the plugin was read from.
    pub path: PathBuf,
}

/// A skill found by a capability source.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillDescriptor {
    /// Skill name.
    pub id: String,
    /// Version from the manifest.
    pub version: String,
    /// One-line summary.
    pub description: String,
    /// Text returned when one of the skill's tools is called.
    pub instructions: String,
    /// Tools the skill contributes.
    pub tools: Vec<ToolDefinition>,
    /// Manifest the skill was read from.
    pub path: PathBuf,
}

/// `{name, version, mcpz: {servers: [...]}}`, either a standalone manifest
/// or a package's own `package.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    /// Package name, used as the plugin id.
    pub name: String,
    /// Package version.
    #[serde(default)]
    pub version: String,
    /// Absent for packages that are not mcpz plugins.
    pub mcpz: Option<PluginSection>,
}

/// The `mcpz` key of a plugin manifest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginSection {
    /// Servers the plugin contributes.
    #[serde(default)]
    pub servers: Vec<ManifestServer>,
}

/// One server entry of a plugin manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestServer {
    /// Server name.
    pub name: String,
    /// Executable to launch.
    pub command: String,
    /// Command-line arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment-variable overrides.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Loopback port the server listens on.
    #[serde(default)]
    pub port: Option<u16>,
}

/// A skill manifest, as stored in `skill.json` or the skill cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillManifest {
    /// Skill name, also accepted as `id`.
    #[serde(alias = "id")]
    pub name: String,
    /// Skill version.
    #[serde(default)]
    pub version: String,
    /// One-line summary.
    #[serde(default)]
    pub description: String,
    /// Text returned when a tool of the skill is called.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instructions: String,
    /// Tools the skill contributes.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

impl PluginManifest {
    /// Parse a manifest. `Ok(None)` means the JSON is a package without an
    /// `mcpz` section, which is not a plugin.
    pub fn parse(contents: &str) -> McpzResult<Option<Self>> {
        let manifest: Self = serde_json::from_str(contents)?;
        if manifest.mcpz.is_none() {
            return Ok(None);
        }
        if manifest.name.trim().is_empty() {
            return Err(McpzError::Discovery("plugin manifest has no name".into()));
        }
        Ok(Some(manifest))
    }

    /// Turn the manifest into a descriptor whose servers carry origin `plugin:<name>`.
    pub fn into_descriptor(self, origin: PluginOrigin, path: &Path) -> PluginDescriptor {
        let id = self.name;
        let servers = self
            .mcpz
            .unwrap_or_default()
            .servers
            .into_iter()
            .map(|s| ServerSpec {
                name: s.name,
                command: s.command,
                args: s.args,
                env: s.env,
                port: s.port,
                origin: ServerOrigin::Plugin(id.clone()),
            })
            .collect();
        PluginDescriptor {
            id,
            version: self.version,
            origin,
            servers,
            path: path.to_path_buf(),
        }
    }
}

impl SkillManifest {
    /// Parse a skill manifest from JSON.
    pub fn parse(contents: &str) -> McpzResult<Self> {
        let manifest: Self = serde_json::from_str(contents)?;
        if manifest.name.trim().is_empty() {
            return Err(McpzError::Discovery("skill manifest has no name".into()));
        }
        Ok(manifest)
    }

    /// Turn the manifest into a descriptor read from `path`.
    pub fn into_descriptor(self, path: &Path) -> SkillDescriptor {
        SkillDescriptor {
            id: self.name,
            version: self.version,
            description: self.description,
            instructions: self.instructions,
            tools: self.tools,
            path: path.to_path_buf(),
        }
    }
}
