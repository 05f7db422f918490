use mcpz_core::{McpzError, McpzResult, ServerSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema version written by this build.
pub const CURRENT_CONFIG_VERSION: u32 = 3;

/// How a plugin was installed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginOrigin {
    /// Installed globally through npm.
    #[default]
    Npm,
    /// Read from a manifest in the local plugins directory.
    Local,
}

/// Persisted state of an installed plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRecord {
    /// Disabled plugins keep their record but contribute no servers.
    pub enabled: bool,
    /// Installed version.
    #[serde(default)]
    pub version: String,
    /// Where the plugin was found.
    #[serde(default)]
    pub origin: PluginOrigin,
    /// Names of the servers the plugin contributes.
    #[serde(default)]
    pub servers: Vec<String>,
}

/// Persisted state of an installed skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillRecord {
    /// Disabled skills keep their record but contribute no tools.
    pub enabled: bool,
    /// Installed version.
    #[serde(default)]
    pub version: String,
    /// Names of the tools the skill contributes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
}

/// The root config aggregate. Only ever read and written as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    /// Schema version; always the current one after loading.
    pub config_version: u32,
    /// Builtin servers, in the order they were added.
    #[serde(default)]
    pub servers: Vec<ServerSpec>,
    /// Toolbox name to ordered member server names.
    #[serde(default)]
    pub toolboxes: BTreeMap<String, Vec<String>>,
    /// Plugin id to plugin state.
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginRecord>,
    /// Skill id to skill state.
    #[serde(default)]
    pub skills: BTreeMap<String, SkillRecord>,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            config_version: CURRENT_CONFIG_VERSION,
            servers: Vec::new(),
            toolboxes: BTreeMap::new(),
            plugins: BTreeMap::new(),
            skills: BTreeMap::new(),
        }
    }
}

impl ConfigDocument {
    /// Parse a raw JSON document of any supported version: migrate it forward,
    /// deserialize it and validate it.
    pub fn from_value(raw: &serde_json::Value) -> McpzResult<Self> {
        let migrated = crate::migrate::migrate(raw)?;
        let doc: Self = serde_json::from_value(migrated)
            .map_err(|e| McpzError::ConfigCorrupt(format!("schema mismatch: {e}")))?;
        crate::validate::validate(&doc)?;
        Ok(doc)
    }

    /// Look up a builtin server by name.
    pub fn server(&self, name: &str) -> Option<&ServerSpec> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Members of a toolbox, in order.
    pub fn toolbox(&self, name: &str) -> Option<&[String]> {
        self.toolboxes.get(name).map(Vec::as_slice)
    }

    /// Add a builtin server. Fails if the name is taken.
    pub fn add_server(&mut self, spec: ServerSpec) -> McpzResult<()> {
        if spec.name.trim().is_empty() {
            return Err(McpzError::Config("server name must not be empty".into()));
        }
        if self.server(&spec.name).is_some() {
            return Err(McpzError::Config(format!(
                "server '{}' already exists",
                spec.name
            )));
        }
        self.servers.push(spec);
        Ok(())
    }

    /// Remove a builtin server. Returns the toolboxes that still reference it;
    /// those toolboxes fail to expand until the member is removed or re-added.
    pub fn remove_server(&mut self, name: &str) -> McpzResult<Vec<String>> {
        let before = self.servers.len();
        self.servers.retain(|s| s.name != name);
        if self.servers.len() == before {
            return Err(McpzError::UnknownServer(name.to_string()));
        }
        Ok(self
            .toolboxes
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m == name))
            .map(|(toolbox, _)| toolbox.clone())
            .collect())
    }

    /// Create a toolbox. Members need not exist yet.
    pub fn create_toolbox(&mut self, name: &str, members: Vec<String>) -> McpzResult<()> {
        if name.trim().is_empty() {
            return Err(McpzError::Config("toolbox name must not be empty".into()));
        }
        if self.toolboxes.contains_key(name) {
            return Err(McpzError::Config(format!("toolbox '{name}' already exists")));
        }
        let mut unique = Vec::with_capacity(members.len());
        for member in members {
            if !unique.contains(&member) {
                unique.push(member);
            }
        }
        self.toolboxes.insert(name.to_string(), unique);
        Ok(())
    }

    /// Delete a toolbox. Its member servers are untouched.
    pub fn delete_toolbox(&mut self, name: &str) -> McpzResult<()> {
        self.toolboxes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| McpzError::UnknownToolbox(name.to_string()))
    }

    /// Append a member to a toolbox. Adding an existing member is a no-op.
    pub fn add_to_toolbox(&mut self, toolbox: &str, server: &str) -> McpzResult<()> {
        let members = self
            .toolboxes
            .get_mut(toolbox)
            .ok_or_else(|| McpzError::UnknownToolbox(toolbox.to_string()))?;
        if !members.iter().any(|m| m == server) {
            members.push(server.to_string());
        }
        Ok(())
    }

    /// Remove a member from a toolbox.
    pub fn remove_from_toolbox(&mut self, toolbox: &str, server: &str) -> McpzResult<()> {
        let members = self
            .toolboxes
            .get_mut(toolbox)
            .ok_or_else(|| McpzError::UnknownToolbox(toolbox.to_string()))?;
        let before = members.len();
        members.retain(|m| m != server);
        if members.len() == before {
            return Err(McpzError::UnknownServer(server.to_string()));
        }
        Ok(())
    }

    /// Enable or disable an installed plugin.
    pub fn set_plugin_enabled(&mut self, id: &str, enabled: bool) -> McpzResult<()> {
        let record = self
            .plugins
            .get_mut(id)
            .ok_or_else(|| McpzError::Config(format!("plugin '{id}' is not installed")))?;
        record.enabled = enabled;
        Ok(())
    }

    /// Enable or disable an installed skill.
    pub fn set_skill_enabled(&mut self, id: &str, enabled: bool) -> McpzResult<()> {
        let record = self
            .skills
            .get_mut(id)
            .ok_or_else(|| McpzError::Config(format!("skill '{id}' is not installed")))?;
        record.enabled = enabled;
        Ok(())
    }
}
