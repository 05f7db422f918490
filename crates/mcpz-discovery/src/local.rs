use crate::descriptor::{PluginDescriptor, SkillDescriptor};
use crate::source::{is_json, list_dir, read_plugin, read_skill, CapabilitySource};
use async_trait::async_trait;
use mcpz_config::{McpzHome, PluginOrigin};
use mcpz_core::McpzResult;
use std::path::PathBuf;
use tracing::info;

/// Plugins and skills kept in local directories, for development and
/// overrides.
///
/// - `plugins/<name>.json` or `plugins/<name>/package.json`
/// - `skills/<name>.json` or `skills/<name>/skill.json`
#[derive(Debug, Clone)]
pub struct LocalDirectorySource {
    plugins_dir: PathBuf,
    skills_dir: PathBuf,
}

impl LocalDirectorySource {
    /// Scan `plugins_dir` for plugin manifests and `skills_dir` for skill manifests.
    pub fn new(plugins_dir: impl Into<PathBuf>, skills_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            skills_dir: skills_dir.into(),
        }
    }

    /// The `plugins/` and `skills/` directories of a data directory.
    pub fn for_home(home: &McpzHome) -> Self {
        Self::new(home.plugins_dir(), home.skills_dir())
    }
}

#[async_trait]
impl CapabilitySource for LocalDirectorySource {
    fn name(&self) -> &str {
        "local"
    }

    async fn discover_plugins(&self) -> McpzResult<Vec<PluginDescriptor>> {
        let mut found = Vec::new();
        for path in list_dir(&self.plugins_dir).await? {
            let manifest = if path.is_dir() {
                path.join("package.json")
            } else if is_json(&path) {
                path
            } else {
                continue;
            };
            if let Some(plugin) = read_plugin(&manifest, PluginOrigin::Local).await {
                found.push(plugin);
            }
        }
        info!(dir = %self.plugins_dir.display(), plugins = found.len(), "Local plugins discovered");
        Ok(found)
    }

    async fn discover_skills(&self) -> McpzResult<Vec<SkillDescriptor>> {
        let mut found = Vec::new();
        for path in list_dir(&self.skills_dir).await? {
            let manifest = if path.is_dir() {
                path.join("skill.json")
            } else if is_json(&path) {
                path
            } else {
                continue;
            };
            if let Some(skill) = read_skill(&manifest).await {
                found.push(skill);
            }
        }
        info!(dir = %self.skills_dir.display(), skills = found.len(), "Local skills discovered");
        Ok(found)
    }
}
