use crate::cache::SkillCache;
use crate::descriptor::{PluginDescriptor, SkillDescriptor};
use crate::source::{list_dir, read_plugin, CapabilitySource};
use async_trait::async_trait;
use mcpz_config::PluginOrigin;
use mcpz_core::{McpzError, McpzResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Plugins installed as global npm packages, and skills installed from the
/// skills registry into the local cache.
///
/// A global package is a plugin when its `package.json` has an `mcpz` key.
#[derive(Debug, Clone)]
pub struct NpmGlobalSource {
    node_modules: PathBuf,
    skill_cache: SkillCache,
}

impl NpmGlobalSource {
    /// Scan `node_modules` for plugins and `skill_cache` for skills.
    pub fn new(node_modules: impl Into<PathBuf>, skill_cache: SkillCache) -> Self {
        Self {
            node_modules: node_modules.into(),
            skill_cache,
        }
    }

    /// Ask `npm root -g` where global packages live.
    pub async fn locate(skill_cache: SkillCache) -> McpzResult<Self> {
        let output = tokio::process::Command::new("npm")
            .args(["root", "-g"])
            .output()
            .await
            .map_err(|e| McpzError::Discovery(format!("failed to run npm: {e}")))?;
        if !output.status.success() {
            return Err(McpzError::Discovery(format!(
                "npm root -g exited with {}",
                output.status
            )));
        }
        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(root = %root, "Global node_modules located");
        Ok(Self::new(root, skill_cache))
    }

    /// The scanned `node_modules` directory.
    pub fn node_modules(&self) -> &Path {
        &self.node_modules
    }

    /// Package directories, descending one level into `@scope/` directories.
    async fn package_dirs(&self) -> McpzResult<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for path in list_dir(&self.node_modules).await? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || !path.is_dir() {
                continue;
            }
            if name.starts_with('@') {
                dirs.extend(list_dir(&path).await?.into_iter().filter(|p| p.is_dir()));
            } else {
                dirs.push(path);
            }
        }
        Ok(dirs)
    }
}

#[async_trait]
impl CapabilitySource for NpmGlobalSource {
    fn name(&self) -> &str {
        "npm"
    }

    async fn discover_plugins(&self) -> McpzResult<Vec<PluginDescriptor>> {
        let mut found = Vec::new();
        for dir in self.package_dirs().await? {
            if let Some(plugin) = read_plugin(&dir.join("package.json"), PluginOrigin::Npm).await {
                found.push(plugin);
            }
        }
        info!(root = %self.node_modules.display(), plugins = found.len(), "npm plugins discovered");
        Ok(found)
    }

    async fn discover_skills(&self) -> McpzResult<Vec<SkillDescriptor>> {
        let index_path = self.skill_cache.index_path();
        let skills: Vec<_> = self
            .skill_cache
            .load()
            .await?
            .into_values()
            .map(|manifest| manifest.into_descriptor(&index_path))
            .collect();
        info!(skills = skills.len(), "Cached registry skills discovered");
        Ok(skills)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::descriptor::SkillManifest;

    fn write_package(root: &Path, dir: &str, json: &str) {
        let path = root.join(dir);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("package.json"), json).unwrap();
    }

    #[tokio::test]
    async fn test_scans_scoped_packages_and_ignores_plain_ones() {
        let dir = tempfile::tempdir().unwrap();
        let nm = dir.path().join("node_modules");
        write_package(
            &nm,
            "@acme/mcpz-git",
            r#"{"name":"@acme/mcpz-git","version":"1.0.0","mcpz":{"servers":[{"name":"git","command":"node","args":["git.js"]}]}}"#,
        );
        write_package(&nm, "typescript", r#"{"name":"typescript","version":"5.0.0"}"#);
        write_package(
            &nm,
            "mcpz-web",
            r#"{"name":"mcpz-web","version":"0.3.0","mcpz":{"servers":[]}}"#,
        );
        std::fs::create_dir_all(nm.join(".bin")).unwrap();

        let source = NpmGlobalSource::new(&nm, SkillCache::new(dir.path().join("cache")));
        let plugins = source.discover_plugins().await.unwrap();
        let ids: Vec<_> = plugins.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["@acme/mcpz-git", "mcpz-web"]);
        assert_eq!(plugins[0].servers[0].name, "git");
        assert_eq!(plugins[0].origin, PluginOrigin::Npm);
    }

    #[tokio::test]
    async fn test_skills_come_from_cache_index() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SkillCache::new(dir.path().join("cache"));
        cache
            .insert(SkillManifest {
                name: "summarize".into(),
                version: "0.2.0".into(),
                description: "Summarize".into(),
                instructions: String::new(),
                tools: Vec::new(),
            })
            .await
            .unwrap();

        let source = NpmGlobalSource::new(dir.path().join("none"), cache);
        let skills = source.discover_skills().await.unwrap();
        assert_eq!(skills[0].id, "summarize");
        assert_eq!(skills[0].version, "0.2.0");
        assert!(source.discover_plugins().await.unwrap().is_empty());
    }
}
