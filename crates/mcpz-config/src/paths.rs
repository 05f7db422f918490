use mcpz_core::{McpzError, McpzResult};
use std::path::{Path, PathBuf};

/// Environment variable overriding the mcpz home directory.
pub const HOME_ENV: &str = "MCPZ_HOME";

/// Well-known locations under the mcpz home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpzHome {
    root: PathBuf,
}

impl McpzHome {
    /// Use an explicit root directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$MCPZ_HOME` if set, else `~/.mcpz`.
    pub fn from_env() -> McpzResult<Self> {
        if let Ok(custom) = std::env::var(HOME_ENV) {
            if !custom.trim().is_empty() {
                return Ok(Self::new(custom));
            }
        }
        let home = dirs::home_dir()
            .ok_or_else(|| McpzError::ConfigUnreadable("home directory not found".into()))?;
        Ok(Self::new(home.join(".mcpz")))
    }

    /// The data directory itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The config document.
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// The instance registry, kept apart from the config document.
    pub fn registry_path(&self) -> PathBuf {
        self.root.join("instances.json")
    }

    /// Local plugin manifests (developer overrides).
    pub fn plugins_dir(&self) -> PathBuf {
        self.root.join("plugins")
    }

    /// Local skill manifests (developer overrides).
    pub fn skills_dir(&self) -> PathBuf {
        self.root.join("skills")
    }

    /// Skills installed from the skills registry, indexed by `index.json`.
    pub fn skill_cache_dir(&self) -> PathBuf {
        self.root.join("skill-cache")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let home = McpzHome::new("/srv/mcpz");
        assert_eq!(home.config_path(), PathBuf::from("/srv/mcpz/config.json"));
        assert_eq!(home.registry_path(), PathBuf::from("/srv/mcpz/instances.json"));
        assert_eq!(home.plugins_dir(), PathBuf::from("/srv/mcpz/plugins"));
        assert_eq!(home.skill_cache_dir(), PathBuf::from("/srv/mcpz/skill-cache"));
    }
}
