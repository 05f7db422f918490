use crate::cache::SkillCache;
use crate::descriptor::SkillManifest;
use crate::registry::{PackageInfo, RegistryClient};
use async_trait::async_trait;
use mcpz_core::{McpzError, McpzResult};
use std::sync::Arc;
use tracing::info;

/// Installs and removes global packages.
#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn install(&self, package: &str, version: &str) -> McpzResult<()>;

    async fn uninstall(&self, package: &str) -> McpzResult<()>;
}

/// [`PackageManager`] that shells out to `npm`.
#[derive(Debug, Clone, Default)]
pub struct NpmPackageManager;

impl NpmPackageManager {
    async fn npm(args: &[&str]) -> McpzResult<()> {
        let output = tokio::process::Command::new("npm")
            .args(args)
            .output()
            .await
            .map_err(|e| McpzError::Registry(format!("failed to run npm: {e}")))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(McpzError::Registry(format!(
                "npm {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl PackageManager for NpmPackageManager {
    async fn install(&self, package: &str, version: &str) -> McpzResult<()> {
        Self::npm(&["install", "-g", &format!("{package}@{version}")]).await
    }

    async fn uninstall(&self, package: &str) -> McpzResult<()> {
        Self::npm(&["uninstall", "-g", package]).await
    }
}

/// Installs plugins through the package manager and skills into the cache.
///
/// The installer only changes what is on disk; records in the config
/// document are created by the next discovery pass.
pub struct Installer {
    registry: Arc<dyn RegistryClient>,
    packages: Arc<dyn PackageManager>,
    skills: SkillCache,
}

impl Installer {
    /// An installer over the given registry, package manager and skill cache.
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        packages: Arc<dyn PackageManager>,
        skills: SkillCache,
    ) -> Self {
        Self {
            registry,
            packages,
            skills,
        }
    }

    /// Resolve the latest version of `id` and install it globally.
    pub async fn install_plugin(&self, id: &str) -> McpzResult<PackageInfo> {
        let info = self.registry.package_info(id).await?;
        self.packages.install(&info.name, &info.version).await?;
        info!(plugin = %info.name, version = %info.version, "Plugin installed");
        Ok(info)
    }

    /// Uninstall a plugin package.
    pub async fn uninstall_plugin(&self, id: &str) -> McpzResult<()> {
        self.packages.uninstall(id).await?;
        info!(plugin = %id, "Plugin uninstalled");
        Ok(())
    }

    /// Fetch a skill manifest and store it in the cache.
    pub async fn install_skill(&self, id: &str) -> McpzResult<SkillManifest> {
        let manifest = self.registry.skill_info(id).await?;
        if manifest.name != id {
            return Err(McpzError::Registry(format!(
                "registry returned skill '{}' for '{id}'",
                manifest.name
            )));
        }
        self.skills.insert(manifest.clone()).await?;
        Ok(manifest)
    }

    /// Remove a fetched skill from the cache.
    pub async fn uninstall_skill(&self, id: &str) -> McpzResult<()> {
        if !self.skills.remove(id).await? {
            return Err(McpzError::Discovery(format!("skill '{id}' is not installed")));
        }
        info!(skill = %id, "Skill uninstalled");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct FakeRegistry;

    #[async_trait]
    impl RegistryClient for FakeRegistry {
        async fn package_info(&self, id: &str) -> McpzResult<PackageInfo> {
            if id == "missing" {
                return Err(McpzError::Registry("404".into()));
            }
            Ok(PackageInfo {
                name: id.into(),
                version: "3.1.0".into(),
                description: String::new(),
            })
        }

        async fn skill_info(&self, id: &str) -> McpzResult<SkillManifest> {
            Ok(SkillManifest {
                name: id.into(),
                version: "1.0.0".into(),
                description: "fetched".into(),
                instructions: String::new(),
                tools: Vec::new(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingPackages {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PackageManager for RecordingPackages {
        async fn install(&self, package: &str, version: &str) -> McpzResult<()> {
            self.calls.lock().await.push(format!("+{package}@{version}"));
            Ok(())
        }

        async fn uninstall(&self, package: &str) -> McpzResult<()> {
            self.calls.lock().await.push(format!("-{package}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_plugin_install_pins_latest_version() {
        let dir = tempfile::tempdir().unwrap();
        let packages = Arc::new(RecordingPackages::default());
        let installer = Installer::new(
            Arc::new(FakeRegistry),
            packages.clone(),
            SkillCache::new(dir.path()),
        );

        installer.install_plugin("@acme/git").await.unwrap();
        installer.uninstall_plugin("@acme/git").await.unwrap();
        assert!(installer.install_plugin("missing").await.is_err());
        assert_eq!(*packages.calls.lock().await, ["+@acme/git@3.1.0", "-@acme/git"]);
    }

    #[tokio::test]
    async fn test_skill_install_lands_in_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SkillCache::new(dir.path());
        let installer = Installer::new(
            Arc::new(FakeRegistry),
            Arc::new(RecordingPackages::default()),
            cache.clone(),
        );

        installer.install_skill("summarize").await.unwrap();
        assert_eq!(cache.load().await.unwrap()["summarize"].description, "fetched");

        installer.uninstall_skill("summarize").await.unwrap();
        assert!(installer.uninstall_skill("summarize").await.is_err());
    }
}
