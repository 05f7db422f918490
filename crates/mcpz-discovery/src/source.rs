use crate::descriptor::{PluginDescriptor, PluginManifest, SkillDescriptor, SkillManifest};
use async_trait::async_trait;
use mcpz_config::PluginOrigin;
use mcpz_core::McpzResult;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A place plugins and skills can be found.
///
/// Implementations skip (and log) individual malformed manifests; an error
/// means the source as a whole could not be read.
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    async fn discover_plugins(&self) -> McpzResult<Vec<PluginDescriptor>>;

    async fn discover_skills(&self) -> McpzResult<Vec<SkillDescriptor>>;
}

/// Entries of `dir`, sorted by path. A missing directory is empty.
pub(crate) async fn list_dir(dir: &Path) -> McpzResult<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "Directory does not exist");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

pub(crate) fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

/// Read a plugin manifest, logging and skipping anything unusable.
pub(crate) async fn read_plugin(path: &Path, origin: PluginOrigin) -> Option<PluginDescriptor> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable plugin manifest, skipping");
            return None;
        }
    };
    match PluginManifest::parse(&contents) {
        Ok(Some(manifest)) => Some(manifest.into_descriptor(origin, path)),
        Ok(None) => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Malformed plugin manifest, skipping");
            None
        }
    }
}

/// Read a skill manifest, logging and skipping anything unusable.
pub(crate) async fn read_skill(path: &Path) -> Option<SkillDescriptor> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable skill manifest, skipping");
            return None;
        }
    };
    match SkillManifest::parse(&contents) {
        Ok(manifest) => Some(manifest.into_descriptor(path)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Malformed skill manifest, skipping");
            None
        }
    }
}
