use crate::descriptor::SkillManifest;
use mcpz_config::lock::DEFAULT_LOCK_WAIT;
use mcpz_config::{write_atomic, FileLock};
use mcpz_core::{McpzError, McpzResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Name of the index file inside the cache directory.
pub const INDEX_FILE: &str = "index.json";

/// Skills installed from the skills registry.
///
/// The whole cache is one `index.json` mapping skill id to manifest, written
/// under an advisory lock.
#[derive(Debug, Clone)]
pub struct SkillCache {
    dir: PathBuf,
    lock_wait: Duration,
}

impl SkillCache {
    /// A cache rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// Path of the cache index.
    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// Every cached manifest. A missing index is an empty cache.
    pub async fn load(&self) -> McpzResult<BTreeMap<String, SkillManifest>> {
        read_index(&self.index_path()).await
    }

    /// Add or replace a manifest.
    pub async fn insert(&self, manifest: SkillManifest) -> McpzResult<()> {
        let id = manifest.name.clone();
        self.modify(|index| {
            index.insert(manifest.name.clone(), manifest);
        })
        .await?;
        info!(skill = %id, "Skill cached");
        Ok(())
    }

    /// Drop a manifest. Returns whether it was present.
    pub async fn remove(&self, id: &str) -> McpzResult<bool> {
        self.modify(|index| index.remove(id).is_some()).await
    }

    async fn modify<T>(
        &self,
        edit: impl FnOnce(&mut BTreeMap<String, SkillManifest>) -> T,
    ) -> McpzResult<T> {
        let path = self.index_path();
        let _lock = FileLock::acquire(&path, self.lock_wait).await?;
        let mut index = read_index(&path).await?;
        let out = edit(&mut index);
        let json = serde_json::to_string_pretty(&index)?;
        write_atomic(&path, json.as_bytes()).await?;
        Ok(out)
    }
}

async fn read_index(path: &Path) -> McpzResult<BTreeMap<String, SkillManifest>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => serde_json::from_str(&contents)
            .map_err(|e| McpzError::Discovery(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn manifest(name: &str) -> SkillManifest {
        SkillManifest {
            name: name.into(),
            version: "1.0.0".into(),
            description: String::new(),
            instructions: String::new(),
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SkillCache::new(dir.path().join("skill-cache"));
        assert!(cache.load().await.unwrap().is_empty());

        cache.insert(manifest("a")).await.unwrap();
        cache.insert(manifest("b")).await.unwrap();
        assert_eq!(cache.load().await.unwrap().len(), 2);

        assert!(cache.remove("a").await.unwrap());
        assert!(!cache.remove("a").await.unwrap());
        let left: Vec<_> = cache.load().await.unwrap().into_keys().collect();
        assert_eq!(left, ["b"]);
    }
}
