use crate::instance::{InstanceRecord, InstanceStatus};
use async_trait::async_trait;
use mcpz_config::lock::DEFAULT_LOCK_WAIT;
use mcpz_config::{write_atomic, FileLock};
use mcpz_core::{McpzError, McpzResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Durable storage of instance records, keyed by instance id.
///
/// Every status change goes through [`InstanceStore::set_status`] so that
/// implementations can apply it as one locked step.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// All records, oldest first.
    async fn list(&self) -> McpzResult<Vec<InstanceRecord>>;

    async fn get(&self, id: &str) -> McpzResult<Option<InstanceRecord>>;

    /// Insert or replace a record.
    async fn put(&self, record: &InstanceRecord) -> McpzResult<()>;

    /// Delete a record. Returns whether it existed.
    async fn remove(&self, id: &str) -> McpzResult<bool>;

    /// Transition a record. Illegal transitions are logged and ignored.
    /// Returns the record as stored afterwards, `None` if unknown.
    async fn set_status(
        &self,
        id: &str,
        status: InstanceStatus,
    ) -> McpzResult<Option<InstanceRecord>>;
}

fn apply(record: &mut InstanceRecord, status: InstanceStatus) {
    if record.status == status {
        return;
    }
    if record.transition(status) {
        debug!(instance = %record.id, server = %record.server_name, status = %status, "Instance transitioned");
    } else {
        warn!(
            instance = %record.id,
            from = %record.status,
            to = %status,
            "Ignoring illegal instance transition"
        );
    }
}

fn sorted(map: &BTreeMap<String, InstanceRecord>) -> Vec<InstanceRecord> {
    let mut records: Vec<_> = map.values().cloned().collect();
    records.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
    records
}

/// Instance registry kept in one JSON file (`instances.json`), separate from
/// the config document. Writes are locked read-modify-write cycles.
#[derive(Debug, Clone)]
pub struct FileInstanceStore {
    path: PathBuf,
    lock_wait: Duration,
}

impl FileInstanceStore {
    /// A registry stored at `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// Bound on waiting for the registry lock.
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Path of the registry file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> McpzResult<BTreeMap<String, InstanceRecord>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                McpzError::ConfigCorrupt(format!("instance registry {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn modify<T>(
        &self,
        edit: impl FnOnce(&mut BTreeMap<String, InstanceRecord>) -> T + Send,
    ) -> McpzResult<T> {
        let _lock = FileLock::acquire(&self.path, self.lock_wait).await?;
        let mut records = self.read().await?;
        let out = edit(&mut records);
        let json = serde_json::to_string_pretty(&records)?;
        write_atomic(&self.path, json.as_bytes()).await?;
        Ok(out)
    }
}

#[async_trait]
impl InstanceStore for FileInstanceStore {
    async fn list(&self) -> McpzResult<Vec<InstanceRecord>> {
        Ok(sorted(&self.read().await?))
    }

    async fn get(&self, id: &str) -> McpzResult<Option<InstanceRecord>> {
        Ok(self.read().await?.remove(id))
    }

    async fn put(&self, record: &InstanceRecord) -> McpzResult<()> {
        let record = record.clone();
        self.modify(move |records| {
            records.insert(record.id.clone(), record);
        })
        .await
    }

    async fn remove(&self, id: &str) -> McpzResult<bool> {
        self.modify(|records| records.remove(id).is_some()).await
    }

    async fn set_status(
        &self,
        id: &str,
        status: InstanceStatus,
    ) -> McpzResult<Option<InstanceRecord>> {
        self.modify(|records| {
            records.get_mut(id).map(|record| {
                apply(record, status);
                record.clone()
            })
        })
        .await
    }
}

/// In-process instance registry for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryInstanceStore {
    records: RwLock<BTreeMap<String, InstanceRecord>>,
}

impl MemoryInstanceStore {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn list(&self) -> McpzResult<Vec<InstanceRecord>> {
        Ok(sorted(&*self.records.read().await))
    }

    async fn get(&self, id: &str) -> McpzResult<Option<InstanceRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn put(&self, record: &InstanceRecord) -> McpzResult<()> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> McpzResult<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }

    async fn set_status(
        &self,
        id: &str,
        status: InstanceStatus,
    ) -> McpzResult<Option<InstanceRecord>> {
        let mut records = self.records.write().await;
        Ok(records.get_mut(id).map(|record| {
            apply(record, status);
            record.clone()
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.json");
        let record = InstanceRecord::starting("fs", Some(4242), 1);

        FileInstanceStore::new(&path).put(&record).await.unwrap();

        let reopened = FileInstanceStore::new(&path);
        assert_eq!(reopened.get(&record.id).await.unwrap(), Some(record.clone()));

        let updated = reopened
            .set_status(&record.id, InstanceStatus::Running)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, InstanceStatus::Running);

        assert!(reopened.remove(&record.id).await.unwrap());
        assert!(reopened.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_illegal_transition_is_ignored() {
        let store = MemoryInstanceStore::new();
        let record = InstanceRecord::starting("fs", None, 1);
        store.put(&record).await.unwrap();
        store
            .set_status(&record.id, InstanceStatus::Exited)
            .await
            .unwrap();
        let after = store
            .set_status(&record.id, InstanceStatus::Running)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, InstanceStatus::Exited);
        assert!(store
            .set_status("missing", InstanceStatus::Running)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_concurrent_puts_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FileInstanceStore::new(dir.path().join("instances.json")));
        let mut tasks = Vec::new();
        for i in 0..6 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .put(&InstanceRecord::starting(format!("s{i}"), Some(i), 1))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(store.list().await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_corrupt_registry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert!(FileInstanceStore::new(&path).list().await.is_err());
    }
}
