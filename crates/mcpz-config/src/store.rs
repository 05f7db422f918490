use crate::document::ConfigDocument;
use crate::lock::{FileLock, DEFAULT_LOCK_WAIT};
use crate::validate::validate;
use mcpz_core::{McpzError, McpzResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Whole-document persistence for [`ConfigDocument`].
///
/// Every load migrates and validates; every save validates first and writes
/// through a temp file renamed over the target, under an advisory lock.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    lock_wait: Duration,
}

impl ConfigStore {
    /// A store for the config file at `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// Bound the wait for a contended lock.
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Path of the config file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read, migrate and validate the document. A missing file yields an
    /// empty current-version document.
    pub async fn load(&self) -> McpzResult<ConfigDocument> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No config file, using defaults");
                return Ok(ConfigDocument::default());
            }
            Err(e) => {
                return Err(McpzError::ConfigUnreadable(format!(
                    "{}: {e}",
                    self.path.display()
                )))
            }
        };

        let raw: serde_json::Value = serde_json::from_str(&contents).map_err(|e| {
            McpzError::ConfigCorrupt(format!("{}: {e}", self.path.display()))
        })?;
        ConfigDocument::from_value(&raw)
    }

    /// Validate and persist the whole document.
    pub async fn save(&self, doc: &ConfigDocument) -> McpzResult<()> {
        let _lock = self.lock().await?;
        self.write_unlocked(doc).await
    }

    /// Locked read-modify-write. `edit` runs on a copy of the current
    /// document; nothing is written if it fails or the result is invalid.
    pub async fn update<T, F>(&self, edit: F) -> McpzResult<T>
    where
        F: FnOnce(&mut ConfigDocument) -> McpzResult<T>,
    {
        let _lock = self.lock().await?;
        let mut doc = self.load().await?;
        let out = edit(&mut doc)?;
        self.write_unlocked(&doc).await?;
        Ok(out)
    }

    async fn lock(&self) -> McpzResult<FileLock> {
        FileLock::acquire(&self.path, self.lock_wait).await
    }

    async fn write_unlocked(&self, doc: &ConfigDocument) -> McpzResult<()> {
        validate(doc).map_err(|e| {
            McpzError::ConfigWriteFailed(format!("document failed validation: {e}"))
        })?;

        let json = serde_json::to_string_pretty(doc)
            .map_err(|e| McpzError::ConfigWriteFailed(e.to_string()))?;
        write_atomic(&self.path, json.as_bytes())
            .await
            .map_err(|e| McpzError::ConfigWriteFailed(format!("{}: {e}", self.path.display())))?;

        info!(
            path = %self.path.display(),
            servers = doc.servers.len(),
            toolboxes = doc.toolboxes.len(),
            "Config saved"
        );
        Ok(())
    }
}

/// Write `bytes` to a temp sibling and rename it over `path`.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp_name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    tmp_name.push(format!(".tmp-{}", std::process::id()));
    let tmp = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}
