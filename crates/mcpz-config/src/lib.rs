//! Versioned, schema-validated config store for mcpz.
//!
//! The config document is a single JSON file holding builtin servers,
//! toolboxes and plugin/skill state. It is read and written as a whole,
//! migrated forward from any earlier schema version, and validated on every
//! load and before every save.

/// The config document and its edit operations.
pub mod document;
/// Advisory locks for read-modify-write cycles.
pub mod lock;
/// Forward migration of older config versions.
pub mod migrate;
/// Well-known locations under the data directory.
pub mod paths;
/// Loading and saving the config file.
pub mod store;
/// Semantic validation of config documents.
pub mod validate;

pub use document::{
    ConfigDocument, PluginOrigin, PluginRecord, SkillRecord, CURRENT_CONFIG_VERSION,
};
pub use lock::FileLock;
pub use migrate::migrate;
pub use paths::McpzHome;
pub use store::ConfigStore;
pub use validate::validate;

/// Write bytes through a temp file renamed over the target.
pub async fn write_atomic(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    store::write_atomic(path, bytes).await
}
