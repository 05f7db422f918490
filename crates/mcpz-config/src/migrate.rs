//! Forward-only migrations between config schema versions.
//!
//! Migrations work on the raw JSON value so that documents written by any
//! earlier build can be read. Every step is idempotent and the whole chain is
//! pure: the input is never modified.
//!
//! | Version | Shape |
//! |---|---|
//! | 1 | no `configVersion`; `groups` map; `plugins` array of enabled ids |
//! | 2 | `toolboxes` map; `plugins` map of `{enabled, version}` |
//! | 3 | adds `skills`; plugin entries carry `origin` and `servers` |

use crate::document::CURRENT_CONFIG_VERSION;
use mcpz_core::{McpzError, McpzResult};
use serde_json::{json, Map, Value};
use tracing::debug;

/// Key the toolboxes map was stored under before version 2. Still accepted
/// on read at every version and never written.
pub const LEGACY_TOOLBOXES_KEY: &str = "groups";

/// Migrate a raw document to [`CURRENT_CONFIG_VERSION`].
pub fn migrate(raw: &Value) -> McpzResult<Value> {
    let mut doc = raw
        .as_object()
        .cloned()
        .ok_or_else(|| McpzError::ConfigCorrupt("top level is not a JSON object".into()))?;

    let mut version = detect_version(&doc)?;
    fold_legacy_toolboxes(&mut doc)?;

    while version < CURRENT_CONFIG_VERSION {
        match version {
            1 => v1_to_v2(&mut doc)?,
            2 => v2_to_v3(&mut doc)?,
            other => {
                return Err(McpzError::ConfigCorrupt(format!(
                    "no migration from config version {other}"
                )))
            }
        }
        version += 1;
        debug!(version, "Config migrated");
    }

    canonicalize(&mut doc);
    Ok(Value::Object(doc))
}

/// The version a raw document declares. A missing `configVersion` means 1.
pub fn detect_version(doc: &Map<String, Value>) -> McpzResult<u32> {
    let version = match doc.get("configVersion") {
        None => 1,
        Some(value) => value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v >= 1)
            .ok_or_else(|| {
                McpzError::ConfigCorrupt(format!("invalid configVersion: {value}"))
            })?,
    };
    if version > CURRENT_CONFIG_VERSION {
        return Err(McpzError::ConfigCorrupt(format!(
            "config version {version} is newer than supported version {CURRENT_CONFIG_VERSION}"
        )));
    }
    Ok(version)
}

/// Merge `groups` into `toolboxes` (toolboxes win per name) and drop the alias.
fn fold_legacy_toolboxes(doc: &mut Map<String, Value>) -> McpzResult<()> {
    let Some(groups) = doc.remove(LEGACY_TOOLBOXES_KEY) else {
        return Ok(());
    };
    let groups = match groups {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(McpzError::ConfigCorrupt(format!(
                "'{LEGACY_TOOLBOXES_KEY}' must be an object, found {other}"
            )))
        }
    };

    let toolboxes = doc
        .entry("toolboxes")
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(toolboxes) = toolboxes else {
        return Err(McpzError::ConfigCorrupt("'toolboxes' must be an object".into()));
    };
    for (name, members) in groups {
        toolboxes.entry(name).or_insert(members);
    }
    Ok(())
}

fn v1_to_v2(doc: &mut Map<String, Value>) -> McpzResult<()> {
    if let Some(plugins) = doc.get_mut("plugins") {
        if let Value::Array(ids) = plugins {
            let mut map = Map::new();
            for id in &*ids {
                let id = id.as_str().ok_or_else(|| {
                    McpzError::ConfigCorrupt(format!("plugin id must be a string, found {id}"))
                })?;
                map.insert(id.to_string(), json!({"enabled": true, "version": ""}));
            }
            *plugins = Value::Object(map);
        }
    }
    doc.insert("configVersion".into(), json!(2));
    Ok(())
}

fn v2_to_v3(doc: &mut Map<String, Value>) -> McpzResult<()> {
    doc.entry("skills")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(Value::Object(plugins)) = doc.get_mut("plugins") {
        for record in plugins.values_mut() {
            if let Value::Object(record) = record {
                record.entry("origin").or_insert_with(|| json!("npm"));
                record.entry("servers").or_insert_with(|| json!([]));
            }
        }
    }
    doc.insert("configVersion".into(), json!(3));
    Ok(())
}

/// Fill in absent top-level collections and de-duplicate toolbox members so
/// the output is identical no matter how many times it is migrated.
fn canonicalize(doc: &mut Map<String, Value>) {
    doc.insert("configVersion".into(), json!(CURRENT_CONFIG_VERSION));
    doc.entry("servers").or_insert_with(|| json!([]));
    doc.entry("toolboxes").or_insert_with(|| json!({}));
    doc.entry("plugins").or_insert_with(|| json!({}));
    doc.entry("skills").or_insert_with(|| json!({}));

    if let Some(Value::Object(toolboxes)) = doc.get_mut("toolboxes") {
        for members in toolboxes.values_mut() {
            if let Value::Array(list) = members {
                let mut seen: Vec<Value> = Vec::with_capacity(list.len());
                for member in list.drain(..) {
                    if !seen.contains(&member) {
                        seen.push(member);
                    }
                }
                *list = seen;
            }
        }
    }
}
