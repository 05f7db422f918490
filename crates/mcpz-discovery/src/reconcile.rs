//! Folding discovery results into the persisted plugin and skill records.
//!
//! Discovery only ever adds or refreshes records. Enabled flags are the
//! user's and are never touched, and a record whose package disappeared is
//! kept so that re-installing restores the previous state.

use crate::descriptor::{PluginDescriptor, SkillDescriptor};
use mcpz_config::{ConfigDocument, PluginRecord, SkillRecord};
use tracing::info;

/// Return `doc` with a record for every discovered plugin.
pub fn reconcile_plugins(doc: &ConfigDocument, found: &[PluginDescriptor]) -> ConfigDocument {
    let mut next = doc.clone();
    for plugin in found {
        let servers: Vec<String> = plugin.servers.iter().map(|s| s.name.clone()).collect();
        match next.plugins.get_mut(&plugin.id) {
            Some(record) => {
                if record.version != plugin.version {
                    info!(plugin = %plugin.id, from = %record.version, to = %plugin.version, "Plugin version changed");
                    record.version.clone_from(&plugin.version);
                }
                record.origin = plugin.origin;
                record.servers = servers;
            }
            None => {
                info!(plugin = %plugin.id, version = %plugin.version, "New plugin recorded");
                next.plugins.insert(
                    plugin.id.clone(),
                    PluginRecord {
                        enabled: true,
                        version: plugin.version.clone(),
                        origin: plugin.origin,
                        servers,
                    },
                );
            }
        }
    }
    next
}

/// Return `doc` with a record for every discovered skill.
pub fn reconcile_skills(doc: &ConfigDocument, found: &[SkillDescriptor]) -> ConfigDocument {
    let mut next = doc.clone();
    for skill in found {
        let tools: Vec<String> = skill.tools.iter().map(|t| t.name.clone()).collect();
        match next.skills.get_mut(&skill.id) {
            Some(record) => {
                if record.version != skill.version {
                    info!(skill = %skill.id, from = %record.version, to = %skill.version, "Skill version changed");
                    record.version.clone_from(&skill.version);
                }
                record.tools = tools;
            }
            None => {
                info!(skill = %skill.id, version = %skill.version, "New skill recorded");
                next.skills.insert(
                    skill.id.clone(),
                    SkillRecord {
                        enabled: true,
                        version: skill.version.clone(),
                        tools,
                    },
                );
            }
        }
    }
    next
}
