use crate::descriptor::{PluginDescriptor, SkillDescriptor};
use crate::source::CapabilitySource;
use mcpz_core::McpzResult;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Composes capability sources in registration order.
///
/// When two sources report the same id the later source wins, so local
/// overrides are registered last. Results are sorted by id.
#[derive(Default, Clone)]
pub struct Discovery {
    sources: Vec<Arc<dyn CapabilitySource>>,
}

impl Discovery {
    /// A discovery with no sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source; later sources win on id collision.
    pub fn with_source(mut self, source: Arc<dyn CapabilitySource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Append a source in place.
    pub fn add_source(&mut self, source: Arc<dyn CapabilitySource>) {
        self.sources.push(source);
    }

    /// Number of configured sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Plugins from every source. A failing source is logged and skipped.
    pub async fn discover_plugins(&self) -> McpzResult<Vec<PluginDescriptor>> {
        let mut merged = BTreeMap::new();
        for source in &self.sources {
            match source.discover_plugins().await {
                Ok(plugins) => {
                    for plugin in plugins {
                        if merged.contains_key(&plugin.id) {
                            debug!(plugin = %plugin.id, source = source.name(), "Plugin overridden");
                        }
                        merged.insert(plugin.id.clone(), plugin);
                    }
                }
                Err(e) => warn!(source = source.name(), error = %e, "Plugin source failed"),
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Skills from every source. A failing source is logged and skipped.
    pub async fn discover_skills(&self) -> McpzResult<Vec<SkillDescriptor>> {
        let mut merged = BTreeMap::new();
        for source in &self.sources {
            match source.discover_skills().await {
                Ok(skills) => {
                    for skill in skills {
                        if merged.contains_key(&skill.id) {
                            debug!(skill = %skill.id, source = source.name(), "Skill overridden");
                        }
                        merged.insert(skill.id.clone(), skill);
                    }
                }
                Err(e) => warn!(source = source.name(), error = %e, "Skill source failed"),
            }
        }
        Ok(merged.into_values().collect())
    }
}
