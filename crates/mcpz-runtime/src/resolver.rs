//! Turning a run request into a concrete, de-duplicated server list.
//!
//! The catalog is every builtin server plus the servers of active plugins.
//! Names are resolved against it in first-seen order: explicit servers in
//! request order, then each toolbox in request order with its members in
//! toolbox order. A name reached more than once runs once.

use mcpz_config::ConfigDocument;
use mcpz_core::{McpzError, McpzResult, ServerOrigin, ServerSpec, ToolDefinition, ToolFilter};
use mcpz_discovery::{PluginDescriptor, SkillDescriptor};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// What the user asked to run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunRequest {
    /// Servers named explicitly.
    pub servers: Vec<String>,
    /// Toolboxes to expand.
    pub toolboxes: Vec<String>,
    /// Narrows the advertised tools once servers report them.
    pub tool_filter: Option<ToolFilter>,
    /// When non-empty, only these plugins contribute servers.
    pub plugin_filter: Vec<String>,
    /// When non-empty, only these skills contribute tools.
    pub skill_filter: Vec<String>,
}

/// Two catalog entries with the same server name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    /// Server name defined more than once.
    pub server: String,
    /// The definition that stays addressable.
    pub kept: ServerOrigin,
    /// Origin of the definition that lost.
    pub shadowed: ServerOrigin,
}

/// A tool contributed by a skill.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillTool {
    /// Skill id.
    pub skill: String,
    /// Tool as the skill declares it.
    pub definition: ToolDefinition,
    /// Returned verbatim when the tool is called.
    pub instructions: String,
}

/// The outcome of resolution, ready to hand to the instance manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRunPlan {
    /// Full specs in first-seen order, unique by name.
    pub servers: Vec<ServerSpec>,
    /// Narrows advertised tools; applied after each server reports them.
    pub tool_filter: Option<ToolFilter>,
    /// Tools contributed by active skills.
    pub skill_tools: Vec<SkillTool>,
    /// Shadowed server definitions.
    pub collisions: Vec<Collision>,
}

impl ResolvedRunPlan {
    /// Names of the resolved servers, in order.
    pub fn server_names(&self) -> Vec<&str> {
        self.servers.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Descriptors of enabled plugins, narrowed by `filter` when non-empty.
pub fn active_plugins(
    doc: &ConfigDocument,
    found: &[PluginDescriptor],
    filter: &[String],
) -> Vec<PluginDescriptor> {
    for id in filter {
        if !found.iter().any(|p| &p.id == id) {
            warn!(plugin = %id, "Plugin filter names an unknown plugin");
        }
    }
    let mut active: Vec<_> = found
        .iter()
        .filter(|p| doc.plugins.get(&p.id).is_some_and(|r| r.enabled))
        .filter(|p| filter.is_empty() || filter.contains(&p.id))
        .cloned()
        .collect();
    active.sort_by(|a, b| a.id.cmp(&b.id));
    active
}

/// Descriptors of enabled skills, narrowed by `filter` when non-empty.
pub fn active_skills(
    doc: &ConfigDocument,
    found: &[SkillDescriptor],
    filter: &[String],
) -> Vec<SkillDescriptor> {
    for id in filter {
        if !found.iter().any(|s| &s.id == id) {
            warn!(skill = %id, "Skill filter names an unknown skill");
        }
    }
    let mut active: Vec<_> = found
        .iter()
        .filter(|s| doc.skills.get(&s.id).is_some_and(|r| r.enabled))
        .filter(|s| filter.is_empty() || filter.contains(&s.id))
        .cloned()
        .collect();
    active.sort_by(|a, b| a.id.cmp(&b.id));
    active
}

/// Resolve `request` against the config and the active capabilities.
///
/// Fails with `UnknownToolbox`, `UnknownServer` (naming the missing server,
/// also when it is a stale toolbox member) or `EmptyResolution`.
pub fn resolve(
    request: &RunRequest,
    config: &ConfigDocument,
    plugins: &[PluginDescriptor],
    skills: &[SkillDescriptor],
) -> McpzResult<ResolvedRunPlan> {
    let (catalog, collisions) = build_catalog(config, plugins);

    let mut order: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |name: &str| -> McpzResult<()> {
        if !catalog.contains_key(name) {
            return Err(McpzError::UnknownServer(name.to_string()));
        }
        if seen.insert(name.to_string()) {
            order.push(name.to_string());
        }
        Ok(())
    };

    for name in &request.servers {
        push(name)?;
    }
    for toolbox in &request.toolboxes {
        let members = config
            .toolbox(toolbox)
            .ok_or_else(|| McpzError::UnknownToolbox(toolbox.clone()))?;
        debug!(toolbox = %toolbox, members = members.len(), "Expanding toolbox");
        for member in members {
            push(member)?;
        }
    }

    if order.is_empty() {
        return Err(McpzError::EmptyResolution);
    }

    let servers = order
        .into_iter()
        .filter_map(|name| catalog.get(&name).cloned())
        .collect();

    let skill_tools = skills
        .iter()
        .flat_map(|skill| {
            skill.tools.iter().map(|tool| SkillTool {
                skill: skill.id.clone(),
                definition: tool.clone(),
                instructions: if skill.instructions.is_empty() {
                    skill.description.clone()
                } else {
                    skill.instructions.clone()
                },
            })
        })
        .collect();

    Ok(ResolvedRunPlan {
        servers,
        tool_filter: request.tool_filter.clone().filter(|f| !f.is_empty()),
        skill_tools,
        collisions,
    })
}

/// Builtins first, then plugin servers in plugin id order. The first
/// definition of a name wins; every loser is reported.
fn build_catalog(
    config: &ConfigDocument,
    plugins: &[PluginDescriptor],
) -> (BTreeMap<String, ServerSpec>, Vec<Collision>) {
    let mut catalog: BTreeMap<String, ServerSpec> = config
        .servers
        .iter()
        .map(|s| (s.name.clone(), s.clone()))
        .collect();
    let mut collisions = Vec::new();

    let mut ordered: Vec<&PluginDescriptor> = plugins.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));

    for plugin in ordered {
        for spec in &plugin.servers {
            let mut spec = spec.clone();
            spec.origin = ServerOrigin::Plugin(plugin.id.clone());
            match catalog.get(&spec.name) {
                Some(existing) => {
                    warn!(
                        server = %spec.name,
                        kept = %existing.origin,
                        shadowed = %spec.origin,
                        "Server name collision"
                    );
                    collisions.push(Collision {
                        server: spec.name.clone(),
                        kept: existing.origin.clone(),
                        shadowed: spec.origin,
                    });
                }
                None => {
                    catalog.insert(spec.name.clone(), spec);
                }
            }
        }
    }
    (catalog, collisions)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use mcpz_config::{PluginOrigin, PluginRecord};
    use std::path::PathBuf;

    fn config() -> ConfigDocument {
        ConfigDocument::from_value(&serde_json::json!({
            "servers": [{"name": "a"}, {"name": "b"}, {"name": "c"}],
            "toolboxes": {"t": ["a", "b"]}
        }))
        .unwrap()
    }

    fn request(servers: &[&str], toolboxes: &[&str]) -> RunRequest {
        RunRequest {
            servers: servers.iter().map(|s| (*s).to_string()).collect(),
            toolboxes: toolboxes.iter().map(|s| (*s).to_string()).collect(),
            ..Default::default()
        }
    }

    fn plugin(id: &str, servers: &[&str]) -> PluginDescriptor {
        PluginDescriptor {
            id: id.into(),
            version: "1.0.0".into(),
            origin: PluginOrigin::Npm,
            servers: servers.iter().map(|s| ServerSpec::new(*s, "node")).collect(),
            path: PathBuf::new(),
        }
    }

    #[test]
    fn test_explicit_then_toolbox_order() {
        let plan = resolve(&request(&["b"], &["t"]), &config(), &[], &[]).unwrap();
        assert_eq!(plan.server_names(), ["b", "a"]);
    }

    #[test]
    fn test_server_reached_three_ways_runs_once() {
        let mut doc = config();
        doc.create_toolbox("u", vec!["b".into(), "c".into()]).unwrap();
        let plan = resolve(&request(&["a", "b"], &["t", "u"]), &doc, &[], &[]).unwrap();
        assert_eq!(plan.server_names(), ["a", "b", "c"]);
    }

    #[test]
    fn test_deleted_member_names_the_server() {
        let mut doc = config();
        doc.remove_server("a").unwrap();
        let err = resolve(&request(&[], &["t"]), &doc, &[], &[]).unwrap_err();
        assert!(matches!(err, McpzError::UnknownServer(ref name) if name == "a"));
    }

    #[test]
    fn test_unknown_toolbox_and_empty_request() {
        let err = resolve(&request(&[], &["nope"]), &config(), &[], &[]).unwrap_err();
        assert!(matches!(err, McpzError::UnknownToolbox(ref name) if name == "nope"));

        let err = resolve(&request(&[], &[]), &config(), &[], &[]).unwrap_err();
        assert!(matches!(err, McpzError::EmptyResolution));

        let mut doc = config();
        doc.create_toolbox("empty", Vec::new()).unwrap();
        let err = resolve(&request(&[], &["empty"]), &doc, &[], &[]).unwrap_err();
        assert!(matches!(err, McpzError::EmptyResolution));
    }

    #[test]
    fn test_builtin_shadows_plugin_and_collision_is_reported() {
        let plugins = [plugin("acme", &["a", "git"])];
        let plan = resolve(&request(&["a", "git"], &[]), &config(), &plugins, &[]).unwrap();
        assert!(plan.servers[0].origin.is_builtin());
        assert_eq!(plan.servers[1].origin, ServerOrigin::Plugin("acme".into()));
        assert_eq!(
            plan.collisions,
            [Collision {
                server: "a".into(),
                kept: ServerOrigin::Builtin,
                shadowed: ServerOrigin::Plugin("acme".into()),
            }]
        );
    }

    #[test]
    fn test_first_plugin_by_id_wins() {
        let plugins = [plugin("zed", &["git"]), plugin("acme", &["git"])];
        let plan = resolve(&request(&["git"], &[]), &config(), &plugins, &[]).unwrap();
        assert_eq!(plan.servers[0].origin, ServerOrigin::Plugin("acme".into()));
        assert_eq!(plan.collisions[0].shadowed, ServerOrigin::Plugin("zed".into()));
    }

    #[test]
    fn test_disabled_plugins_are_not_active() {
        let mut doc = config();
        for (id, enabled) in [("on", true), ("off", false)] {
            doc.plugins.insert(
                id.into(),
                PluginRecord {
                    enabled,
                    version: "1.0.0".into(),
                    origin: PluginOrigin::Npm,
                    servers: Vec::new(),
                },
            );
        }
        let found = [plugin("off", &["x"]), plugin("on", &["y"]), plugin("new", &["z"])];
        let active = active_plugins(&doc, &found, &[]);
        let ids: Vec<_> = active.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["on"]);

        assert!(active_plugins(&doc, &found, &["other".into()]).is_empty());

        let err = resolve(&request(&["x"], &[]), &doc, &active, &[]).unwrap_err();
        assert!(matches!(err, McpzError::UnknownServer(_)));
    }

    #[test]
    fn test_skill_tools_fall_back_to_description() {
        let skill = SkillDescriptor {
            id: "review".into(),
            version: "1".into(),
            description: "Review the diff".into(),
            instructions: String::new(),
            tools: vec![ToolDefinition::new("review", "")],
            path: PathBuf::new(),
        };
        let plan = resolve(&request(&["a"], &[]), &config(), &[], &[skill]).unwrap();
        assert_eq!(plan.skill_tools[0].instructions, "Review the diff");
        assert_eq!(plan.skill_tools[0].skill, "review");
    }
}
