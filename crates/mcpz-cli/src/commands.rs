use crate::{InstancesAction, PluginAction, ServerAction, SkillAction, ToolboxAction};
use mcpz_config::{ConfigDocument, ConfigStore, McpzHome, PluginOrigin};
use mcpz_core::{McpzError, ServerSpec};
use mcpz_discovery::{
    reconcile_plugins, reconcile_skills, Discovery, HttpRegistryClient, Installer,
    LocalDirectorySource, NpmGlobalSource, NpmPackageManager, PluginDescriptor, SkillCache,
    SkillDescriptor,
};
use mcpz_runtime::{
    FileInstanceStore, InstanceManager, ManagerOptions, StdioSpawner, SystemProcessTable,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything a command needs, built from the data directory.
pub struct Context {
    pub home: McpzHome,
    pub config: ConfigStore,
}

impl Context {
    pub fn new(home: McpzHome) -> Self {
        let config = ConfigStore::new(home.config_path());
        Self { home, config }
    }

    fn skill_cache(&self) -> SkillCache {
        SkillCache::new(self.home.skill_cache_dir())
    }

    /// Global npm packages first, local directories last so they override.
    pub async fn discovery(&self) -> Discovery {
        let mut discovery = Discovery::new();
        match NpmGlobalSource::locate(self.skill_cache()).await {
            Ok(source) => discovery.add_source(Arc::new(source)),
            Err(e) => {
                debug!(error = %e, "npm unavailable, scanning the skill cache only");
                discovery.add_source(Arc::new(NpmGlobalSource::new(
                    self.home.plugins_dir().join("node_modules"),
                    self.skill_cache(),
                )));
            }
        }
        discovery.add_source(Arc::new(LocalDirectorySource::for_home(&self.home)));
        discovery
    }

    fn installer(&self) -> Installer {
        Installer::new(
            Arc::new(HttpRegistryClient::default()),
            Arc::new(NpmPackageManager),
            self.skill_cache(),
        )
    }

    pub fn manager(&self) -> InstanceManager {
        InstanceManager::new(
            Arc::new(FileInstanceStore::new(self.home.registry_path())),
            Arc::new(StdioSpawner::new()),
            Arc::new(SystemProcessTable::new()),
            ManagerOptions::default(),
        )
    }

    /// Discover plugins and fold them into the stored config.
    pub async fn sync_plugins(&self) -> anyhow::Result<(ConfigDocument, Vec<PluginDescriptor>)> {
        let found = self.discovery().await.discover_plugins().await?;
        let doc = self
            .config
            .update(|doc| {
                *doc = reconcile_plugins(doc, &found);
                Ok(doc.clone())
            })
            .await?;
        Ok((doc, found))
    }

    /// Discover skills and fold them into the stored config.
    pub async fn sync_skills(&self) -> anyhow::Result<(ConfigDocument, Vec<SkillDescriptor>)> {
        let found = self.discovery().await.discover_skills().await?;
        let doc = self
            .config
            .update(|doc| {
                *doc = reconcile_skills(doc, &found);
                Ok(doc.clone())
            })
            .await?;
        Ok((doc, found))
    }
}

fn enabled_label(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

pub async fn server(ctx: &Context, action: ServerAction) -> anyhow::Result<()> {
    match action {
        ServerAction::List => {
            let doc = ctx.config.load().await?;
            if doc.servers.is_empty() {
                println!("No servers configured.");
                println!("Add one with: mcpz server add NAME --command CMD");
                return Ok(());
            }
            for spec in &doc.servers {
                let mut line = format!("  {} — {}", spec.name, spec.command);
                if !spec.args.is_empty() {
                    line.push(' ');
                    line.push_str(&spec.args.join(" "));
                }
                if let Some(port) = spec.port {
                    line.push_str(&format!(" (port {port})"));
                }
                println!("{line}");
            }
            println!("\nTotal: {} server(s)", doc.servers.len());
        }
        ServerAction::Add {
            name,
            command,
            args,
            env,
            port,
        } => {
            let mut spec = ServerSpec::new(&name, command).with_args(args);
            for (key, value) in env {
                spec = spec.with_env(key, value);
            }
            if let Some(port) = port {
                spec = spec.with_port(port);
            }
            ctx.config.update(|doc| doc.add_server(spec)).await?;
            info!(server = %name, "Server added");
            println!("Added server '{name}'");
        }
        ServerAction::Remove { name } => {
            let referencing = ctx.config.update(|doc| doc.remove_server(&name)).await?;
            println!("Removed server '{name}'");
            if !referencing.is_empty() {
                println!(
                    "Warning: still referenced by toolbox(es): {}",
                    referencing.join(", ")
                );
            }
        }
    }
    Ok(())
}

pub async fn toolbox(ctx: &Context, action: ToolboxAction) -> anyhow::Result<()> {
    match action {
        ToolboxAction::List => {
            let doc = ctx.config.load().await?;
            if doc.toolboxes.is_empty() {
                println!("No toolboxes configured.");
                return Ok(());
            }
            for (name, members) in &doc.toolboxes {
                println!("  {name}: {}", members.join(", "));
                for missing in members.iter().filter(|m| doc.server(m).is_none()) {
                    println!("    (not a builtin server: {missing})");
                }
            }
        }
        ToolboxAction::Create { name, members } => {
            ctx.config
                .update(|doc| doc.create_toolbox(&name, members))
                .await?;
            println!("Created toolbox '{name}'");
        }
        ToolboxAction::Delete { name } => {
            ctx.config.update(|doc| doc.delete_toolbox(&name)).await?;
            println!("Deleted toolbox '{name}'");
        }
        ToolboxAction::Add { name, member } => {
            ctx.config
                .update(|doc| doc.add_to_toolbox(&name, &member))
                .await?;
            println!("Added '{member}' to toolbox '{name}'");
        }
        ToolboxAction::Remove { name, member } => {
            ctx.config
                .update(|doc| doc.remove_from_toolbox(&name, &member))
                .await?;
            println!("Removed '{member}' from toolbox '{name}'");
        }
    }
    Ok(())
}

pub async fn plugin(ctx: &Context, action: PluginAction) -> anyhow::Result<()> {
    match action {
        PluginAction::List => {
            let doc = ctx.config.load().await?;
            if doc.plugins.is_empty() {
                println!("No plugins recorded. Run: mcpz plugin discover");
                return Ok(());
            }
            for (id, record) in &doc.plugins {
                let origin = match record.origin {
                    PluginOrigin::Npm => "npm",
                    PluginOrigin::Local => "local",
                };
                println!(
                    "  {id} {} [{origin}, {}]",
                    record.version,
                    enabled_label(record.enabled)
                );
                if !record.servers.is_empty() {
                    println!("    servers: {}", record.servers.join(", "));
                }
            }
        }
        PluginAction::Discover => {
            let (_, found) = ctx.sync_plugins().await?;
            for plugin in &found {
                println!(
                    "  {} {} ({} server(s)) — {}",
                    plugin.id,
                    plugin.version,
                    plugin.servers.len(),
                    plugin.path.display()
                );
            }
            println!("\nDiscovered {} plugin(s)", found.len());
        }
        PluginAction::Enable { id } => {
            ctx.config
                .update(|doc| doc.set_plugin_enabled(&id, true))
                .await?;
            println!("Enabled plugin '{id}'");
        }
        PluginAction::Disable { id } => {
            ctx.config
                .update(|doc| doc.set_plugin_enabled(&id, false))
                .await?;
            println!("Disabled plugin '{id}'");
        }
        PluginAction::Install { id } => {
            let package = ctx.installer().install_plugin(&id).await?;
            let (doc, _) = ctx.sync_plugins().await?;
            if doc.plugins.contains_key(&package.name) {
                println!("Installed plugin '{}' {}", package.name, package.version);
            } else {
                warn!(plugin = %package.name, "Installed package declares no mcpz servers");
                println!(
                    "Installed '{}' {}, but it declares no mcpz servers",
                    package.name, package.version
                );
            }
        }
        PluginAction::Uninstall { id } => {
            ctx.installer().uninstall_plugin(&id).await?;
            ctx.config
                .update(|doc| {
                    doc.plugins.remove(&id);
                    Ok(())
                })
                .await?;
            println!("Uninstalled plugin '{id}'");
        }
    }
    Ok(())
}

pub async fn skill(ctx: &Context, action: SkillAction) -> anyhow::Result<()> {
    match action {
        SkillAction::List => {
            let doc = ctx.config.load().await?;
            if doc.skills.is_empty() {
                println!("No skills recorded. Run: mcpz skill discover");
                return Ok(());
            }
            for (id, record) in &doc.skills {
                println!("  {id} {} [{}]", record.version, enabled_label(record.enabled));
                if !record.tools.is_empty() {
                    println!("    tools: {}", record.tools.join(", "));
                }
            }
        }
        SkillAction::Discover => {
            let (_, found) = ctx.sync_skills().await?;
            for skill in &found {
                println!("  {} {} — {}", skill.id, skill.version, skill.description);
            }
            println!("\nDiscovered {} skill(s)", found.len());
        }
        SkillAction::Enable { id } => {
            ctx.config
                .update(|doc| doc.set_skill_enabled(&id, true))
                .await?;
            println!("Enabled skill '{id}'");
        }
        SkillAction::Disable { id } => {
            ctx.config
                .update(|doc| doc.set_skill_enabled(&id, false))
                .await?;
            println!("Disabled skill '{id}'");
        }
        SkillAction::Install { id } => {
            let manifest = ctx.installer().install_skill(&id).await?;
            ctx.sync_skills().await?;
            println!(
                "Installed skill '{}' {} ({} tool(s))",
                manifest.name,
                manifest.version,
                manifest.tools.len()
            );
        }
        SkillAction::Uninstall { id } => {
            ctx.installer().uninstall_skill(&id).await?;
            ctx.config
                .update(|doc| {
                    doc.skills.remove(&id);
                    Ok(())
                })
                .await?;
            println!("Uninstalled skill '{id}'");
        }
    }
    Ok(())
}

pub async fn instances(ctx: &Context, action: InstancesAction) -> anyhow::Result<()> {
    let manager = ctx.manager();
    match action {
        InstancesAction::List => {
            let records = manager.list().await?;
            if records.is_empty() {
                println!("No instances recorded.");
                return Ok(());
            }
            for r in &records {
                let pid = r.pid.map_or_else(|| "-".to_string(), |p| p.to_string());
                println!(
                    "  {}  {:<20} pid {:<8} {:<12} owner {}  since {}",
                    r.id,
                    r.server_name,
                    pid,
                    r.status,
                    r.owner_pid,
                    r.started_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        InstancesAction::Stop { id } => match manager.stop(&id).await {
            Ok(()) => println!("Stopped instance {id}"),
            Err(e @ McpzError::StopTimeout(_)) => {
                println!("Instance {id} is now marked unreachable");
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        },
        InstancesAction::Reconcile => {
            let before = manager.list().await?.len();
            let survivors = manager.reconcile().await?;
            println!(
                "Reclaimed {} instance(s), {} remaining",
                before.saturating_sub(survivors.len()),
                survivors.len()
            );
            for r in &survivors {
                println!("  {}  {}  {}", r.id, r.server_name, r.status);
            }
        }
    }
    Ok(())
}
