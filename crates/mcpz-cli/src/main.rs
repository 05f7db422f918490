//! `mcpz`: manage MCP servers, toolboxes, plugins and skills, and run a
//! selection of them behind one composed MCP endpoint on stdio.

mod commands;
mod run;

use clap::{Args, Parser, Subcommand};
use commands::Context;
use mcpz_config::McpzHome;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mcpz", version, about = "mcpz — MCP server manager")]
struct Cli {
    /// Data directory holding config.json and instances.json (overrides MCPZ_HOME)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage builtin servers
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },
    /// Manage toolboxes (named server sets)
    Toolbox {
        #[command(subcommand)]
        action: ToolboxAction,
    },
    /// Manage plugins
    Plugin {
        #[command(subcommand)]
        action: PluginAction,
    },
    /// Manage skills
    Skill {
        #[command(subcommand)]
        action: SkillAction,
    },
    /// Launch servers and serve their tools on stdio
    Run(RunArgs),
    /// Inspect and clean up launched instances
    Instances {
        #[command(subcommand)]
        action: InstancesAction,
    },
}

#[derive(Subcommand)]
enum ServerAction {
    /// List builtin servers
    List,
    /// Add a builtin server
    Add {
        name: String,
        /// Executable to launch
        #[arg(long)]
        command: String,
        /// Argument passed to the command (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Environment override as KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_env)]
        env: Vec<(String, String)>,
        /// Loopback port the server listens on
        #[arg(long)]
        port: Option<u16>,
    },
    /// Remove a builtin server
    Remove { name: String },
}

#[derive(Subcommand)]
enum ToolboxAction {
    /// List toolboxes and their members
    List,
    /// Create a toolbox
    Create { name: String, members: Vec<String> },
    /// Delete a toolbox
    Delete { name: String },
    /// Add a server to a toolbox
    Add { name: String, member: String },
    /// Remove a server from a toolbox
    Remove { name: String, member: String },
}

#[derive(Subcommand)]
enum PluginAction {
    /// List known plugins
    List,
    /// Scan for installed plugins and record them
    Discover,
    /// Enable a plugin
    Enable { id: String },
    /// Disable a plugin without uninstalling it
    Disable { id: String },
    /// Install a plugin from the package registry
    Install { id: String },
    /// Uninstall a plugin
    Uninstall { id: String },
}

#[derive(Subcommand)]
enum SkillAction {
    /// List known skills
    List,
    /// Scan for installed skills and record them
    Discover,
    /// Enable a skill
    Enable { id: String },
    /// Disable a skill
    Disable { id: String },
    /// Fetch a skill from the skills registry
    Install { id: String },
    /// Remove a fetched skill
    Uninstall { id: String },
}

#[derive(Args)]
struct RunArgs {
    /// Servers to run
    servers: Vec<String>,
    /// Toolbox to run (repeatable)
    #[arg(long = "toolbox", short = 't')]
    toolboxes: Vec<String>,
    /// Only advertise these tools (`tool` or `server/tool`, comma separated)
    #[arg(long, value_delimiter = ',')]
    tools: Vec<String>,
    /// Only take servers from these plugins (comma separated)
    #[arg(long, value_delimiter = ',')]
    plugins: Vec<String>,
    /// Only take tools from these skills (comma separated)
    #[arg(long, value_delimiter = ',')]
    skills: Vec<String>,
    /// Protocol version the endpoint speaks
    #[arg(long, default_value = mcpz_mcp::dialect::CURRENT_PROTOCOL_VERSION)]
    protocol: String,
    /// Print the resolved plan and exit without launching
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum InstancesAction {
    /// List recorded instances
    List,
    /// Stop an instance
    Stop { id: String },
    /// Reclaim instances whose process is gone
    Reconcile,
}

fn parse_env(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn init_tracing(json: bool) {
    // stdout carries the MCP stream during `run`
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let home = match cli.home {
        Some(root) => McpzHome::new(root),
        None => McpzHome::from_env()?,
    };
    let ctx = Context::new(home);

    match cli.command {
        Commands::Server { action } => commands::server(&ctx, action).await,
        Commands::Toolbox { action } => commands::toolbox(&ctx, action).await,
        Commands::Plugin { action } => commands::plugin(&ctx, action).await,
        Commands::Skill { action } => commands::skill(&ctx, action).await,
        Commands::Run(args) => run::run(&ctx, args).await,
        Commands::Instances { action } => commands::instances(&ctx, action).await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_env() {
        assert_eq!(
            parse_env("TOKEN=a=b").unwrap(),
            ("TOKEN".to_string(), "a=b".to_string())
        );
        assert!(parse_env("novalue").is_err());
        assert!(parse_env("=x").is_err());
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "mcpz", "--home", "/tmp/h", "run", "fs", "-t", "dev", "--tools", "read,git/log",
        ])
        .unwrap();
        assert_eq!(cli.home, Some(PathBuf::from("/tmp/h")));
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.servers, ["fs"]);
        assert_eq!(args.toolboxes, ["dev"]);
        assert_eq!(args.tools, ["read", "git/log"]);
        assert_eq!(args.protocol, "2025-06-18");
        assert!(!args.dry_run);
    }

    #[test]
    fn test_server_add_arguments() {
        let cli = Cli::try_parse_from([
            "mcpz", "server", "add", "fs", "--command", "npx", "--arg", "-y", "--arg",
            "@modelcontextprotocol/server-filesystem", "--env", "ROOT=/srv", "--port", "7000",
        ])
        .unwrap();
        let Commands::Server {
            action: ServerAction::Add { name, command, args, env, port },
        } = cli.command
        else {
            panic!("expected server add");
        };
        assert_eq!(name, "fs");
        assert_eq!(command, "npx");
        assert_eq!(args, ["-y", "@modelcontextprotocol/server-filesystem"]);
        assert_eq!(env, [("ROOT".to_string(), "/srv".to_string())]);
        assert_eq!(port, Some(7000));
    }
}
