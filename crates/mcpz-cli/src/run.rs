use crate::commands::Context;
use crate::RunArgs;
use anyhow::Context as _;
use mcpz_core::ToolFilter;
use mcpz_mcp::{serve, Dialect};
use mcpz_runtime::{active_plugins, active_skills, resolve, ResolvedRunPlan, RunRequest};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Name the composed endpoint reports in `serverInfo`.
const ENDPOINT_NAME: &str = "mcpz";

/// Resolve, launch, serve the composed endpoint on stdio until the client
/// hangs up or Ctrl-C, then stop everything this run started.
pub async fn run(ctx: &Context, args: RunArgs) -> anyhow::Result<()> {
    let dialect = Dialect::from_protocol_version(&args.protocol)
        .with_context(|| format!("unsupported protocol version '{}'", args.protocol))?;

    let (doc, plugins) = ctx.sync_plugins().await?;
    let skills = ctx.discovery().await.discover_skills().await?;

    let request = RunRequest {
        servers: args.servers,
        toolboxes: args.toolboxes,
        tool_filter: (!args.tools.is_empty()).then(|| ToolFilter::new(args.tools)),
        plugin_filter: args.plugins,
        skill_filter: args.skills,
    };
    let plugins = active_plugins(&doc, &plugins, &request.plugin_filter);
    let skills = active_skills(&doc, &skills, &request.skill_filter);
    let plan = resolve(&request, &doc, &plugins, &skills)?;

    if args.dry_run {
        print_plan(&plan);
        return Ok(());
    }

    let manager = ctx.manager();
    if let Err(e) = manager.reconcile().await {
        warn!(error = %e, "Instance sweep failed");
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            interrupt.cancel();
        }
    });

    let handle = manager.launch(&plan, &cancel).await?;
    for failure in &handle.failures {
        warn!(server = %failure.server, error = %failure.error, "Server not available in this run");
    }

    let endpoint = Arc::new(handle.build_endpoint(
        ENDPOINT_NAME,
        dialect,
        plan.tool_filter.as_ref(),
        &plan.skill_tools,
    ));
    info!(
        servers = handle.instances.len(),
        tools = endpoint.tool_count(),
        protocol = %dialect.protocol_version(),
        "Serving on stdio"
    );

    let served = tokio::select! {
        result = serve(endpoint, tokio::io::stdin(), tokio::io::stdout()) => result,
        () = cancel.cancelled() => Ok(()),
    };
    let stopped = manager.stop_all().await;
    served?;
    stopped?;
    Ok(())
}

fn print_plan(plan: &ResolvedRunPlan) {
    println!("Servers:");
    for spec in &plan.servers {
        println!("  {} [{}] — {} {}", spec.name, spec.origin, spec.command, spec.args.join(" "));
    }
    for collision in &plan.collisions {
        println!(
            "  ! '{}' from {} is shadowed by {}",
            collision.server, collision.shadowed, collision.kept
        );
    }
    if let Some(filter) = &plan.tool_filter {
        println!("Tools: {}", filter.names().collect::<Vec<_>>().join(", "));
    }
    if !plan.skill_tools.is_empty() {
        println!("Skill tools:");
        for tool in &plan.skill_tools {
            println!("  {} ({})", tool.definition.name, tool.skill);
        }
    }
}
