mod approve;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use halyard_core::{Approver, Config, FixedApprover, FunctionCall, TurnOutcome, TurnScheduler};
use halyard_mcp::McpManager;
use halyard_tools::shell::SHELL_TOOL_NAME;
use halyard_tools::{
    ConfirmationGate, ConfirmationOutcome, SessionApprovals, ToolCatalog, ToolEvent,
    check_command_permissions,
};
use tokio_util::sync::CancellationToken;

use crate::approve::TerminalApprover;

#[derive(Debug, Parser)]
#[command(name = "halyard", version, about = "Safety-gated tool execution for coding agents")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate a shell command against the configured policy.
    Check { command: String },
    /// Run a shell command through the policy, confirmation, and process runner.
    Exec {
        command: String,
        /// Working directory relative to the workspace root.
        #[arg(long)]
        directory: Option<String>,
        /// Answer every confirmation with "allow once".
        #[arg(long, short)]
        yes: bool,
    },
    /// List every available tool.
    Tools {
        /// Skip MCP server discovery.
        #[arg(long)]
        no_mcp: bool,
        #[arg(long, value_enum, default_value_t = ToolsFormat::List)]
        format: ToolsFormat,
    },
    /// Connect to configured MCP servers and report what they offer.
    Mcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ToolsFormat {
    /// One line per tool.
    List,
    /// The plain-text listing handed to models without function calling.
    Prompt,
    /// Function declarations as JSON.
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config);
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    tracing::debug!(path = %config_path.display(), "configuration loaded");

    match cli.command {
        Command::Check { command } => {
            check(&config, &command);
            Ok(())
        }
        Command::Exec {
            command,
            directory,
            yes,
        } => exec(&config, command, directory, yes).await,
        Command::Tools { no_mcp, format } => list_tools(&config, !no_mcp, format).await,
        Command::Mcp => report_mcp(&config).await,
    }
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var("HALYARD_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

fn check(config: &Config, command: &str) {
    let verdict = check_command_permissions(command, &config.tools.policy, None);
    if verdict.all_allowed {
        println!("allowed");
        return;
    }
    if verdict.is_hard_denial {
        println!("denied (hard)");
    } else {
        println!("needs confirmation");
    }
    for cmd in &verdict.disallowed_commands {
        println!("  not allowed: {cmd}");
    }
    if let Some(reason) = verdict.block_reason {
        println!("  reason: {reason}");
    }
}

fn builtin_catalog(config: &Config) -> anyhow::Result<ToolCatalog> {
    let mut catalog = ToolCatalog::new();
    let corrector = Arc::new(config.llm_provider());
    for tool in halyard_tools::builtin_tools(
        &config.tools,
        &config.tools.policy,
        config.workspace_root()?,
        corrector,
    ) {
        catalog.register(tool);
    }
    Ok(catalog)
}

async fn exec(
    config: &Config,
    command: String,
    directory: Option<String>,
    yes: bool,
) -> anyhow::Result<()> {
    let catalog = Arc::new(builtin_catalog(config)?);
    if catalog.get(SHELL_TOOL_NAME).is_none() {
        bail!("{SHELL_TOOL_NAME} is excluded by configuration");
    }

    let session = Arc::new(SessionApprovals::new(config.tools.policy.approval_mode));
    let gate = ConfirmationGate::new(config.tools.policy.clone(), session);
    let approver: Arc<dyn Approver> = if yes {
        Arc::new(FixedApprover(ConfirmationOutcome::ProceedOnce))
    } else {
        Arc::new(TerminalApprover)
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            match event {
                ToolEvent::OutputChunk { chunk, .. } => {
                    let _ = stdout.write_all(chunk.as_bytes());
                    let _ = stdout.flush();
                }
                ToolEvent::BinaryProgress { bytes_received, .. } => {
                    eprintln!("[receiving binary output: {bytes_received} bytes]");
                }
                ToolEvent::Started { description, .. } => {
                    tracing::debug!("started: {description}");
                }
                ToolEvent::Completed { success, .. } => {
                    tracing::debug!(success, "completed");
                }
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling");
            ctrl_c.cancel();
        }
    });

    let mut args = serde_json::json!({ "command": command });
    if let Some(dir) = directory {
        args["directory"] = serde_json::Value::String(dir);
    }
    let mut scheduler = TurnScheduler::new(catalog, gate, approver).with_events(tx);
    let call = FunctionCall {
        id: "cli-0".into(),
        name: SHELL_TOOL_NAME.into(),
        args,
    };
    let outcome = scheduler.run_turn(vec![call], &cancel).await;
    drop(scheduler);
    let _ = printer.await;

    let cancelled = matches!(outcome, TurnOutcome::Cancelled(_));
    let Some(result) = outcome.into_results().into_iter().next() else {
        bail!("command was not run");
    };
    match result.result.error {
        Some(failure) => bail!("{}: {}", failure.kind, failure.message),
        None if cancelled => bail!("cancelled"),
        None => Ok(()),
    }
}

async fn discover(config: &Config, catalog: &mut ToolCatalog) -> Arc<McpManager> {
    let manager = Arc::new(McpManager::new(config.mcp_entries()));
    if manager.server_count() > 0 {
        let tools = manager.connect_all().await;
        let registered = halyard_mcp::register_discovered(catalog, &manager, tools);
        tracing::info!(registered, "MCP tools registered");
    }
    manager
}

async fn list_tools(config: &Config, with_mcp: bool, format: ToolsFormat) -> anyhow::Result<()> {
    let mut catalog = builtin_catalog(config)?;
    let manager = if with_mcp {
        Some(discover(config, &mut catalog).await)
    } else {
        None
    };

    let rendered = render_tools(&catalog, format);
    if let Some(manager) = manager {
        manager.shutdown_all().await;
    }
    println!("{}", rendered?);
    Ok(())
}

fn render_tools(catalog: &ToolCatalog, format: ToolsFormat) -> anyhow::Result<String> {
    match format {
        ToolsFormat::Prompt => Ok(catalog.format_for_prompt()),
        ToolsFormat::Json => Ok(serde_json::to_string_pretty(&catalog.declarations())?),
        ToolsFormat::List => {
            let lines: Vec<String> = catalog
                .all()
                .iter()
                .map(|tool| {
                    let decl = tool.declaration();
                    let summary = decl.description.lines().next().unwrap_or_default();
                    match tool.server_name() {
                        Some(server) => format!("{:<32} [{server}] {summary}", decl.name),
                        None => format!("{:<32} {summary}", decl.name),
                    }
                })
                .collect();
            Ok(lines.join("\n"))
        }
    }
}

async fn report_mcp(config: &Config) -> anyhow::Result<()> {
    if config.mcp.servers.is_empty() {
        println!("no MCP servers configured");
        return Ok(());
    }
    let mut catalog = ToolCatalog::new();
    let manager = discover(config, &mut catalog).await;
    let connected = manager.connected_servers().await;

    for server in &config.mcp.servers {
        if connected.contains(&server.id) {
            let tools = catalog.by_server(&server.id);
            println!("{} (connected, {} tools)", server.id, tools.len());
            for tool in tools {
                println!("  {}", tool.declaration().name);
            }
        } else {
            println!("{} (failed to connect)", server.id);
        }
    }
    manager.shutdown_all().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_exec_with_flags() {
        let cli = Cli::parse_from([
            "halyard", "--config", "custom.toml", "exec", "ls -la", "--directory", "src", "-y",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        let Command::Exec {
            command,
            directory,
            yes,
        } = cli.command
        else {
            panic!("expected exec");
        };
        assert_eq!(command, "ls -la");
        assert_eq!(directory.as_deref(), Some("src"));
        assert!(yes);
    }

    #[test]
    fn explicit_config_path_wins() {
        assert_eq!(
            resolve_config_path(Some(PathBuf::from("a.toml"))),
            PathBuf::from("a.toml")
        );
    }

    #[test]
    fn parses_tools_format() {
        let cli = Cli::parse_from(["halyard", "tools", "--no-mcp", "--format", "json"]);
        let Command::Tools { no_mcp, format } = cli.command else {
            panic!("expected tools");
        };
        assert!(no_mcp);
        assert_eq!(format, ToolsFormat::Json);

        let cli = Cli::parse_from(["halyard", "tools"]);
        assert!(matches!(
            cli.command,
            Command::Tools {
                format: ToolsFormat::List,
                ..
            }
        ));
    }

    fn test_catalog() -> ToolCatalog {
        let mut config = Config::default();
        config.tools.workspace_root = Some(std::env::temp_dir());
        builtin_catalog(&config).unwrap()
    }

    #[test]
    fn tools_render_as_prompt_listing() {
        let out = render_tools(&test_catalog(), ToolsFormat::Prompt).unwrap();
        assert!(out.starts_with("<tools>"));
        assert!(out.contains(&format!("## {SHELL_TOOL_NAME}")));
    }

    #[test]
    fn tools_render_as_json_declarations() {
        let out = render_tools(&test_catalog(), ToolsFormat::Json).unwrap();
        let decls: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(decls.len(), 5);
        assert!(decls.iter().any(|d| d["name"] == SHELL_TOOL_NAME));
    }

    #[test]
    fn tools_render_as_list() {
        let out = render_tools(&test_catalog(), ToolsFormat::List).unwrap();
        assert_eq!(out.lines().count(), 5);
        assert!(out.lines().any(|l| l.starts_with(SHELL_TOOL_NAME)));
    }

    #[test]
    fn builtin_catalog_honors_exclusions() {
        let mut config = Config::default();
        config.tools.workspace_root = Some(std::env::temp_dir());
        config.tools.policy.excluded = vec!["web_fetch".into()];
        let catalog = builtin_catalog(&config).unwrap();
        assert!(catalog.get("web_fetch").is_none());
        assert!(catalog.get(SHELL_TOOL_NAME).is_some());
        assert_eq!(catalog.len(), 4);
    }
}
