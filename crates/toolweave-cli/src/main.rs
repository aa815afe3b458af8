//! CLI entry point for toolweave.
//!
//! The `toolweave` command connects to the remote tool servers listed in a
//! config file and lets you inspect their catalogs or call a tool directly.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use toolweave_mcp::{McpClientPool, ServersConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Toolweave: remote tool servers from the command line.
#[derive(Parser)]
#[command(name = "toolweave", version, about = "Inspect and call remote tool servers")]
struct Cli {
    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a server config and list its servers.
    Servers {
        /// Server config file (JSON, or TOML with a `.toml` extension).
        #[arg(short, long, default_value = "mcp_servers.json")]
        config: PathBuf,
    },

    /// Connect to every server and list the tools they offer.
    Tools {
        #[arg(short, long, default_value = "mcp_servers.json")]
        config: PathBuf,
    },

    /// Call one tool and print its rendered result.
    Call {
        #[arg(short, long, default_value = "mcp_servers.json")]
        config: PathBuf,

        /// Tool name.
        tool: String,

        /// Arguments as a JSON object.
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    match cli.command {
        Commands::Servers { config } => cmd_servers(&config),
        Commands::Tools { config } => cmd_tools(&config).await,
        Commands::Call { config, tool, args } => cmd_call(&config, &tool, &args).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn cmd_servers(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    for (name, server) in config.iter() {
        println!("{name}\t{}\t{}", server.transport, server.url);
    }
    Ok(())
}

async fn cmd_tools(path: &Path) -> Result<()> {
    let pool = connect(path).await?;
    let outcome = pool.fetch_tools().await;
    pool.close().await;

    let tools = outcome.context("failed to list tools")?;
    info!(count = tools.len(), "tools discovered");
    println!("{}", serde_json::to_string_pretty(&tools)?);
    Ok(())
}

async fn cmd_call(path: &Path, tool: &str, args: &str) -> Result<()> {
    let arguments = parse_args(args)?;
    let pool = connect(path).await?;
    let outcome = pool.execute_tool(tool, &arguments).await;
    pool.close().await;

    let rendered = outcome.with_context(|| format!("tool `{tool}` failed"))?;
    println!("{rendered}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<ServersConfig> {
    ServersConfig::load(path)
        .with_context(|| format!("failed to load server config from {}", path.display()))
}

async fn connect(path: &Path) -> Result<McpClientPool> {
    let config = load_config(path)?;
    if config.is_empty() {
        bail!("{} lists no servers", path.display());
    }
    McpClientPool::connect(&config)
        .await
        .context("failed to connect to tool servers")
}

fn parse_args(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("--args must be valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--args must be a JSON object, got {other}"),
    }
}

fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
