//! mcp-relay command line host
//!
//! Loads configuration, builds the gateway, and runs one operation against
//! the remote MCP server. Results are printed as pretty JSON.

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use mcp_relay::config::{GatewayConfig, ENV_REMOTE_URL};
use mcp_relay::mcp::{CapabilityMirror, InMemoryRegistry, ProxyGateway};

#[derive(Parser)]
#[command(name = "mcp-relay")]
#[command(about = "Client-side gateway for a remote MCP server")]
struct Cli {
    /// Config file (default: <config_dir>/mcp-relay/config.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-step deadline in milliseconds, overriding configuration
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect, mirror every remote capability, and print the bindings
    Mirror,
    /// Call a remote tool
    CallTool {
        name: String,
        /// Tool arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },
    /// Read a remote resource
    ReadResource { uri: String },
    /// Render a remote prompt
    GetPrompt {
        name: String,
        /// Prompt arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },
    /// Connect and ping the session
    Health,
}

fn parse_args(raw: Option<&str>) -> anyhow::Result<Value> {
    match raw {
        None => Ok(Value::Null),
        Some(raw) => {
            serde_json::from_str(raw).with_context(|| format!("--args is not valid JSON: {}", raw))
        }
    }
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config =
        GatewayConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(timeout_ms) = cli.timeout_ms {
        config.request_timeout_ms = timeout_ms;
    }

    if config.remote_url.is_none() {
        warn!("{} not configured, external MCP proxy disabled", ENV_REMOTE_URL);
        return Ok(());
    }

    let gateway = Arc::new(ProxyGateway::from_config(&config)?);
    info!(
        "Using {} credentials for {}",
        config.credential_mode(),
        gateway.remote_url().unwrap_or_default()
    );

    let outcome = run(cli.command, &gateway).await;
    gateway.close().await;
    outcome
}

async fn run(command: Command, gateway: &Arc<ProxyGateway>) -> anyhow::Result<()> {
    match command {
        Command::Mirror => {
            gateway.connect().await.context("failed to connect to remote MCP server")?;
            let registry = Arc::new(InMemoryRegistry::new());
            let mirror = CapabilityMirror::new(gateway.clone(), registry.clone());
            let report = mirror.mirror().await;
            if report.is_partial() {
                warn!("Mirroring was partial; see report for failed categories");
            }

            let bindings: Vec<Value> = mirror.bindings().iter().map(|b| b.summary()).collect();
            print_json(&json!({
                "report": report,
                "tools": mirror.loaded_tools(),
                "resources": mirror.loaded_resources(),
                "prompts": mirror.loaded_prompts(),
                "bindings": bindings,
            }))
        }
        Command::CallTool { name, args } => {
            let args = parse_args(args.as_deref())?;
            let result = gateway.call_tool(&name, args).await?;
            print_json(&result)
        }
        Command::ReadResource { uri } => {
            let result = gateway.read_resource(&uri).await?;
            print_json(&result)
        }
        Command::GetPrompt { name, args } => {
            let args = parse_args(args.as_deref())?;
            let result = gateway.get_prompt(&name, args).await?;
            print_json(&result)
        }
        Command::Health => {
            let connected = gateway.connect().await;
            let health = gateway.check_health().await;
            print_json(&json!({
                "health": health,
                "session": gateway.session_info(),
            }))?;
            connected.context("failed to connect to remote MCP server")
        }
    }
}
