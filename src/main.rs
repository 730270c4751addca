//! mcp-connect command line entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use mcp_connect::client::{normalize_tools_from_primitives, ConnectionRequest, McpClient};
use mcp_connect::config;
use mcp_connect::logging;
use mcp_connect::mcp::ToolArguments;
use mcp_connect::TransportType;

/// Talk to an MCP server over WebSocket, SSE or Streamable HTTP
#[derive(Parser)]
#[command(name = "mcp-connect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server URI (defaults to the configured URI for the transport)
    #[arg(short, long, global = true)]
    uri: Option<String>,

    /// Transport: sse, websocket or streamable-http (detected from the URI if omitted)
    #[arg(short, long, global = true)]
    transport: Option<TransportType>,

    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration and MCP_CONNECT_LOG_LEVEL
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List resources, tools and prompts
    Primitives,
    /// List tools in normalized form
    Tools,
    /// Call a tool
    Call {
        /// Tool name
        name: String,
        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
    /// Check that the server answers
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_or_default(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    let level = cli.log_level.as_deref().unwrap_or(&config.global.log_level);
    logging::init(level);

    let transport_type = match (cli.transport, cli.uri.as_deref()) {
        (Some(t), _) => t,
        (None, Some(uri)) => mcp_connect::client::detect_transport_type(uri),
        (None, None) => TransportType::StreamableHttp,
    };
    let uri = cli
        .uri
        .clone()
        .unwrap_or_else(|| config.default_uri(transport_type).to_string());

    let client = Arc::new(McpClient::from_config(config));
    client
        .connect(ConnectionRequest::new(&uri, transport_type))
        .await
        .with_context(|| format!("Failed to connect to {}", uri))?;
    info!("Connected to {} over {:?}", uri, client.active_transport_type());

    let outcome = run(&client, cli.command).await;
    client.disconnect().await;
    outcome
}

async fn run(client: &McpClient, command: Command) -> Result<()> {
    match command {
        Command::Primitives => {
            let primitives = client.get_primitives().await?;
            println!("{}", serde_json::to_string_pretty(&primitives.into_flat())?);
        }
        Command::Tools => {
            let primitives = client.get_primitives().await?.into_flat();
            let tools = normalize_tools_from_primitives(&primitives);
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }
        Command::Call { name, args } => {
            let arguments: ToolArguments =
                serde_json::from_str(&args).context("--args must be a JSON object")?;
            let result = client.call_tool(&name, arguments).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.is_error() {
                bail!("Tool {} reported an error", name);
            }
        }
        Command::Check => {
            let health = client.check_health().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
            if !health.status.is_healthy() {
                bail!("Server is not healthy");
            }
        }
    }
    Ok(())
}
