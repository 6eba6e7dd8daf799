use anyhow::Result;
use clap::{Parser, Subcommand};
use pocket_bus::{MessageBus, OutboundMessage};
use pocket_channels::ChannelManager;
use pocket_config::Config;
use pocket_mcp::McpManager;
use pocket_tools::ToolRegistry;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pocketbot")]
#[command(about = "Personal assistant gateway for chat channels with MCP tools", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.pocketbot/config.yaml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect MCP servers and run the enabled chat channels until Ctrl-C
    Gateway {
        /// Answer every inbound message with its own text
        #[arg(long, action = clap::ArgAction::SetTrue)]
        echo: bool,
    },

    /// List the tools discovered from configured MCP servers
    Tools,

    /// Show configured MCP servers and enabled channels
    Status,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let config_path = cli.config.unwrap_or_else(Config::default_config_path);
    let config = if config_path.exists() {
        info!("Loading configuration from: {:?}", config_path);
        Config::from_yaml(&config_path)?
    } else {
        info!("No configuration at {:?}, using defaults", config_path);
        Config::default()
    };

    match cli.command {
        Commands::Gateway { echo } => run_gateway(config, echo).await?,
        Commands::Tools => list_tools(&config).await?,
        Commands::Status => show_status(&config)?,
    }

    Ok(())
}

async fn run_gateway(config: Config, echo: bool) -> Result<()> {
    let registry = Arc::new(ToolRegistry::new());
    let mut mcp = McpManager::new(Arc::clone(&registry));
    mcp.connect_servers(&config.tools.mcp_servers).await;

    let bus = Arc::new(MessageBus::new());
    let channels = ChannelManager::from_config(&config, Arc::clone(&bus))
        .with_stop_timeout(Duration::from_secs(config.gateway.channel_stop_timeout_secs));

    info!(
        "Gateway starting: {} tools, channels: [{}]",
        registry.len(),
        channels.enabled_channels().join(", ")
    );

    let echo_task = echo.then(|| tokio::spawn(echo_loop(Arc::clone(&bus))));

    tokio::select! {
        result = channels.start_all() => {
            if let Err(e) = result {
                error!("Channels failed to start: {}", e);
            }
            info!("All channels exited");
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received Ctrl-C, shutting down");
        }
    }

    channels.stop_all().await;
    if let Some(task) = echo_task {
        task.abort();
    }
    mcp.close_all().await;

    info!("Gateway stopped");
    Ok(())
}

/// Loop inbound messages straight back to their chat.
async fn echo_loop(bus: Arc<MessageBus>) {
    while let Some(inbound) = bus.consume_inbound().await {
        let reply = OutboundMessage::reply(&inbound, inbound.content.clone());
        if let Err(e) = bus.publish_outbound(reply) {
            warn!("Echo reply dropped: {}", e);
        }
    }
}

async fn list_tools(config: &Config) -> Result<()> {
    let registry = Arc::new(ToolRegistry::new());
    let mut mcp = McpManager::new(Arc::clone(&registry));
    let report = mcp.connect_servers(&config.tools.mcp_servers).await;

    println!("\nAvailable Tools:");
    println!("═══════════════════════════════════════");
    for tool in registry.get_all() {
        println!("\n{}", tool.name());
        println!("   {}", tool.description());
    }
    if registry.is_empty() {
        println!("\n(no tools registered)");
    }
    for (server, cause) in &report.failed {
        println!("\n[failed] {}: {}", server, cause);
    }
    println!();

    mcp.close_all().await;
    Ok(())
}

fn show_status(config: &Config) -> Result<()> {
    let servers: serde_json::Map<String, serde_json::Value> = config
        .tools
        .mcp_servers
        .iter()
        .map(|(name, server)| {
            let transport = server
                .transport()
                .map(|spec| spec.kind())
                .unwrap_or("unconfigured");
            (name.clone(), json!({ "transport": transport }))
        })
        .collect();

    let channels = ChannelManager::from_config(config, Arc::new(MessageBus::new()));
    let status = json!({
        "mcp_servers": servers,
        "channels": channels.get_status(),
    });

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
