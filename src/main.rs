//! Edgelink CLI
//!
//! Runs either side of the tunnel: the public edge server or the private-side
//! agent that forwards traffic to a local service.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgelink_agent::{AgentArgs, TunnelClient};
use edgelink_edge::{EdgeArgs, EdgeServer};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Edgelink - Reach a private HTTP/WebSocket service through a public edge
#[derive(Parser, Debug)]
#[command(name = "edgelink")]
#[command(about = "Edgelink - Reach a private HTTP/WebSocket service through a public edge")]
#[command(version)]
#[command(long_version = concat!(
    env!("GIT_TAG"),
    "\nCommit: ", env!("GIT_HASH"),
    "\nBuilt: ", env!("BUILD_TIME")
))]
struct Cli {
    /// Log level (trace, debug, info, warn, error) or a tracing filter
    #[arg(long, env = "LOG_LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the public edge server
    #[command(long_about = r#"
Run the public edge server. Public clients reach the private service through
it; agents connect to its tunnel path and present one of the tenant tokens.

EXAMPLES:
  edgelink edge --tenant 3f1c9a --port 3000 --cookie-domain example.com

ENVIRONMENT VARIABLES:
  URL_PREFIX    Tenant token(s), comma separated
  PORT          Port to listen on
  DOMAIN        Cookie domain
  TUNNEL_PATH   Path where agents connect
    "#)]
    Edge(EdgeArgs),

    /// Run the private-side agent
    #[command(long_about = r#"
Connect to an edge server and forward the traffic it relays to a local
service. Reconnects automatically when the connection drops.

EXAMPLES:
  edgelink agent --remote-url wss://edge.example.com --token 3f1c9a \
    --local-url http://homeassistant.local:8123

  edgelink agent -c agent.yaml

ENVIRONMENT VARIABLES:
  REMOTE_WS_URL             Edge server URL
  SOCKET_TOKEN              Tenant token
  LOCAL_HOME_ASSISTANT_URL  Base URL of the local service
    "#)]
    Agent(AgentArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Edge(args) => {
            setup_logging(cli.log_level.as_deref().unwrap_or("info"))?;
            run_edge(args).await
        }
        Commands::Agent(args) => {
            let config = args
                .into_config()
                .context("Invalid agent configuration")?;
            let log_level = cli
                .log_level
                .or_else(|| config.log_level.clone())
                .unwrap_or_else(|| "info".to_string());
            setup_logging(&log_level)?;

            if let Some(path) = &config.config_file {
                info!("Loaded configuration from: {}", path.display());
            }
            if config.generated_agent_id {
                info!("Auto-generated agent ID: {}", config.agent_id);
            }
            info!("Starting agent {}", config.agent_id);
            let client = TunnelClient::new(config).context("Failed to create agent")?;

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down...");
                    Ok(())
                }
                result = client.run() => {
                    if let Err(e) = &result {
                        error!("Agent error: {}", e);
                    }
                    result.context("Agent stopped")
                }
            }
        }
    }
}

async fn run_edge(args: EdgeArgs) -> Result<()> {
    let config = args.into_config().context("Invalid edge configuration")?;
    let mut handle = EdgeServer::new(config)?
        .bind()
        .await
        .context("Failed to start edge server")?;

    let stopped = tokio::select! {
        _ = tokio::signal::ctrl_c() => false,
        result = handle.wait() => {
            result.context("Edge server failed")?;
            true
        }
    };

    if !stopped {
        info!("Received Ctrl+C, shutting down...");
        handle.shutdown().await?;
    }
    info!("Edge server stopped");
    Ok(())
}

/// Setup logging based on log level
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}
