//! MDM Agent - Main Entry Point
//!
//! Runs the agent against the broker named in the config file until SIGINT
//! or SIGTERM. SIGUSR1 triggers an inventory report.

use clap::{Parser, Subcommand};
use mdm_agent::agent::AgentService;
use mdm_agent::capability::TracingCapabilities;
use mdm_agent::config::AgentConfig;
use mdm_agent::connection::ConnectOutcome;
use mdm_agent::observability::init_default_logging;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// MDM agent: broker session and command routing
#[derive(Parser)]
#[command(name = "mdm-agent")]
#[command(about = "Device management agent for an MQTT management broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MDM_AGENT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and process commands until interrupted
    Run,
    /// Validate the configuration file
    Config {
        /// Print the parsed configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting MDM agent v{}", env!("CARGO_PKG_VERSION"));

    let config_path = match resolve_config_path(cli.config) {
        Some(path) => path,
        None => {
            error!(
                "No configuration file found. Provide one with -c/--config or create mdm-agent.toml"
            );
            process::exit(1);
        }
    };

    info!("Loading configuration from: {}", config_path.display());
    let config = match AgentConfig::load_from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_agent(config, &config_path).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }
    ["mdm-agent.toml", "config/mdm-agent.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

async fn run_agent(
    config: AgentConfig,
    config_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let agent = AgentService::from_config(&config, config_path, Arc::new(TracingCapabilities));

    match agent.start().await {
        Ok(ConnectOutcome::Started(generation)) => {
            info!(
                generation = %generation,
                "Connecting to {}:{}", config.broker.host, config.broker.port
            )
        }
        Ok(ConnectOutcome::AlreadyConnected) => {}
        // The reconnect timer is already running
        Err(e) if e.is_retryable() => warn!("Initial connect failed, retrying: {}", e),
        Err(e) => return Err(e.into()),
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut sigusr1 = signal::unix::signal(signal::unix::SignalKind::user_defined1())?;

    info!("Agent is running and waiting for commands");

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            _ = sigusr1.recv() => {
                if let Err(e) = agent.request_inventory().await {
                    warn!("Inventory not run: {}", e);
                }
            }
        }
    }

    agent.shutdown().await;
    Ok(())
}

fn handle_config_command(
    config: &AgentConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        let mut shown = config.clone();
        if shown.broker.secret.is_some() {
            shown.broker.secret = Some("***".to_string());
        }
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&shown)?);
    }

    if !config.broker.resolve().has_secret() {
        warn!("No broker secret resolved; connect attempts will be aborted");
    }

    info!("Configuration validation complete");
    Ok(())
}
