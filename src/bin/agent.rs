//! Unit agent binary

use clap::{Parser, Subcommand};
use pgwarden::{Agent, Config};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pgwarden-agent")]
#[command(about = "pgwarden unit agent: failover tracking and backup orchestration")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agent for one unit
    Serve {
        /// Unit name, `<app>/<ordinal>`
        #[arg(long)]
        unit: Option<String>,

        /// Namespace the application runs in
        #[arg(long)]
        namespace: Option<String>,

        /// Bind address for the action API
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Peer units (comma-separated)
        #[arg(long, value_delimiter = ',')]
        peers: Vec<String>,

        /// Units the platform plans to run
        #[arg(long)]
        planned_units: Option<usize>,

        /// Peer state file
        #[arg(long)]
        peer_state: Option<PathBuf>,

        /// Seconds the primary may be unresponsive before failover
        #[arg(long)]
        master_start_timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            unit,
            namespace,
            bind,
            peers,
            planned_units,
            peer_state,
            master_start_timeout,
        } => {
            // File and environment first, CLI flags win
            let mut config = Config::load()?;
            if let Some(unit) = unit {
                if let Some((app, _)) = unit.rsplit_once('/') {
                    config.unit.app = app.to_string();
                }
                config.unit.name = unit;
            }
            if let Some(namespace) = namespace {
                config.unit.namespace = namespace;
            }
            if let Some(bind) = bind {
                config.unit.bind_addr = bind;
            }
            if !peers.is_empty() {
                config.unit.peers = peers;
            }
            if let Some(planned) = planned_units {
                config.unit.planned_units = planned;
            }
            if let Some(path) = peer_state {
                config.unit.peer_state_path = path;
            }
            if let Some(seconds) = master_start_timeout {
                config.failover.master_start_timeout_secs = seconds;
            }
            config.validate()?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let agent = Arc::new(Agent::from_config(&config)?);
            agent.serve(&config).await?;
        }
    }

    Ok(())
}
