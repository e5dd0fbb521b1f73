//! Operator CLI

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use pgwarden::cluster::{ReplicationEngine, RestEngine};
use pgwarden::common::parse_duration;
use pgwarden::unit::ActionClient;
use pgwarden::verify::{
    ClusterControl, ContinuousWrites, DrillSettings, FailoverDrill, PgWriteCounter,
    WriteContinuityMonitor,
};
use pgwarden::{Config, Error, Result};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pgwarden")]
#[command(about = "pgwarden operator actions")]
#[command(version)]
struct Cli {
    /// Agent URL
    #[arg(long, default_value = "http://localhost:8080")]
    agent: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "60")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take a full backup from this unit
    CreateBackup,

    /// List backups in the stanza
    ListBackups,

    /// Restore a backup onto this unit
    Restore {
        /// Backup id, e.g. 2023-01-01T09:00:00Z
        backup_id: String,
    },

    /// Print the current primary unit
    GetPrimary,

    /// Print the operator password
    GetPassword,

    /// Print the engine's master_start_timeout
    GetMasterStartTimeout,

    /// Set master_start_timeout; omit the value to reset it
    SetMasterStartTimeout { seconds: Option<u64> },

    /// Print the agent status
    Status,

    /// Kill the database process on the primary and verify no write is lost
    Drill {
        /// Base URL of the continuous writes workload
        #[arg(long)]
        writes: String,

        /// Kill command; `{unit}`, `{member}` and `{process}` are substituted
        #[arg(
            long,
            num_args = 1..,
            default_value = "kubectl exec {member} -c postgresql -- pkill --signal SIGKILL -f {process}"
        )]
        kill: Vec<String>,

        /// Process to kill
        #[arg(long, default_value = "postgres")]
        process: String,

        /// master_start_timeout applied during the drill
        #[arg(long, default_value = "0")]
        master_start_timeout: u64,

        /// Gap between the two continuity samples, e.g. `15s`
        #[arg(long, default_value = "15s", value_parser = parse_duration)]
        window: Duration,
    },
}

/// Cluster control through an agent plus the engine REST port
struct LiveControl {
    agent: Arc<ActionClient>,
    engine: RestEngine,
    kill: Vec<String>,
}

#[async_trait]
impl ClusterControl for LiveControl {
    async fn primary(&self) -> Result<String> {
        self.agent.get_primary().await
    }

    async fn kill_process(&self, unit: &str, process: &str) -> Result<()> {
        let member = pgwarden::cluster::engine::unit_to_member(unit);
        let argv: Vec<String> = self
            .kill
            .iter()
            .flat_map(|word| word.split_whitespace())
            .map(|word| {
                word.replace("{unit}", unit)
                    .replace("{member}", &member)
                    .replace("{process}", process)
            })
            .collect();
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::InvalidConfig("empty kill command".into()));
        };
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await?;
        if !output.status.success() {
            return Err(Error::ToolFailed {
                command: argv.join(" "),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        tracing::info!(unit, process, "process killed");
        Ok(())
    }

    async fn member_ready(&self, unit: &str) -> Result<bool> {
        self.engine.member_healthy(unit).await
    }

    async fn master_start_timeout(&self) -> Result<Option<u64>> {
        self.agent.master_start_timeout().await
    }

    async fn set_master_start_timeout(&self, seconds: Option<u64>) -> Result<()> {
        self.agent.set_master_start_timeout(seconds).await
    }
}

/// The continuous writes workload over HTTP
struct HttpWrites {
    client: reqwest::Client,
    base_url: String,
}

#[async_trait]
impl ContinuousWrites for HttpWrites {
    async fn start(&self) -> Result<()> {
        let url = format!("{}/start", self.base_url);
        let response = self.client.post(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus {
                endpoint: url,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn stop(&self) -> Result<u64> {
        let url = format!("{}/stop", self.base_url);
        let response = self.client.post(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus {
                endpoint: url,
                status: response.status().as_u16(),
            });
        }
        let body: serde_json::Value = response.json().await?;
        body.get("writes")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| Error::Internal("workload did not report a write count".into()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let agent = Arc::new(ActionClient::new(
        cli.agent.as_str(),
        Duration::from_secs(cli.timeout),
    )?);

    match cli.command {
        Commands::CreateBackup => {
            println!("{}", agent.create_backup().await?);
        }

        Commands::ListBackups => {
            println!("{}", agent.list_backups().await?);
        }

        Commands::Restore { backup_id } => {
            println!("{}", agent.restore(Some(&backup_id)).await?);
        }

        Commands::GetPrimary => {
            println!("{}", agent.get_primary().await?);
        }

        Commands::GetPassword => {
            println!("{}", agent.get_password().await?);
        }

        Commands::GetMasterStartTimeout => match agent.master_start_timeout().await? {
            Some(seconds) => println!("{}", seconds),
            None => println!("unset"),
        },

        Commands::SetMasterStartTimeout { seconds } => {
            agent.set_master_start_timeout(seconds).await?;
            println!("master_start_timeout updated");
        }

        Commands::Status => {
            let status = agent.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        Commands::Drill {
            writes,
            kill,
            process,
            master_start_timeout,
            window,
        } => {
            let config = match Config::load() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(error = %e, "using default configuration");
                    Config::default()
                }
            };
            let password = agent.get_password().await?;
            let counter = Arc::new(PgWriteCounter::new(
                config.oracle.clone(),
                config.engine.host_suffix.clone(),
                password,
                agent.clone(),
            ));
            let control = Arc::new(LiveControl {
                agent: agent.clone(),
                engine: RestEngine::new(config.engine.clone(), "")?,
                kill,
            });
            let workload = Arc::new(HttpWrites {
                client: reqwest::Client::builder()
                    .timeout(Duration::from_secs(cli.timeout))
                    .build()?,
                base_url: writes.trim_end_matches('/').to_string(),
            });
            let settings = DrillSettings {
                process,
                master_start_timeout: Some(master_start_timeout),
                continuity_window: window,
                ..DrillSettings::default()
            };

            let drill = FailoverDrill::new(
                control,
                workload,
                WriteContinuityMonitor::new(counter),
                settings,
            );
            let report = drill.run().await?;
            println!("Drill report:");
            println!("  Old primary: {}", report.old_primary);
            println!("  New primary: {}", report.new_primary);
            println!("  Writes verified: {}", report.total_writes);
        }
    }

    Ok(())
}
