//! Node Agent CLI Entry Point
//!
//! This is the main entry point for the node-agent binary.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use node_agent::agent::sampler::{SysinfoSampler, SystemSampler, UnavailableSampler};
use node_agent::cli::config::{Config, ConfigLayer, ConfigSources, DaemonConfig};
use node_agent::cli::install::{InstallOutcome, Installer};
use node_agent::connection::registrar::Registrar;
use node_agent::runtime::docker::DockerClient;

#[derive(Parser)]
#[command(name = "node-agent")]
#[command(author, version, about = "Haven node agent - registers this docker host with the cluster manager")]
#[command(after_help = concat!(
    "Example:\n  node-agent -d 172.31.0.12:2375 -m 172.31.0.3:8762 -t 2 -vv\n  node-agent install -u node-agent\n\nSample config:\n\n",
    include_str!("../config/sample.toml")
))]
struct Cli {
    /// ip and port of docker service
    #[arg(short, long, global = true)]
    docker: Option<String>,

    /// ip and port of the cluster manager
    #[arg(short, long, global = true)]
    master: Option<String>,

    /// secret for auth on the cluster manager
    #[arg(short, long, global = true)]
    secret: Option<String>,

    /// seconds between node registration updates
    #[arg(short, long, global = true)]
    timeout: Option<u64>,

    /// logging level, -v is INFO, -vv is DEBUG
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// path to config file
    #[arg(short = 'f', long, global = true)]
    config: Option<PathBuf>,

    /// do not sample host cpu, memory, disk and network metrics
    #[arg(long, global = true)]
    no_metrics: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent daemon (the default)
    Daemon,
    /// Install the agent into OS startup scripts
    Install {
        /// User which runs the installed daemon, created if absent; root when omitted
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Remove the agent binary, its config and unit files
    Uninstall,
}

impl Cli {
    fn flags(&self) -> ConfigLayer {
        ConfigLayer {
            docker: self.docker.clone(),
            master: self.master.clone(),
            secret: self.secret.clone(),
            timeout: self.timeout,
            log_level: (self.verbose > 0).then_some(self.verbose),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let sources = ConfigSources::discover(cli.config.clone());
    let config = Config::resolve(&sources, cli.flags())?;

    // Initialize logging
    let log_level = match config.log_level {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(files = ?config.files_read, config = %config, "Configuration resolved");

    match cli.command.unwrap_or(Commands::Daemon) {
        Commands::Daemon => {
            let daemon = config.daemon()?;
            if cli.no_metrics {
                run_daemon(daemon, UnavailableSampler).await;
            } else {
                run_daemon(daemon, SysinfoSampler::new()).await;
            }
        }
        Commands::Install { user } => {
            let installer = Installer::for_current_exe(user)?;
            if installer.install().context("Install failed")? == InstallOutcome::AlreadyInstalled {
                warn!("Nothing installed; run `node-agent uninstall` first");
            }
        }
        Commands::Uninstall => {
            Installer::for_current_exe(None)?.uninstall();
        }
    }

    Ok(())
}

async fn run_daemon<S: SystemSampler>(config: DaemonConfig, sampler: S) {
    warn!(docker = %config.docker, master = %config.master, "Run as daemon");

    let mut docker = DockerClient::new(&config.docker);
    match docker.id().await {
        Ok(id) => info!(runtime_id = %id, "Docker runtime reachable"),
        Err(e) => warn!(error = %e, "Docker runtime not reachable yet"),
    }

    let mut registrar = Registrar::new(&config.master, docker, sampler, config.interval, config.secret);
    registrar.run(shutdown_signal()).await;
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
