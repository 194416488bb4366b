//! polarisd: the Polaris daemon.
//!
//! Runs either the multi-cluster scheduler or the agent of one cluster.
//!
//! # Usage
//!
//! ```text
//! polarisd scheduler --config config/scheduler.toml
//! polarisd cluster-agent --config config/cluster-agent.toml
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,polarisd=debug,polaris=debug";

#[derive(Parser)]
#[command(name = "polarisd", about = "Polaris scheduler and cluster agent daemon")]
struct Cli {
    /// Log as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler.
    Scheduler {
        /// Scheduler config file (TOML).
        #[arg(long)]
        config: PathBuf,
    },
    /// Run the agent of a cluster.
    ClusterAgent {
        /// Cluster agent config file (TOML).
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_ctrl_c(cancel.clone()));

    match cli.command {
        Command::Scheduler { config } => {
            info!(config = %config.display(), "polarisd starting in scheduler mode");
            polarisd::scheduler::run(&config, cancel).await
        }
        Command::ClusterAgent { config } => {
            info!(config = %config.display(), "polarisd starting in cluster agent mode");
            polarisd::cluster_agent::run(&config, cancel).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "failed to listen for the shutdown signal");
            return;
        }
    }
    cancel.cancel();
}
