//! remcd: the REMC daemon.
//!
//! Assembles the REMC subsystems in one binary:
//! - State store (redb)
//! - Backend registry (multipass VMs, Kubernetes pods)
//! - Health probe for control nodes
//! - Orchestrator tasks
//! - REST API
//!
//! # Usage
//!
//! ```text
//! remcd --config /etc/remc/remc.toml serve
//! remcd job create --replicas 8 --definition defs/ising.py
//! remcd job start <id> --watch
//! remcd job scale <id> 12
//! ```

mod jobs;
mod logging;
mod serve;
mod wiring;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use remc_core::RemcConfig;

const DEFAULT_CONFIG: &str = "/etc/remc/remc.toml";

#[derive(Debug, Parser)]
#[command(name = "remcd", about = "Replica-exchange Monte Carlo job orchestrator")]
struct Cli {
    /// Configuration file. Defaults to /etc/remc/remc.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State store file, overriding `[storage].path`.
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the REST API.
    Serve {
        /// Listen address, overriding `[api].bind`.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run a single job task and exit.
    #[command(subcommand)]
    Job(jobs::JobCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(state) = cli.state {
        config.storage.path = state;
    }
    logging::init(&config.logging);
    let config = Arc::new(config);

    match cli.command {
        Command::Serve { bind } => serve::run(config, bind).await,
        Command::Job(command) => jobs::run(config, command).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RemcConfig> {
    if let Some(path) = path {
        return Ok(RemcConfig::from_file(path)?);
    }
    let default = Path::new(DEFAULT_CONFIG);
    if default.exists() {
        return Ok(RemcConfig::from_file(default)?);
    }
    Ok(RemcConfig::default())
}
