use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ledger_payer::config::{load_config, resolve_config_path};
use ledger_payer::env::EnvOverrides;
use ledger_payer::supervisor::{shutdown_signal, ProcessLauncher, RestartPolicy, Supervisor};
use ledger_payer::worker;

#[derive(Parser)]
#[command(name = "ledger-payer", version, about = "Pays ledger transfers requested over RabbitMQ RPC")]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Keep one worker process running, restarting it whenever it exits
    Supervise,
    /// Serve payment requests in this process
    Worker {
        /// Exit when stdin closes; set by the supervisor
        #[arg(long, hide = true)]
        supervised: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Supervise) {
        Command::Worker { supervised } => run_worker(cli.config, supervised),
        Command::Supervise => run_supervisor(cli.config),
    }
}

fn run_worker(config_path: Option<PathBuf>, supervised: bool) -> Result<()> {
    let config = load_config(config_path.as_deref())?;

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let result = runtime.block_on(worker::run(config, supervised));
    // The stdin watch sits in a blocking read that would hold up a normal shutdown.
    runtime.shutdown_background();
    if let Err(e) = &result {
        error!("Worker failed: {:#}", e);
    }
    result
}

fn run_supervisor(config_path: Option<PathBuf>) -> Result<()> {
    // A bad config fails here, before any worker is started.
    let config = load_config(config_path.as_deref())?;
    let config_path = resolve_config_path(config_path.as_deref(), &EnvOverrides::load())?;

    let launcher = ProcessLauncher::current_exe(Some(&config_path))?;
    let policy = RestartPolicy::from(&config.supervisor);

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let launches = runtime.block_on(Supervisor::new(launcher, policy).run(shutdown_signal()));

    info!("Supervisor stopped after {} worker launches", launches);
    Ok(())
}
