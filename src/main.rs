mod bot;
mod command;
mod config;
mod dispatcher;
mod scheduler;
mod transport;
mod webhook;
mod worker;

#[cfg(test)]
mod testing;

use bot::Orchestrator;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "onebot", version, about = "OneBot command orchestrator")]
struct Cli {
    /// Configuration file; falls back to the newest file in ./configs
    #[arg(short, long, global = true, default_value = "./configs/last.yaml")]
    config: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the webhook and run commands (default)
    Run,
    /// Execute one command task handed over on stdin
    #[command(hide = true)]
    Worker,
}

fn init_tracing(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    // stdout of a worker is its registry channel
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&cli.config, cli.debug).await,
        Commands::Worker => worker::run_worker().await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(path: &Path, debug: bool) -> anyhow::Result<()> {
    let path = config::locate(path, Path::new("configs"))?;
    info!("Loading config from {}", path.display());
    let config = config::load(&path)?;

    Orchestrator::new(config, debug)?.run().await
}
