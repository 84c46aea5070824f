use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod completion;
mod config;
mod dispatch;
mod env_flows;
mod package_flows;
mod render;
mod self_update;

use dispatch::{run_cli, Cli};

const LOG_ENV_VAR: &str = "ENVDECK_LOG";

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run_cli(cli)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
