//! ## emnet-cli
//! **Operational interface for the emnet data plane**
//! Runs the stack against simulated links on a virtual clock and checks
//! configuration files before deployment.
//!
//! ### Expectations:
//! - POSIX-compliant argument parsing
//! - Every run is deterministic for a given configuration

use clap::Parser;
use emnet_config::EmnetConfig;
use emnet_telemetry::StackLogger;

mod commands;
mod simulate;

use commands::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate(args) => {
            let config = commands::load_config(args.config.as_deref())?;
            StackLogger::init(&config.telemetry.log_level);
            simulate::run(&config, &args)
        }
        Commands::CheckConfig(args) => {
            StackLogger::init(&EmnetConfig::default().telemetry.log_level);
            commands::check_config(&args)
        }
    }
}
