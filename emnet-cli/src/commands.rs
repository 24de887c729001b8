use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use emnet_config::EmnetConfig;
use tracing::info;

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run two hosts on a simulated segment and print the stack counters
    Simulate(SimulateArgs),
    /// Load and validate a configuration, then print the effective values
    CheckConfig(CheckConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Configuration file; defaults to the standard search path.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Simulated seconds to run. Defaults to just past the ARP age-out.
    #[arg(long)]
    pub seconds: Option<u64>,
    /// Skip printing the Prometheus exposition at the end.
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    /// Configuration file; defaults to the standard search path.
    pub path: Option<PathBuf>,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<EmnetConfig> {
    match path {
        Some(path) => EmnetConfig::load_from_path(path)
            .with_context(|| format!("loading {}", path.display())),
        None => EmnetConfig::load().context("loading configuration"),
    }
}

pub fn check_config(args: &CheckConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args.path.as_deref())?;
    info!(
        interfaces = config.interfaces.len(),
        pools = config.pools.classes.len(),
        "configuration valid"
    );
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
