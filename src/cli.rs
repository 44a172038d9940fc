//! CLI argument definitions using clap.

use crate::config::Config;
use crate::runtime::Runtime;
use crate::telemetry;
use crate::time::SystemClock;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::env;
use std::path::PathBuf;

/// Pushgate - WebSocket push notification dispatch core.
#[derive(Parser)]
#[command(name = "pushgate")]
#[command(version)]
#[command(about = "Pushgate connection and dispatch server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the pushgate server
    Start(StartArgs),

    /// Parse and validate a configuration file, then exit
    CheckConfig(CheckConfigArgs),
}

#[derive(Args)]
pub struct StartArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/pushgate.toml")]
    pub config: PathBuf,
}

#[derive(Args)]
pub struct CheckConfigArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/pushgate.toml")]
    pub config: PathBuf,
}

pub async fn run_start(args: StartArgs) -> Result<()> {
    // Route the path through the environment so Config::load_from_env
    // picks it up, matching container deployments.
    env::set_var("PUSHGATE_CONFIG", args.config.display().to_string());

    let config = Config::load_from_env()?;
    let log_handle = telemetry::init_tracing(config.telemetry.log_level.as_deref())?;
    let clock = SystemClock;
    let mut runtime = Runtime::new(config, clock, Some(log_handle))?;
    runtime.run().await
}

pub fn run_check_config(args: CheckConfigArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    config.validate()?;
    println!("{} ok", args.config.display());
    Ok(())
}
