#![deny(unused, dead_code)]
#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

//! Pushgate - unified CLI entrypoint.
//!
//! Usage:
//!   pushgate start --config config/pushgate.toml
//!   pushgate check-config --config config/pushgate.toml

use anyhow::Result;
use clap::Parser;
use pushgate::cli::{run_check_config, run_start, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => run_start(args).await,
        Commands::CheckConfig(args) => run_check_config(args),
    }
}
