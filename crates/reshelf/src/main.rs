//! reshelf - per-tenant folder consolidation CLI
//!
//! Moves every root folder of each tenant under one top folder shared with
//! a search account, and verifies the result, while keeping the whole
//! process under the storage API's rate ceiling.

use anyhow::Result;
use clap::Parser;
use reshelf_core::Workflow;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod commands;
mod config;
mod error;
mod progress;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is kept for reports
    let filter = EnvFilter::from_default_env()
        .add_directive("reshelf=info".parse()?)
        .add_directive("reshelf_core=info".parse()?);
    tracing_subscriber::registry()
        .with(cli.json_logs.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!cli.json_logs).then(|| fmt::layer().with_writer(std::io::stderr)))
        .with(filter)
        .init();

    // Load configuration
    let config = config::Config::load(cli.config.as_deref())?;

    // Ctrl-C cancels the run; in-flight calls finish, queued ones are dropped
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    // Execute command
    let result = match cli.command {
        Commands::Reorganize(args) => {
            commands::run::execute(Workflow::Reorganize, args, &config, cancel.clone()).await
        }
        Commands::Verify(args) => {
            commands::run::execute(Workflow::Verify, args, &config, cancel.clone()).await
        }
        Commands::Fixtures(cmd) => commands::fixtures::execute(cmd, &config, cancel.clone()).await,
        Commands::Config(cmd) => commands::config::execute(cmd, &config, cli.config.as_deref()),
        Commands::Version => {
            println!("reshelf {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if cancel.is_cancelled() && result.is_err() {
        return Err(error::ReshelfError::Interrupted.into());
    }
    result
}
