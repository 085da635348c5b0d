// ABOUTME: Entry point for the pgwarden binary.
// ABOUTME: Loads `.env` and configuration, initializes tracing, and dispatches the parsed subcommand.

mod cli;
mod commands;
mod config;
mod start;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::{Config, LogLevel};

fn main() -> ExitCode {
    // A missing .env file is the normal case in containers.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise PG_LOG_LEVEL, read before the rest of the
    // configuration so configuration errors are logged too.
    let level = std::env::var("PG_LOG_LEVEL")
        .ok()
        .and_then(|v| v.parse::<LogLevel>().ok())
        .unwrap_or(LogLevel::Info);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive())),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = Config::from_env()
        .map_err(anyhow::Error::from)
        .and_then(|config| commands::run(cli.command, &config));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
