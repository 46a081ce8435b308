//! `stratactl`: run strata ingestion tasks from the command line.

mod cli;
mod commands;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use strata_config::{ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG, e.g. strata::fetch=debug.
                "warn,strata::task=info,strata::persist=info,stratactl=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let load = load_config(&cli)?;

    match cli.command {
        Command::Run(args) => commands::run(load, args).await,
        Command::CreateTable(args) => commands::create_table(load, args).await,
        Command::Latest(args) => commands::latest(load, args).await,
        Command::Config(ConfigCommand::Check) => commands::config_check(load),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ConfigLoad> {
    let load = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.config.clone(),
        env_file: cli.env_file.clone(),
        skip_env_file: cli.no_env_file,
    })
    .load()
    .context("failed to load configuration")?;

    if load.config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    for warning in &load.warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }
    Ok(load)
}
