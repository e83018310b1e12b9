// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{ApprovalsCommands, Cli, Commands};
use skarv_gateway::Gateway;
use skarv_model::OpenAiCompatClient;
use skarv_safety::ApprovalStore;

/// Exit code for a user interrupt (SIGINT), shell convention 128 + 2.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Gateway => {
            let config = skarv_config::load(cli.config.as_deref())?;
            let model = Arc::new(OpenAiCompatClient::from_config(
                &config.model_routing.provider,
            ));
            let gateway = Gateway::new(config, cli.config.clone(), model)?;

            tokio::select! {
                result = skarv_gateway::serve(gateway) => {
                    result?;
                    Ok(ExitCode::SUCCESS)
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, shutting down");
                    Ok(ExitCode::from(EXIT_INTERRUPTED))
                }
            }
        }
        Commands::ShowConfig => {
            let config = skarv_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Approvals { command } => {
            let config = skarv_config::load(cli.config.as_deref())?;
            let state_dir = config.gateway.state_dir.clone().unwrap_or_else(|| {
                dirs::config_dir()
                    .unwrap_or_else(|| std::path::PathBuf::from("."))
                    .join("skarv")
            });
            let store = ApprovalStore::load_or_init(
                state_dir.join("approvals.json"),
                config.tools.shell.clone(),
            )?;
            match command {
                ApprovalsCommands::List => {
                    let snapshot = store.snapshot();
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                }
                ApprovalsCommands::Allow { agent, command } => {
                    store.add(&agent, &command)?;
                    let resolved = store.resolve_executable(&command);
                    println!("allowlisted for {agent}: {}", resolved.display());
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Line-oriented log output with a leading ISO-8601 timestamp.
/// Default level is info; `--verbose` raises to debug, RUST_LOG wins.
fn init_logging(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}
