// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # HALO Loop Runner
//!
//! The `halo` binary hosts one adaptive control loop in-process.
//!
//! ## Commands
//!
//! - `halo run [--kick|--once]` - Run the loop until Ctrl-C
//! - `halo config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use halo_core::domain::loop_config::LoopConfigManifest;
use halo_orchestrator::commands::{self, ConfigCommand, RunArgs};
use halo_orchestrator::logging::init_logging;

/// HALO - adaptive decay-weighted control loop
#[derive(Parser)]
#[command(name = "halo")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "HALO_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true, env = "HALO_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control loop
    #[command(name = "run")]
    Run(RunArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Read before the subscriber exists; load errors surface per command.
    let manifest = LoopConfigManifest::load_or_default(cli.config.clone());
    let logging = manifest
        .as_ref()
        .map(|m| m.spec.observability.logging.clone())
        .unwrap_or_default();
    let level = cli.log_level.as_deref().unwrap_or(&logging.level);
    init_logging(level, &logging.format)?;

    match cli.command {
        Some(Commands::Run(args)) => {
            let manifest = manifest.context("Failed to load configuration")?;
            commands::run::handle_command(args, manifest).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}
