// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use halo_core::domain::loop_config::LoopConfigManifest;
use halo_core::domain::repository::StorageBackend;

const MINIMAL_TEMPLATE: &str = include_str!("../../templates/config-minimal.yaml");
const EXAMPLES_TEMPLATE: &str = include_str!("../../templates/config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./halo-config.yaml)
        #[arg(short, long, default_value = "./halo-config.yaml")]
        output: PathBuf,

        /// Include every section with comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, examples } => generate(&output, examples),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let manifest = LoopConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. HALO_CONFIG_PATH: {}",
            std::env::var("HALO_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./halo-config.yaml");
        println!("  4. ~/.halo/config.yaml");
        println!("  5. /etc/halo/config.yaml");
        println!();
    }

    let spec = &manifest.spec;
    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", manifest.metadata.name);
    println!();

    println!("{}", "Engine:".bold());
    println!("  Epsilon: {}", spec.engine.epsilon);
    println!("  Top K: {}", spec.engine.top_k);
    println!("  Default path: {}", spec.engine.default_path.join(" -> "));
    println!("  Executor timeout: {:?}", spec.engine.executor_timeout);
    println!("  Persistence timeout: {:?}", spec.engine.persistence_timeout);
    match spec.engine.rng_seed {
        Some(seed) => println!("  RNG seed: {seed}"),
        None => println!("  RNG seed: {}", "(entropy)".dimmed()),
    }
    println!();

    println!("{}", "Pheromones:".bold());
    println!("  Half-life: {:?}", spec.pheromone.half_life);
    println!("  Partial quality: {}", spec.pheromone.partial_quality);
    println!("  Damping factor: {}", spec.pheromone.damping_factor);
    println!();

    println!("{}", "Triggers:".bold());
    if spec.triggers.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for trigger in &spec.triggers {
        println!("  {} ({}), cooldown {:?}", trigger.id.bold(), trigger.kind(), trigger.cooldown);
    }
    println!();

    println!("{}", "Storage:".bold());
    match &spec.storage {
        StorageBackend::InMemory => println!("  In memory (state is lost on exit)"),
        StorageBackend::JsonFile { directory } => println!("  JSON files in {}", directory.display()),
    }
    println!("  History capacity: {}", spec.history.capacity);

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let manifest = LoopConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    manifest
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: &Path, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        EXAMPLES_TEMPLATE
    } else {
        MINIMAL_TEMPLATE
    };

    std::fs::write(output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
