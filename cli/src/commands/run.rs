// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0

//! `halo run` - host one control loop until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tracing::{debug, info, warn};

use halo_core::application::HaloRuntime;
use halo_core::domain::events::LoopEvent;
use halo_core::domain::loop_config::LoopConfigManifest;
use halo_core::infrastructure::event_bus::{EventBusError, EventReceiver};

use crate::executor::LoggingExecutor;

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Request one manual cycle as soon as the loop is up
    #[arg(long)]
    pub kick: bool,

    /// Run a single manual cycle, print its result and exit
    #[arg(long, conflicts_with = "kick")]
    pub once: bool,
}

pub async fn handle_command(args: RunArgs, manifest: LoopConfigManifest) -> Result<()> {
    manifest.validate().context("Configuration validation failed")?;
    info!(name = %manifest.metadata.name, "Starting HALO loop");

    let mut runtime = HaloRuntime::build(manifest.spec, Arc::new(LoggingExecutor))
        .await
        .context("Failed to build HALO runtime")?;

    let observer = tokio::spawn(log_events(runtime.event_bus().subscribe()));

    if args.once {
        runtime.arbiter().request_manual("halo run --once");
        runtime.engine().wait_until_idle().await;
        print_latest(&runtime);
        observer.abort();
        return runtime.shutdown().await;
    }

    runtime.start();
    if args.kick {
        runtime.arbiter().request_manual("halo run --kick");
    }

    println!("{}", "HALO loop running. Press Ctrl-C to stop.".green());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutdown requested");
    observer.abort();
    print_latest(&runtime);
    runtime.shutdown().await
}

async fn log_events(mut events: EventReceiver) {
    loop {
        match events.recv().await {
            Ok(LoopEvent::CycleRequested { reason, queued, .. }) => {
                debug!(trigger_id = %reason.trigger_id, kind = %reason.kind, queued, "Cycle requested");
            }
            Ok(LoopEvent::CycleStarted { cycle_id, .. }) => {
                debug!(%cycle_id, "Cycle started");
            }
            Ok(LoopEvent::CycleCompleted {
                cycle_id,
                chosen_path,
                outcome,
                duration_ms,
                ..
            }) => {
                info!(%cycle_id, path = %chosen_path, %outcome, duration_ms, "Cycle finished");
            }
            Err(EventBusError::Lagged(missed)) => {
                warn!(missed, "Event observer lagged");
            }
            Err(_) => break,
        }
    }
}

fn print_latest(runtime: &HaloRuntime) {
    let status = runtime.status();
    println!();
    println!("{}", "Loop status:".bold());
    println!("  Cycles completed: {}", status.cycles_completed);
    if let Some(summary) = &status.last_summary {
        println!("  Last cycle: {summary}");
    }
    if status.persistence_degraded {
        println!("  {}", "Persistence degraded; state held in memory only".yellow());
    }

    let top = runtime.engine().top_paths(3);
    if !top.is_empty() {
        println!("  Strongest paths:");
        for ranked in top {
            println!("    {} ({:.3})", ranked.path, ranked.strength);
        }
    }
}
