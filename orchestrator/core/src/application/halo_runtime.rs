// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0
//! HALO Runtime - composition root
//!
//! Wires one loop together: config → repositories → cycle engine → trigger
//! arbiter → ticker. Hosts hold a [`HaloRuntime`], feed signals through
//! [`HaloRuntime::arbiter`] and observe [`HaloRuntime::event_bus`].

use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::arbiter_ticker::ArbiterTicker;
use crate::application::cycle_engine::{CycleEngine, EngineDependencies, EngineStatus};
use crate::application::repository_factory::{create_history_repository, create_pheromone_repository};
use crate::application::trigger_arbiter::TriggerArbiter;
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::executor::RemediationExecutor;
use crate::domain::loop_config::LoopConfig;
use crate::domain::repository::{HistoryRepository, PheromoneRepository};
use crate::infrastructure::event_bus::EventBus;

/// Replacements for the collaborators `build` would otherwise create.
#[derive(Default)]
pub struct RuntimeOverrides {
    pub clock: Option<Arc<dyn Clock>>,
    pub pheromone_repository: Option<Arc<dyn PheromoneRepository>>,
    pub history_repository: Option<Arc<dyn HistoryRepository>>,
    pub event_bus: Option<EventBus>,
}

pub struct HaloRuntime {
    engine: CycleEngine,
    arbiter: Arc<TriggerArbiter>,
    ticker: Arc<ArbiterTicker>,
    ticker_handle: Option<JoinHandle<()>>,
    event_bus: EventBus,
}

impl HaloRuntime {
    pub async fn build(config: LoopConfig, executor: Arc<dyn RemediationExecutor>) -> anyhow::Result<Self> {
        Self::build_with(config, executor, RuntimeOverrides::default()).await
    }

    /// Validate config, restore persisted state and register triggers. The
    /// ticker is not running until [`start`](Self::start).
    pub async fn build_with(
        config: LoopConfig,
        executor: Arc<dyn RemediationExecutor>,
        overrides: RuntimeOverrides,
    ) -> anyhow::Result<Self> {
        config.validate().context("Invalid loop configuration")?;

        let clock = overrides.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let event_bus = overrides.event_bus.unwrap_or_default();
        let pheromone_repository = overrides
            .pheromone_repository
            .unwrap_or_else(|| create_pheromone_repository(&config.storage));
        let history_repository = overrides
            .history_repository
            .unwrap_or_else(|| create_history_repository(&config.storage, config.history.capacity));

        let engine = CycleEngine::new(
            config.clone(),
            EngineDependencies {
                executor,
                pheromone_repository,
                history_repository,
                event_bus: event_bus.clone(),
                clock: clock.clone(),
            },
        )
        .context("Failed to create cycle engine")?;

        if let Err(e) = engine.restore().await {
            warn!("Starting without persisted state: {}", e);
        }

        let arbiter = Arc::new(TriggerArbiter::new(
            Arc::new(engine.clone()),
            clock.clone(),
            config.arbiter.pending_ttl,
        ));
        arbiter
            .register_all(config.triggers.iter().cloned())
            .context("Failed to register triggers")?;

        let ticker = Arc::new(ArbiterTicker::new(
            arbiter.clone(),
            event_bus.clone(),
            clock,
            config.arbiter.tick_interval,
        ));

        info!(triggers = arbiter.len(), storage = ?config.storage, "HALO runtime built");
        Ok(Self {
            engine,
            arbiter,
            ticker,
            ticker_handle: None,
            event_bus,
        })
    }

    /// Start the background ticker. Calling twice is a no-op.
    pub fn start(&mut self) {
        if self.ticker_handle.is_some() {
            return;
        }
        self.ticker_handle = Some(self.ticker.clone().start());
    }

    /// Stop the ticker, let a running cycle finish, then flush trails.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.ticker.shutdown_token().cancel();
        if let Some(handle) = self.ticker_handle.take() {
            handle.await.context("Arbiter ticker task failed")?;
        }

        self.engine.wait_until_idle().await;

        match self.engine.flush().await {
            Ok(count) => info!(trails = count, "Flushed pheromone trails"),
            Err(e) => warn!("Could not flush pheromone trails: {}", e),
        }
        info!("HALO runtime stopped");
        Ok(())
    }

    pub fn engine(&self) -> &CycleEngine {
        &self.engine
    }

    pub fn arbiter(&self) -> &Arc<TriggerArbiter> {
        &self.arbiter
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn status(&self) -> EngineStatus {
        self.engine.status()
    }
}
