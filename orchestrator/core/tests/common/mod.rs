// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use halo_core::application::{CycleEngine, EngineDependencies};
use halo_core::domain::clock::{Clock, ManualClock};
use halo_core::domain::cycle::Outcome;
use halo_core::domain::decay::DecayEntry;
use halo_core::domain::executor::{ExecutionContext, ExecutionReport, RemediationExecutor};
use halo_core::domain::history::HistoryEntry;
use halo_core::domain::loop_config::LoopConfig;
use halo_core::domain::pheromone::PathKey;
use halo_core::domain::repository::{HistoryRepository, PheromoneRepository, RepositoryError};
use halo_core::infrastructure::event_bus::EventBus;
use halo_core::infrastructure::repositories::{InMemoryHistoryRepository, InMemoryPheromoneRepository};
use tokio::sync::Semaphore;

/// Executor that blocks every call until the test hands out permits, and
/// records how many calls overlapped.
pub struct GatedExecutor {
    gate: Semaphore,
    outcome: Outcome,
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
}

impl GatedExecutor {
    pub fn closed(outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            outcome,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn open(outcome: Outcome) -> Arc<Self> {
        let executor = Self::closed(outcome);
        executor.release(Semaphore::MAX_PERMITS / 2);
        executor
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemediationExecutor for GatedExecutor {
    async fn execute(&self, _path: &PathKey, _context: &ExecutionContext) -> anyhow::Result<ExecutionReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let permit = self.gate.acquire().await?;
        permit.forget();

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(ExecutionReport::new(self.outcome))
    }
}

/// Executor that never returns on its own.
pub struct HangingExecutor;

#[async_trait]
impl RemediationExecutor for HangingExecutor {
    async fn execute(&self, _path: &PathKey, _context: &ExecutionContext) -> anyhow::Result<ExecutionReport> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ExecutionReport::success())
    }
}

/// Repositories that always fail, or always hang, depending on `hang`.
pub struct BrokenRepository {
    pub hang: bool,
}

impl BrokenRepository {
    async fn fail<T>(&self) -> Result<T, RepositoryError> {
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Err(RepositoryError::Unavailable("disk on fire".to_string()))
    }
}

#[async_trait]
impl PheromoneRepository for BrokenRepository {
    async fn save(&self, _entry: &DecayEntry) -> Result<(), RepositoryError> {
        self.fail().await
    }

    async fn save_all(&self, _entries: &[DecayEntry]) -> Result<(), RepositoryError> {
        self.fail().await
    }

    async fn load_all(&self) -> Result<Vec<DecayEntry>, RepositoryError> {
        self.fail().await
    }
}

#[async_trait]
impl HistoryRepository for BrokenRepository {
    async fn append(&self, _entry: &HistoryEntry) -> Result<(), RepositoryError> {
        self.fail().await
    }

    async fn load_recent(&self, _limit: usize) -> Result<Vec<HistoryEntry>, RepositoryError> {
        self.fail().await
    }
}

pub fn test_config() -> LoopConfig {
    let mut config = LoopConfig::default();
    config.engine.rng_seed = Some(7);
    config.engine.epsilon = 0.0;
    config
}

pub struct EngineFixture {
    pub engine: CycleEngine,
    pub clock: Arc<ManualClock>,
    pub bus: EventBus,
    pub pheromones: Arc<InMemoryPheromoneRepository>,
    pub history: Arc<InMemoryHistoryRepository>,
}

pub fn engine_fixture(config: LoopConfig, executor: Arc<dyn RemediationExecutor>) -> EngineFixture {
    let clock = Arc::new(ManualClock::at_epoch());
    let bus = EventBus::new(4096);
    let pheromones = Arc::new(InMemoryPheromoneRepository::new());
    let history = Arc::new(InMemoryHistoryRepository::new());
    let engine = CycleEngine::new(
        config,
        EngineDependencies {
            executor,
            pheromone_repository: pheromones.clone(),
            history_repository: history.clone(),
            event_bus: bus.clone(),
            clock: clock.clone() as Arc<dyn Clock>,
        },
    )
    .expect("valid engine config");
    EngineFixture {
        engine,
        clock,
        bus,
        pheromones,
        history,
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
