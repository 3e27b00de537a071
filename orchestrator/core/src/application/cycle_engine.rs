// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Cycle Engine - Application Layer
//!
//! Single-flight orchestrator for one control loop. A cycle evaporates the
//! pheromone table, picks a path (epsilon-greedy over the strongest trails),
//! runs it through the [`RemediationExecutor`], reinforces or penalises the
//! trail, records history and persists best-effort.
//!
//! ```text
//!            request_cycle                     pending taken
//!   Idle ───────────────────▶ Running ─────────────────────┐
//!    ▲                           │  ▲                       │
//!    │      no pending request   │  └───────────────────────┘
//!    └───────────────────────────┘
//! ```
//!
//! The phase flip happens under one `parking_lot` mutex, so at most one
//! worker task exists at a time. Requests that arrive while Running are
//! coalesced into a single pending [`CycleRequest`] and run as exactly one
//! follow-up cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::application::trigger_arbiter::CycleRequester;
use crate::domain::clock::Clock;
use crate::domain::cycle::{CycleId, EnginePhase, Outcome, RequestDisposition, Selection};
use crate::domain::decay::DecayEntry;
use crate::domain::errors::{LoopError, LoopResult};
use crate::domain::events::LoopEvent;
use crate::domain::executor::{ExecutionContext, ExecutionReport, RemediationExecutor};
use crate::domain::history::{HistoryEntry, HistoryLedger};
use crate::domain::loop_config::LoopConfig;
use crate::domain::pheromone::{PathKey, PheromoneTable, RankedPath};
use crate::domain::repository::{HistoryRepository, PheromoneRepository};
use crate::domain::trigger::{CycleRequest, TriggerReason};
use crate::infrastructure::event_bus::EventBus;

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub phase: EnginePhase,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_summary: Option<String>,
    /// Trigger ids waiting for the follow-up cycle.
    pub pending_triggers: Vec<String>,
    pub persistence_degraded: bool,
    pub cycles_completed: u64,
}

/// Counts loaded by [`CycleEngine::restore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreSummary {
    pub trails: usize,
    pub history: usize,
}

/// Collaborators a [`CycleEngine`] is built from.
pub struct EngineDependencies {
    pub executor: Arc<dyn RemediationExecutor>,
    pub pheromone_repository: Arc<dyn PheromoneRepository>,
    pub history_repository: Arc<dyn HistoryRepository>,
    pub event_bus: EventBus,
    pub clock: Arc<dyn Clock>,
}

// Validated config plus what was derived from it.
struct ConfigSnapshot {
    config: LoopConfig,
    default_path: PathKey,
}

impl ConfigSnapshot {
    fn new(config: LoopConfig) -> LoopResult<Self> {
        config.validate()?;
        let default_path = config.engine.default_path_key()?;
        Ok(Self { config, default_path })
    }
}

struct EngineState {
    phase: EnginePhase,
    pending: Option<CycleRequest>,
    last_run_at: Option<DateTime<Utc>>,
    last_summary: Option<String>,
    persistence_degraded: bool,
    cycles_completed: u64,
}

struct EngineInner {
    config: RwLock<Arc<ConfigSnapshot>>,
    state: Mutex<EngineState>,
    pheromones: Mutex<PheromoneTable>,
    history: Mutex<HistoryLedger>,
    rng: Mutex<StdRng>,
    idle: watch::Sender<bool>,
    runtime: tokio::runtime::Handle,
    deps: EngineDependencies,
}

#[derive(Clone)]
pub struct CycleEngine {
    inner: Arc<EngineInner>,
}

impl CycleEngine {
    /// Build an idle engine. Must be called from within a tokio runtime;
    /// cycle workers are spawned onto it.
    pub fn new(config: LoopConfig, deps: EngineDependencies) -> LoopResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            LoopError::validation("cycle engine must be created inside a tokio runtime")
        })?;
        let snapshot = ConfigSnapshot::new(config)?;
        let pheromones = PheromoneTable::new(snapshot.config.pheromone.clone())?;
        let history = HistoryLedger::new(snapshot.config.history.capacity)?;
        let rng = match snapshot.config.engine.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let (idle, _) = watch::channel(true);

        Ok(Self {
            inner: Arc::new(EngineInner {
                config: RwLock::new(Arc::new(snapshot)),
                state: Mutex::new(EngineState {
                    phase: EnginePhase::Idle,
                    pending: None,
                    last_run_at: None,
                    last_summary: None,
                    persistence_degraded: false,
                    cycles_completed: 0,
                }),
                pheromones: Mutex::new(pheromones),
                history: Mutex::new(history),
                rng: Mutex::new(rng),
                idle,
                runtime,
                deps,
            }),
        })
    }

    /// Start a cycle, or fold `reason` into the pending request if one is
    /// already running. Returns immediately.
    pub fn request_cycle(&self, reason: TriggerReason) -> RequestDisposition {
        let inner = &self.inner;
        let now = inner.deps.clock.now();
        let mut state = inner.state.lock();

        match state.phase {
            EnginePhase::Running => {
                let pending = match state.pending.take() {
                    Some(mut pending) => {
                        pending.merge(reason.clone());
                        pending
                    }
                    None => CycleRequest::new(reason.clone(), now),
                };
                let queued_reasons: Vec<TriggerReason> = pending.reasons().cloned().collect();
                state.pending = Some(pending);

                debug!(trigger_id = %reason.trigger_id, queued = queued_reasons.len(), "Cycle running; request queued");
                inner.deps.event_bus.publish(LoopEvent::CycleRequested {
                    reason,
                    queued_reasons,
                    queued: true,
                    timestamp: now,
                });
                RequestDisposition::Queued
            }
            EnginePhase::Idle => {
                state.phase = EnginePhase::Running;
                inner.idle.send_replace(false);
                inner.deps.event_bus.publish(LoopEvent::CycleRequested {
                    reason: reason.clone(),
                    queued_reasons: Vec::new(),
                    queued: false,
                    timestamp: now,
                });
                drop(state);

                let worker = Arc::clone(inner);
                inner
                    .runtime
                    .spawn(worker.run_worker(CycleRequest::new(reason, now)));
                RequestDisposition::Started
            }
        }
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.inner.state.lock();
        EngineStatus {
            phase: state.phase,
            last_run_at: state.last_run_at,
            last_summary: state.last_summary.clone(),
            pending_triggers: state
                .pending
                .as_ref()
                .map(CycleRequest::trigger_ids)
                .unwrap_or_default(),
            persistence_degraded: state.persistence_degraded,
            cycles_completed: state.cycles_completed,
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().phase == EnginePhase::Running
    }

    /// Resolves once no cycle is running and nothing is pending.
    pub async fn wait_until_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        // The sender lives as long as the engine, so this only errs on drop.
        let _ = idle.wait_for(|idle| *idle).await;
    }

    /// Most recent first.
    pub fn history(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        self.inner.history.lock().list(limit)
    }

    pub fn top_paths(&self, n: usize) -> Vec<RankedPath> {
        let now = self.inner.deps.clock.now();
        self.inner.pheromones.lock().top_paths(n, now)
    }

    pub fn strength_of(&self, path: &PathKey) -> f64 {
        let now = self.inner.deps.clock.now();
        self.inner.pheromones.lock().strength_of(path, now)
    }

    pub fn config(&self) -> LoopConfig {
        self.inner.config.read().config.clone()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.deps.event_bus
    }

    /// Swap the whole configuration. A running cycle finishes on the
    /// snapshot it started with; pheromone and history settings reach the
    /// table and ledger at once when idle, otherwise when that cycle ends.
    pub fn reconfigure(&self, config: LoopConfig) -> LoopResult<()> {
        let snapshot = Arc::new(ConfigSnapshot::new(config)?);
        if let Some(seed) = snapshot.config.engine.rng_seed {
            *self.inner.rng.lock() = StdRng::seed_from_u64(seed);
        }
        *self.inner.config.write() = Arc::clone(&snapshot);

        let state = self.inner.state.lock();
        if state.phase == EnginePhase::Idle {
            let evicted = self.inner.apply_settings(&snapshot, self.inner.deps.clock.now())?;
            info!(evicted, "Loop configuration replaced");
        } else {
            info!("Loop configuration replaced; table settings apply after the running cycle");
        }
        Ok(())
    }

    /// Load persisted trails and history. Call once, before the first cycle.
    pub async fn restore(&self) -> LoopResult<RestoreSummary> {
        let inner = &self.inner;
        let snapshot = Arc::clone(&inner.config.read());
        let timeout = snapshot.config.engine.persistence_timeout;

        let loaded = tokio::time::timeout(timeout, inner.deps.pheromone_repository.load_all()).await;
        let entries = match loaded {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => return Err(inner.mark_degraded(LoopError::from(e))),
            Err(_) => return Err(inner.mark_degraded(persistence_timeout("pheromone load", timeout))),
        };
        let trails = inner.pheromones.lock().restore(entries);

        let limit = snapshot.config.history.capacity;
        let loaded = tokio::time::timeout(timeout, inner.deps.history_repository.load_recent(limit)).await;
        let entries = match loaded {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => return Err(inner.mark_degraded(LoopError::from(e))),
            Err(_) => return Err(inner.mark_degraded(persistence_timeout("history load", timeout))),
        };
        let history = inner.history.lock().restore(entries);

        info!(trails, history, "Restored loop state");
        Ok(RestoreSummary { trails, history })
    }

    /// Write every trail as currently settled. Used at shutdown.
    pub async fn flush(&self) -> LoopResult<usize> {
        let inner = &self.inner;
        let timeout = inner.config.read().config.engine.persistence_timeout;
        let entries = inner.pheromones.lock().entries();
        let count = entries.len();
        match tokio::time::timeout(timeout, inner.deps.pheromone_repository.save_all(&entries)).await {
            Ok(Ok(())) => Ok(count),
            Ok(Err(e)) => Err(inner.mark_degraded(LoopError::from(e))),
            Err(_) => Err(inner.mark_degraded(persistence_timeout("pheromone flush", timeout))),
        }
    }
}

impl CycleRequester for CycleEngine {
    fn request_cycle(&self, reason: TriggerReason) -> RequestDisposition {
        CycleEngine::request_cycle(self, reason)
    }
}

impl EngineInner {
    async fn run_worker(self: Arc<Self>, first: CycleRequest) {
        let mut request = first;
        loop {
            let completed = self.run_cycle(request).await;

            let next = {
                let mut state = self.state.lock();
                let next = state.pending.take();
                if next.is_none() {
                    state.phase = EnginePhase::Idle;
                    let snapshot = Arc::clone(&self.config.read());
                    if let Err(e) = self.apply_settings(&snapshot, self.deps.clock.now()) {
                        warn!(error = %e, "Could not apply loop settings");
                    }
                }
                self.deps.event_bus.publish(completed);
                if next.is_none() {
                    self.idle.send_replace(true);
                }
                next
            };

            match next {
                Some(pending) => {
                    debug!(reason = %pending.describe(), "Running queued cycle");
                    request = pending;
                }
                None => break,
            }
        }
    }

    async fn run_cycle(&self, request: CycleRequest) -> LoopEvent {
        let snapshot = Arc::clone(&self.config.read());
        let engine = &snapshot.config.engine;
        let cycle_id = CycleId::new();
        let started_at = self.deps.clock.now();

        if let Err(e) = self.apply_settings(&snapshot, started_at) {
            warn!(%cycle_id, error = %e, "Could not apply loop settings");
        }

        info!(%cycle_id, reason = %request.describe(), "Cycle started");
        self.deps.event_bus.publish(LoopEvent::CycleStarted {
            cycle_id,
            reason: request.clone(),
            timestamp: started_at,
        });

        let (path, selection, strength) = self.select(&snapshot, started_at);
        debug!(%cycle_id, path = %path, ?selection, strength, "Path selected");

        let context = ExecutionContext {
            cycle_id,
            started_at,
            primary: request.primary.clone(),
            merged: request.merged.clone(),
            selection,
            strength,
        };

        let (outcome, detail, error_detail) =
            match self.execute(engine.executor_timeout, path.clone(), context).await {
                Ok(report) => (report.outcome, report.detail, None),
                Err(err) => {
                    warn!(%cycle_id, path = %path, error = %err, "Executor did not complete; recording failure");
                    (Outcome::Failure, None, Some(err.to_string()))
                }
            };

        let completed_at = self.deps.clock.now();
        let (strength_after, trail) = {
            let mut table = self.pheromones.lock();
            let strength_after = match table.reinforce(&path, outcome, completed_at) {
                Ok(strength) => strength,
                Err(e) => {
                    warn!(%cycle_id, path = %path, error = %e, "Reinforcement rejected");
                    table.strength_of(&path, completed_at)
                }
            };
            (strength_after, table.entry(&path).cloned())
        };

        let duration_ms = u64::try_from((completed_at - started_at).num_milliseconds()).unwrap_or(0);
        let summary = summarize(outcome, &path, selection, &request, detail.as_deref().or(error_detail.as_deref()));
        let trigger_ids = request.trigger_ids();

        let entry = HistoryEntry {
            id: cycle_id,
            requested_at: request.requested_at,
            started_at,
            completed_at,
            reason: request,
            chosen_path: path.clone(),
            selection,
            outcome,
            strength_after,
            duration_ms,
            summary: summary.clone(),
            error_detail,
        };
        self.history.lock().append(entry.clone());
        self.persist(engine.persistence_timeout, trail, &entry).await;

        {
            let mut state = self.state.lock();
            state.last_run_at = Some(completed_at);
            state.last_summary = Some(summary);
            state.cycles_completed += 1;
        }

        info!(%cycle_id, path = %path, %outcome, duration_ms, strength_after, "Cycle completed");
        LoopEvent::CycleCompleted {
            cycle_id,
            chosen_path: path,
            outcome,
            duration_ms,
            trigger_ids,
            timestamp: completed_at,
        }
    }

    /// Bring the table and ledger in line with `snapshot`. Called only while
    /// no cycle sits between selection and recording. Returns entries evicted.
    fn apply_settings(&self, snapshot: &ConfigSnapshot, now: DateTime<Utc>) -> LoopResult<usize> {
        {
            let mut table = self.pheromones.lock();
            if table.settings() != &snapshot.config.pheromone {
                table.reconfigure(snapshot.config.pheromone.clone(), now)?;
            }
        }
        self.history.lock().set_capacity(snapshot.config.history.capacity)
    }

    fn select(&self, snapshot: &ConfigSnapshot, now: DateTime<Utc>) -> (PathKey, Selection, f64) {
        let engine = &snapshot.config.engine;
        let candidates: Vec<RankedPath> = self
            .pheromones
            .lock()
            .top_paths(engine.top_k, now)
            .into_iter()
            .filter(|ranked| ranked.strength > 0.0)
            .collect();

        if candidates.is_empty() {
            return (snapshot.default_path.clone(), Selection::Fallback, 0.0);
        }

        let mut rng = self.rng.lock();
        let (index, selection) = if rng.random::<f64>() < engine.epsilon {
            (rng.random_range(0..candidates.len()), Selection::Explore)
        } else {
            (0, Selection::Exploit)
        };
        let chosen = &candidates[index];
        (chosen.path.clone(), selection, chosen.strength)
    }

    /// Run the executor in its own task so a panic or overrun cannot take the
    /// worker down with it.
    async fn execute(
        &self,
        timeout: Duration,
        path: PathKey,
        context: ExecutionContext,
    ) -> LoopResult<ExecutionReport> {
        let executor = Arc::clone(&self.deps.executor);
        let mut task = tokio::spawn(async move { executor.execute(&path, &context).await });

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(report))) => Ok(report),
            Ok(Ok(Err(e))) => Err(LoopError::ExecutionFailure(format!("{e:#}"))),
            Ok(Err(join_error)) if join_error.is_panic() => {
                Err(LoopError::ExecutionFailure("executor panicked".to_string()))
            }
            Ok(Err(join_error)) => Err(LoopError::ExecutionFailure(join_error.to_string())),
            Err(_) => {
                task.abort();
                Err(LoopError::ExecutionTimeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    async fn persist(&self, timeout: Duration, trail: Option<DecayEntry>, entry: &HistoryEntry) {
        let mut failures: Vec<LoopError> = Vec::new();

        if let Some(trail) = trail {
            match tokio::time::timeout(timeout, self.deps.pheromone_repository.save(&trail)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(e.into()),
                Err(_) => failures.push(persistence_timeout("pheromone save", timeout)),
            }
        }

        match tokio::time::timeout(timeout, self.deps.history_repository.append(entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => failures.push(e.into()),
            Err(_) => failures.push(persistence_timeout("history append", timeout)),
        }

        if failures.is_empty() {
            let mut state = self.state.lock();
            if state.persistence_degraded {
                info!("Persistence recovered");
                state.persistence_degraded = false;
            }
            return;
        }
        for failure in failures {
            self.mark_degraded(failure);
        }
    }

    fn mark_degraded(&self, error: LoopError) -> LoopError {
        warn!(error = %error, "Persistence degraded; continuing in memory");
        self.state.lock().persistence_degraded = true;
        error
    }
}

fn persistence_timeout(operation: &str, timeout: Duration) -> LoopError {
    LoopError::PersistenceUnavailable(format!("{operation} timed out after {timeout:?}"))
}

fn summarize(
    outcome: Outcome,
    path: &PathKey,
    selection: Selection,
    request: &CycleRequest,
    detail: Option<&str>,
) -> String {
    let selection = match selection {
        Selection::Exploit => "exploit",
        Selection::Explore => "explore",
        Selection::Fallback => "fallback",
    };
    let mut summary = format!("{outcome} via {path} ({selection}) for {}", request.describe());
    if let Some(detail) = detail {
        summary.push_str(": ");
        summary.push_str(detail);
    }
    summary
}
