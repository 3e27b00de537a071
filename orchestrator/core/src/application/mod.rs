// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod arbiter_ticker;
pub mod cycle_engine;
pub mod halo_runtime;
pub mod repository_factory;
pub mod trigger_arbiter;

// Re-export the services hosts interact with
pub use arbiter_ticker::ArbiterTicker;
pub use cycle_engine::{CycleEngine, EngineDependencies, EngineStatus, RestoreSummary};
pub use halo_runtime::{HaloRuntime, RuntimeOverrides};
pub use trigger_arbiter::{CycleRequester, TriggerArbiter};
