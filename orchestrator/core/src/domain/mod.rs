// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: decay arithmetic, the pheromone table, triggers, cycle
//! history and the contracts the application layer wires together. Nothing
//! here spawns tasks.

pub mod clock;
pub mod cycle;
pub mod decay;
pub mod errors;
pub mod events;
pub mod executor;
pub mod history;
pub mod loop_config;
pub mod pheromone;
pub mod repository;
pub mod trigger;
