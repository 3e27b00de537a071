// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0
//! HALO control loop core
//!
//! Decides when to act, picks an action path from decaying pheromone trails,
//! runs it through a host-supplied executor and learns from the outcome.
//!
//! # Architecture
//!
//! - **domain:** decay arithmetic, pheromone table, triggers, history, config
//! - **application:** cycle engine, trigger arbiter, ticker, runtime wiring
//! - **infrastructure:** event bus and repository adapters

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
