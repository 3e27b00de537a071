// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0
//! HALO CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Thin runner around `halo_core::application::HaloRuntime`

pub mod commands;
pub mod executor;
pub mod logging;
