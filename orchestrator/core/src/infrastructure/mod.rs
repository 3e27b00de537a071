// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod repositories;

pub use event_bus::{EventBus, EventBusError, EventReceiver};
