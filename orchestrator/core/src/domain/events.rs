// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cycle::{CycleId, Outcome};
use crate::domain::pheromone::PathKey;
use crate::domain::trigger::{CycleRequest, TriggerReason};

/// Lifecycle notifications emitted by the cycle engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    CycleRequested {
        reason: TriggerReason,
        /// Reasons waiting for the follow-up cycle, primary first. Empty
        /// when the request started a cycle directly.
        queued_reasons: Vec<TriggerReason>,
        queued: bool,
        timestamp: DateTime<Utc>,
    },
    CycleStarted {
        cycle_id: CycleId,
        reason: CycleRequest,
        timestamp: DateTime<Utc>,
    },
    CycleCompleted {
        cycle_id: CycleId,
        chosen_path: PathKey,
        outcome: Outcome,
        duration_ms: u64,
        trigger_ids: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl LoopEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LoopEvent::CycleRequested { timestamp, .. }
            | LoopEvent::CycleStarted { timestamp, .. }
            | LoopEvent::CycleCompleted { timestamp, .. } => *timestamp,
        }
    }
}
