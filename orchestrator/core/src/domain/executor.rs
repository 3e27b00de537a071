// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cycle::{CycleId, Outcome, Selection};
use crate::domain::pheromone::PathKey;
use crate::domain::trigger::TriggerReason;

/// What the executor is told about the cycle it runs in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub cycle_id: CycleId,
    pub started_at: DateTime<Utc>,
    pub primary: TriggerReason,
    #[serde(default)]
    pub merged: Vec<TriggerReason>,
    pub selection: Selection,
    /// Strength of the chosen path just before execution.
    pub strength: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub outcome: Outcome,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ExecutionReport {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            detail: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn success() -> Self {
        Self::new(Outcome::Success)
    }

    pub fn partial(detail: impl Into<String>) -> Self {
        Self::new(Outcome::Partial).with_detail(detail)
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self::new(Outcome::Failure).with_detail(detail)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Carries out a remediation path. Supplied by the host application.
///
/// An `Err` is recorded as a `failure` outcome; so is a panic or overrunning
/// the engine's executor timeout.
#[async_trait]
pub trait RemediationExecutor: Send + Sync {
    async fn execute(&self, path: &PathKey, context: &ExecutionContext) -> anyhow::Result<ExecutionReport>;
}
