// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Stand-in remediation executor for the `halo run` command.
//!
//! Real deployments embed `halo_core` and supply their own
//! [`RemediationExecutor`]. This one walks the chosen path, logs each step
//! and reports success.

use async_trait::async_trait;
use tracing::info;

use halo_core::domain::executor::{ExecutionContext, ExecutionReport, RemediationExecutor};
use halo_core::domain::pheromone::PathKey;

#[derive(Debug, Default)]
pub struct LoggingExecutor;

#[async_trait]
impl RemediationExecutor for LoggingExecutor {
    async fn execute(&self, path: &PathKey, context: &ExecutionContext) -> anyhow::Result<ExecutionReport> {
        let steps = path.steps();
        for (index, step) in steps.iter().enumerate() {
            info!(
                cycle_id = %context.cycle_id,
                step = %step,
                position = index + 1,
                total = steps.len(),
                "Remediation step"
            );
        }

        Ok(ExecutionReport::success()
            .with_detail(format!("logged {} step(s)", steps.len()))
            .with_metadata(serde_json::json!({
                "trigger": context.primary.trigger_id,
                "merged": context.merged.len(),
            })))
    }
}
