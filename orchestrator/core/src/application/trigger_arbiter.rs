// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Trigger Arbiter - Application Layer
//!
//! Owns every registered [`Trigger`] and turns live signals into cycle
//! requests. Signal methods are synchronous and fire-and-forget: they take
//! the trigger lock briefly, collect whatever fired, release the lock, then
//! hand each reason to the [`CycleRequester`]. Nothing here waits on a cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::domain::clock::Clock;
use crate::domain::cycle::RequestDisposition;
use crate::domain::errors::{LoopError, LoopResult};
use crate::domain::trigger::{Severity, Trigger, TriggerKind, TriggerReason, TriggerSpec, TriggerStatus};

/// Trigger id carried by deploy notifications when no deploy trigger exists.
pub const BUILTIN_DEPLOY_ID: &str = "deploy";

/// Receives cycle requests. Implemented by the cycle engine.
pub trait CycleRequester: Send + Sync {
    fn request_cycle(&self, reason: TriggerReason) -> RequestDisposition;
}

pub struct TriggerArbiter {
    triggers: Mutex<Vec<Trigger>>,
    requester: Arc<dyn CycleRequester>,
    clock: Arc<dyn Clock>,
    pending_ttl: Duration,
}

impl TriggerArbiter {
    pub fn new(requester: Arc<dyn CycleRequester>, clock: Arc<dyn Clock>, pending_ttl: Duration) -> Self {
        Self {
            triggers: Mutex::new(Vec::new()),
            requester,
            clock,
            pending_ttl,
        }
    }

    /// Validate and add a trigger. Ids must be unique.
    pub fn register(&self, spec: TriggerSpec) -> LoopResult<()> {
        let trigger = Trigger::new(spec, self.clock.now())?;
        let mut triggers = self.triggers.lock();
        if triggers.iter().any(|t| t.id() == trigger.id()) {
            return Err(LoopError::validation(format!(
                "trigger '{}' is already registered",
                trigger.id()
            )));
        }
        info!(trigger_id = %trigger.id(), kind = %trigger.kind(), "Registered trigger");
        triggers.push(trigger);
        Ok(())
    }

    pub fn register_all(&self, specs: impl IntoIterator<Item = TriggerSpec>) -> LoopResult<()> {
        for spec in specs {
            self.register(spec)?;
        }
        Ok(())
    }

    /// One unit of traffic for volume and error-rate triggers.
    pub fn record_request(&self) {
        let now = self.clock.now();
        let ttl = self.pending_ttl;
        self.fire_where(|trigger| trigger.on_request(now, ttl));
    }

    /// One failed unit of traffic. Pair with [`record_request`](Self::record_request).
    pub fn record_error(&self) {
        let now = self.clock.now();
        let ttl = self.pending_ttl;
        self.fire_where(|trigger| trigger.on_error(now, ttl));
    }

    /// Deploy triggers fire unconditionally. With none registered the
    /// notification still requests a cycle under the built-in `deploy` id.
    pub fn notify_deploy(&self, metadata: serde_json::Value) {
        let now = self.clock.now();
        if self.fire_where(|trigger| trigger.on_deploy(now, &metadata)) > 0 {
            return;
        }
        debug!("No deploy trigger registered; requesting cycle as '{}'", BUILTIN_DEPLOY_ID);
        let reason = TriggerReason::new(BUILTIN_DEPLOY_ID, TriggerKind::Deploy, "deploy notification", now)
            .with_metadata(metadata);
        self.requester.request_cycle(reason);
    }

    pub fn push_event(&self, event_type: &str, severity: Severity) {
        let now = self.clock.now();
        let ttl = self.pending_ttl;
        if self.fire_where(|trigger| trigger.on_event(now, event_type, severity, ttl)) == 0 {
            debug!(event_type, ?severity, "Event matched no ready trigger");
        }
    }

    /// Ask for a cycle outside any registered trigger.
    pub fn request_manual(&self, detail: impl Into<String>) -> RequestDisposition {
        let reason = TriggerReason::manual(detail, self.clock.now());
        self.requester.request_cycle(reason)
    }

    /// Check time triggers and re-check held thresholds. Returns how many fired.
    pub fn evaluate(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.pending_ttl;
        self.fire_where(|trigger| trigger.on_tick(now, ttl))
    }

    /// Release the in-flight guard for triggers carried by a finished cycle.
    pub fn acknowledge(&self, trigger_ids: &[String]) {
        let mut triggers = self.triggers.lock();
        for trigger in triggers.iter_mut() {
            if trigger_ids.iter().any(|id| id == trigger.id()) {
                trigger.acknowledge();
            }
        }
    }

    pub fn snapshot(&self) -> Vec<TriggerStatus> {
        self.triggers.lock().iter().map(Trigger::status).collect()
    }

    pub fn len(&self) -> usize {
        self.triggers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.lock().is_empty()
    }

    fn fire_where(&self, mut check: impl FnMut(&mut Trigger) -> Option<TriggerReason>) -> usize {
        let fired: Vec<TriggerReason> = {
            let mut triggers = self.triggers.lock();
            triggers.iter_mut().filter_map(&mut check).collect()
        };
        let count = fired.len();
        for reason in fired {
            debug!(trigger_id = %reason.trigger_id, kind = %reason.kind, detail = %reason.detail, "Trigger fired");
            self.requester.request_cycle(reason);
        }
        count
    }
}
