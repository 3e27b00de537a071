// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Triggers
//!
//! A trigger is a named condition over live signals that asks for a cycle.
//! This module holds the per-trigger state machines; the
//! [`TriggerArbiter`](crate::application::trigger_arbiter::TriggerArbiter)
//! owns the records and routes signals to them.
//!
//! | Kind | Fires when | Cooldown |
//! |------|------------|----------|
//! | `time` | `now - last_fired_at >= interval` | yes |
//! | `volume` | requests in trailing window `>= threshold` | yes |
//! | `error-rate` | `errors / requests >= ratio` and `requests >= min_samples` | yes |
//! | `deploy` | every deploy notification | bypassed |
//! | `event` | pushed severity `>=` threshold for the event type | yes |
//!
//! A trigger whose previous request has not been acknowledged is held back
//! until the acknowledgement arrives or `pending_ttl` expires.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{LoopError, LoopResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    Time,
    Volume,
    ErrorRate,
    Deploy,
    Event,
    Manual,
}

impl TriggerKind {
    /// Rank used when coalescing pending reasons. Higher wins.
    pub fn priority(self) -> u8 {
        match self {
            TriggerKind::Deploy => 5,
            TriggerKind::Event => 4,
            TriggerKind::ErrorRate => 3,
            TriggerKind::Manual => 2,
            TriggerKind::Volume => 1,
            TriggerKind::Time => 0,
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TriggerKind::Time => "time",
            TriggerKind::Volume => "volume",
            TriggerKind::ErrorRate => "error-rate",
            TriggerKind::Deploy => "deploy",
            TriggerKind::Event => "event",
            TriggerKind::Manual => "manual",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// Registration-time description of a trigger, as written in config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub id: String,

    #[serde(flatten)]
    pub params: TriggerParams,

    /// Minimum spacing between two firings of this trigger.
    #[serde(with = "humantime_serde", default)]
    pub cooldown: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TriggerParams {
    Time {
        #[serde(with = "humantime_serde")]
        interval: Duration,
    },
    Volume {
        #[serde(with = "humantime_serde")]
        window: Duration,
        threshold: u64,
    },
    ErrorRate {
        #[serde(with = "humantime_serde")]
        window: Duration,
        ratio: f64,
        min_samples: u64,
    },
    Deploy,
    Event {
        event_type: String,
        min_severity: Severity,
    },
}

impl TriggerParams {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerParams::Time { .. } => TriggerKind::Time,
            TriggerParams::Volume { .. } => TriggerKind::Volume,
            TriggerParams::ErrorRate { .. } => TriggerKind::ErrorRate,
            TriggerParams::Deploy => TriggerKind::Deploy,
            TriggerParams::Event { .. } => TriggerKind::Event,
        }
    }
}

impl TriggerSpec {
    pub fn time(id: impl Into<String>, interval: Duration) -> Self {
        Self {
            id: id.into(),
            params: TriggerParams::Time { interval },
            cooldown: Duration::ZERO,
        }
    }

    pub fn volume(id: impl Into<String>, window: Duration, threshold: u64) -> Self {
        Self {
            id: id.into(),
            params: TriggerParams::Volume { window, threshold },
            cooldown: Duration::ZERO,
        }
    }

    pub fn error_rate(id: impl Into<String>, window: Duration, ratio: f64, min_samples: u64) -> Self {
        Self {
            id: id.into(),
            params: TriggerParams::ErrorRate {
                window,
                ratio,
                min_samples,
            },
            cooldown: Duration::ZERO,
        }
    }

    pub fn deploy(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            params: TriggerParams::Deploy,
            cooldown: Duration::ZERO,
        }
    }

    pub fn event(id: impl Into<String>, event_type: impl Into<String>, min_severity: Severity) -> Self {
        Self {
            id: id.into(),
            params: TriggerParams::Event {
                event_type: event_type.into(),
                min_severity,
            },
            cooldown: Duration::ZERO,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn kind(&self) -> TriggerKind {
        self.params.kind()
    }

    pub fn validate(&self) -> LoopResult<()> {
        if self.id.trim().is_empty() {
            return Err(LoopError::validation("trigger id cannot be empty"));
        }
        match &self.params {
            TriggerParams::Time { interval } => {
                if interval.is_zero() {
                    return Err(LoopError::validation(format!(
                        "trigger '{}': interval must be greater than zero",
                        self.id
                    )));
                }
            }
            TriggerParams::Volume { window, threshold } => {
                if window.is_zero() || *threshold == 0 {
                    return Err(LoopError::validation(format!(
                        "trigger '{}': window and threshold must be greater than zero",
                        self.id
                    )));
                }
            }
            TriggerParams::ErrorRate {
                window,
                ratio,
                min_samples,
            } => {
                if window.is_zero() {
                    return Err(LoopError::validation(format!(
                        "trigger '{}': window must be greater than zero",
                        self.id
                    )));
                }
                if !(*ratio > 0.0 && *ratio <= 1.0) {
                    return Err(LoopError::validation(format!(
                        "trigger '{}': ratio must be within (0, 1], got {}",
                        self.id, ratio
                    )));
                }
                if *min_samples == 0 {
                    return Err(LoopError::validation(format!(
                        "trigger '{}': min_samples must be at least 1",
                        self.id
                    )));
                }
            }
            TriggerParams::Deploy => {}
            TriggerParams::Event { event_type, .. } => {
                if event_type.trim().is_empty() {
                    return Err(LoopError::validation(format!(
                        "trigger '{}': event_type cannot be empty",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Why a cycle was asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerReason {
    pub trigger_id: String,
    pub kind: TriggerKind,
    pub detail: String,
    pub fired_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl TriggerReason {
    pub fn new(
        trigger_id: impl Into<String>,
        kind: TriggerKind,
        detail: impl Into<String>,
        fired_at: DateTime<Utc>,
    ) -> Self {
        Self {
            trigger_id: trigger_id.into(),
            kind,
            detail: detail.into(),
            fired_at,
            metadata: serde_json::Value::Null,
        }
    }

    /// Operator or API initiated request.
    pub fn manual(detail: impl Into<String>, fired_at: DateTime<Utc>) -> Self {
        Self::new("manual", TriggerKind::Manual, detail, fired_at)
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn priority(&self) -> u8 {
        self.kind.priority()
    }
}

/// A cycle request with every reason that arrived while it waited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRequest {
    pub primary: TriggerReason,
    #[serde(default)]
    pub merged: Vec<TriggerReason>,
    pub requested_at: DateTime<Utc>,
}

impl CycleRequest {
    pub fn new(reason: TriggerReason, requested_at: DateTime<Utc>) -> Self {
        Self {
            primary: reason,
            merged: Vec::new(),
            requested_at,
        }
    }

    /// Fold another reason in. A strictly higher priority reason takes over as
    /// primary; equal priority keeps the earlier one (FIFO). Nothing is dropped.
    pub fn merge(&mut self, reason: TriggerReason) {
        if reason.priority() > self.primary.priority() {
            let previous = std::mem::replace(&mut self.primary, reason);
            self.merged.push(previous);
        } else {
            self.merged.push(reason);
        }
    }

    pub fn reasons(&self) -> impl Iterator<Item = &TriggerReason> {
        std::iter::once(&self.primary).chain(self.merged.iter())
    }

    pub fn trigger_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for reason in self.reasons() {
            if !ids.contains(&reason.trigger_id) {
                ids.push(reason.trigger_id.clone());
            }
        }
        ids
    }

    /// Short label such as `deploy:release (+2 merged)`.
    pub fn describe(&self) -> String {
        let mut label = format!("{}:{}", self.primary.kind, self.primary.trigger_id);
        if !self.merged.is_empty() {
            label.push_str(&format!(" (+{} merged)", self.merged.len()));
        }
        label
    }
}

/// Bucketed event counter over a trailing window. Buckets are `window / 60`
/// wide (at least 1ms), so counts are exact to one bucket of slack.
#[derive(Debug, Clone)]
pub struct SlidingWindowCounter {
    window_ms: i64,
    bucket_ms: i64,
    buckets: VecDeque<(i64, u64)>,
}

impl SlidingWindowCounter {
    pub fn new(window: Duration) -> Self {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1);
        Self {
            window_ms,
            bucket_ms: (window_ms / 60).max(1),
            buckets: VecDeque::new(),
        }
    }

    pub fn record(&mut self, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        self.prune(now_ms);
        let bucket = now_ms - now_ms.rem_euclid(self.bucket_ms);
        match self.buckets.back_mut() {
            // Late or same-bucket timestamps land in the newest bucket.
            Some((start, count)) if *start >= bucket => *count += 1,
            _ => self.buckets.push_back((bucket, 1)),
        }
    }

    pub fn count(&mut self, now: DateTime<Utc>) -> u64 {
        self.prune(now.timestamp_millis());
        self.buckets.iter().map(|(_, count)| count).sum()
    }

    fn prune(&mut self, now_ms: i64) {
        let horizon = now_ms.saturating_sub(self.window_ms);
        while let Some((start, _)) = self.buckets.front() {
            if start.saturating_add(self.bucket_ms) <= horizon {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Live trigger record owned by the arbiter.
#[derive(Debug, Clone)]
pub struct Trigger {
    spec: TriggerSpec,
    registered_at: DateTime<Utc>,
    last_fired_at: Option<DateTime<Utc>>,
    pending_since: Option<DateTime<Utc>>,
    fire_count: u64,
    requests: Option<SlidingWindowCounter>,
    errors: Option<SlidingWindowCounter>,
}

impl Trigger {
    pub fn new(spec: TriggerSpec, now: DateTime<Utc>) -> LoopResult<Self> {
        spec.validate()?;
        let (requests, errors) = match &spec.params {
            TriggerParams::Volume { window, .. } => (Some(SlidingWindowCounter::new(*window)), None),
            TriggerParams::ErrorRate { window, .. } => (
                Some(SlidingWindowCounter::new(*window)),
                Some(SlidingWindowCounter::new(*window)),
            ),
            _ => (None, None),
        };
        Ok(Self {
            spec,
            registered_at: now,
            last_fired_at: None,
            pending_since: None,
            fire_count: 0,
            requests,
            errors,
        })
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn kind(&self) -> TriggerKind {
        self.spec.kind()
    }

    pub fn spec(&self) -> &TriggerSpec {
        &self.spec
    }

    /// Cooldown elapsed and no unacknowledged request outstanding.
    fn ready(&self, now: DateTime<Utc>, pending_ttl: Duration) -> bool {
        if let Some(since) = self.pending_since {
            if !elapsed_at_least(since, now, pending_ttl) {
                return false;
            }
            tracing::warn!(trigger_id = %self.spec.id, "Pending trigger request was never acknowledged; releasing it");
        }
        match self.last_fired_at {
            Some(last) => elapsed_at_least(last, now, self.spec.cooldown),
            None => true,
        }
    }

    fn fire(&mut self, now: DateTime<Utc>, detail: String) -> TriggerReason {
        self.last_fired_at = Some(now);
        self.pending_since = Some(now);
        self.fire_count += 1;
        TriggerReason::new(self.spec.id.clone(), self.kind(), detail, now)
    }

    /// Count one request and check volume / error-rate conditions.
    pub fn on_request(&mut self, now: DateTime<Utc>, pending_ttl: Duration) -> Option<TriggerReason> {
        let counter = self.requests.as_mut()?;
        counter.record(now);
        self.check_counters(now, pending_ttl)
    }

    /// Count one error and check the error-rate condition.
    pub fn on_error(&mut self, now: DateTime<Utc>, pending_ttl: Duration) -> Option<TriggerReason> {
        let counter = self.errors.as_mut()?;
        counter.record(now);
        self.check_counters(now, pending_ttl)
    }

    /// Periodic evaluation: interval expiry plus a re-check of the counters,
    /// so a threshold held through a cooldown fires once the cooldown ends.
    pub fn on_tick(&mut self, now: DateTime<Utc>, pending_ttl: Duration) -> Option<TriggerReason> {
        match &self.spec.params {
            TriggerParams::Time { interval } => {
                let since = self.last_fired_at.unwrap_or(self.registered_at);
                if elapsed_at_least(since, now, *interval) && self.ready(now, pending_ttl) {
                    let detail = format!("interval of {interval:?} elapsed");
                    return Some(self.fire(now, detail));
                }
                None
            }
            TriggerParams::Volume { .. } | TriggerParams::ErrorRate { .. } => {
                self.check_counters(now, pending_ttl)
            }
            TriggerParams::Deploy | TriggerParams::Event { .. } => None,
        }
    }

    pub fn on_deploy(&mut self, now: DateTime<Utc>, metadata: &serde_json::Value) -> Option<TriggerReason> {
        if !matches!(self.spec.params, TriggerParams::Deploy) {
            return None;
        }
        let reason = self.fire(now, "deploy notification".to_string());
        Some(reason.with_metadata(metadata.clone()))
    }

    pub fn on_event(
        &mut self,
        now: DateTime<Utc>,
        event_type: &str,
        severity: Severity,
        pending_ttl: Duration,
    ) -> Option<TriggerReason> {
        let TriggerParams::Event {
            event_type: watched,
            min_severity,
        } = &self.spec.params
        else {
            return None;
        };
        if watched != event_type || severity < *min_severity || !self.ready(now, pending_ttl) {
            return None;
        }
        let detail = format!("event '{event_type}' at severity {severity:?}");
        let reason = self.fire(now, detail);
        Some(reason.with_metadata(serde_json::json!({
            "event_type": event_type,
            "severity": severity,
        })))
    }

    fn check_counters(&mut self, now: DateTime<Utc>, pending_ttl: Duration) -> Option<TriggerReason> {
        let detail = match &self.spec.params {
            TriggerParams::Volume { threshold, .. } => {
                let count = self.requests.as_mut()?.count(now);
                if count < *threshold {
                    return None;
                }
                format!("{count} requests in window (threshold {threshold})")
            }
            TriggerParams::ErrorRate {
                ratio, min_samples, ..
            } => {
                let requests = self.requests.as_mut()?.count(now);
                let errors = self.errors.as_mut()?.count(now);
                if requests < *min_samples || requests == 0 {
                    return None;
                }
                let observed = errors as f64 / requests as f64;
                if observed < *ratio {
                    return None;
                }
                format!("error rate {observed:.3} over {requests} requests (threshold {ratio})")
            }
            _ => return None,
        };
        if !self.ready(now, pending_ttl) {
            return None;
        }
        Some(self.fire(now, detail))
    }

    /// The cycle that carried this trigger's request has finished.
    pub fn acknowledge(&mut self) {
        self.pending_since = None;
    }

    pub fn status(&self) -> TriggerStatus {
        TriggerStatus {
            id: self.spec.id.clone(),
            kind: self.kind(),
            last_fired_at: self.last_fired_at,
            pending: self.pending_since.is_some(),
            fire_count: self.fire_count,
        }
    }
}

/// Diagnostic view of one trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerStatus {
    pub id: String,
    pub kind: TriggerKind,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub pending: bool,
    pub fire_count: u64,
}

fn elapsed_at_least(since: DateTime<Utc>, now: DateTime<Utc>, span: Duration) -> bool {
    match chrono::Duration::from_std(span) {
        Ok(span) => now.signed_duration_since(since) >= span,
        Err(_) => false,
    }
}
