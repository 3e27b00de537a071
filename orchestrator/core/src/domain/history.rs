// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Bounded, append-only record of completed cycles. Oldest entries are
//! evicted once capacity is reached; insertion order is completion order.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cycle::{CycleId, Outcome, Selection};
use crate::domain::errors::{LoopError, LoopResult};
use crate::domain::pheromone::PathKey;
use crate::domain::trigger::CycleRequest;

pub const DEFAULT_HISTORY_CAPACITY: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: CycleId,
    pub requested_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub reason: CycleRequest,
    pub chosen_path: PathKey,
    pub selection: Selection,
    pub outcome: Outcome,
    /// Strength of the chosen path after reinforcement.
    pub strength_after: f64,
    pub duration_ms: u64,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HistoryLedger {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryLedger {
    pub fn new(capacity: usize) -> LoopResult<Self> {
        if capacity == 0 {
            return Err(LoopError::validation("history capacity must be at least 1"));
        }
        Ok(Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// Append and evict from the front until within capacity. Returns how
    /// many entries were evicted.
    pub fn append(&mut self, entry: HistoryEntry) -> usize {
        self.entries.push_back(entry);
        self.trim()
    }

    /// Most recent first, at most `limit` entries.
    pub fn list(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        let take = limit.unwrap_or(self.entries.len());
        self.entries.iter().rev().take(take).cloned().collect()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shrinking evicts the oldest entries immediately.
    pub fn set_capacity(&mut self, capacity: usize) -> LoopResult<usize> {
        if capacity == 0 {
            return Err(LoopError::validation("history capacity must be at least 1"));
        }
        self.capacity = capacity;
        Ok(self.trim())
    }

    /// Replace contents with persisted entries given oldest first, keeping
    /// only the newest `capacity` of them.
    pub fn restore(&mut self, entries: Vec<HistoryEntry>) -> usize {
        self.entries = entries.into();
        self.trim();
        self.entries.len()
    }

    fn trim(&mut self) -> usize {
        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            evicted += 1;
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trigger::{CycleRequest, TriggerReason};

    fn entry(n: u64) -> HistoryEntry {
        let at = DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(n as i64);
        HistoryEntry {
            id: CycleId::new(),
            requested_at: at,
            started_at: at,
            completed_at: at,
            reason: CycleRequest::new(TriggerReason::manual(format!("run {n}"), at), at),
            chosen_path: PathKey::parse("restart").unwrap(),
            selection: Selection::Fallback,
            outcome: Outcome::Success,
            strength_after: 1.0,
            duration_ms: n,
            summary: format!("cycle {n}"),
            error_detail: None,
        }
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut ledger = HistoryLedger::new(DEFAULT_HISTORY_CAPACITY).unwrap();
        for n in 0..250 {
            ledger.append(entry(n));
        }
        let all = ledger.list(None);
        assert_eq!(all.len(), 200);
        assert_eq!(all.first().unwrap().duration_ms, 249);
        assert_eq!(all.last().unwrap().duration_ms, 50);
    }

    #[test]
    fn list_limit_returns_newest() {
        let mut ledger = HistoryLedger::new(10).unwrap();
        for n in 0..5 {
            ledger.append(entry(n));
        }
        let recent: Vec<u64> = ledger.list(Some(2)).iter().map(|e| e.duration_ms).collect();
        assert_eq!(recent, vec![4, 3]);
        assert_eq!(ledger.list(Some(50)).len(), 5);
        assert_eq!(ledger.latest().unwrap().duration_ms, 4);
    }

    #[test]
    fn shrinking_capacity_evicts_immediately() {
        let mut ledger = HistoryLedger::new(10).unwrap();
        for n in 0..8 {
            ledger.append(entry(n));
        }
        assert_eq!(ledger.set_capacity(3).unwrap(), 5);
        assert_eq!(ledger.list(None).last().unwrap().duration_ms, 5);
        assert!(ledger.set_capacity(0).is_err());
    }

    #[test]
    fn restore_keeps_newest_within_capacity() {
        let mut ledger = HistoryLedger::new(3).unwrap();
        let restored = ledger.restore((0..6).map(entry).collect());
        assert_eq!(restored, 3);
        assert_eq!(ledger.list(None).last().unwrap().duration_ms, 3);
        assert_eq!(ledger.latest().unwrap().duration_ms, 5);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(HistoryLedger::new(0).is_err());
    }
}
