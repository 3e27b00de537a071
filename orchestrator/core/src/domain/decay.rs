// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Decay Store
//!
//! Time-decayed weighted key/value ledger. Strength halves every `half_life`
//! of wall-clock time:
//!
//! ```text
//! lambda   = ln(2) / half_life
//! strength = strength * exp(-lambda * (now - last_touched_at))
//! ```
//!
//! Decay is settled lazily on every access: the entry is evaporated up to
//! `now`, `last_touched_at` moves to `now`, and only then is a deposit or a
//! damping factor applied. Because each access folds the elapsed interval
//! into the stored value, evaporating over `t1` then `t2` equals evaporating
//! once over `t1 + t2`, no matter how reads interleave. Nothing here runs in
//! the background; idle time and restarts are accounted for the next time a
//! key is touched.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::clock::elapsed_secs;
use crate::domain::errors::{LoopError, LoopResult};

/// One decaying value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayEntry {
    pub key: String,
    pub strength: f64,
    pub last_touched_at: DateTime<Utc>,
    /// Most recent deposit. Reads advance `last_touched_at` too, so ranking
    /// ties are broken on this instead.
    #[serde(default)]
    pub last_deposit_at: Option<DateTime<Utc>>,
}

impl DecayEntry {
    fn fresh(key: &str, now: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            strength: 0.0,
            last_touched_at: now,
            last_deposit_at: None,
        }
    }

    fn settle(&mut self, lambda: f64, now: DateTime<Utc>) {
        let elapsed = elapsed_secs(self.last_touched_at, now);
        if elapsed > 0.0 {
            self.strength *= (-lambda * elapsed).exp();
        }
        // Never move backwards: a late timestamp must not re-grant decay time.
        if now > self.last_touched_at {
            self.last_touched_at = now;
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecayStore {
    entries: HashMap<String, DecayEntry>,
    lambda: f64,
    half_life: Duration,
}

impl DecayStore {
    pub fn new(half_life: Duration) -> LoopResult<Self> {
        let lambda = lambda_for(half_life)?;
        Ok(Self {
            entries: HashMap::new(),
            lambda,
            half_life,
        })
    }

    pub fn half_life(&self) -> Duration {
        self.half_life
    }

    /// Swap the decay rate at `now`. Every entry is first settled to `now`
    /// at the old rate; the new rate only covers time after `now`.
    pub fn set_half_life(&mut self, half_life: Duration, now: DateTime<Utc>) -> LoopResult<()> {
        let lambda = lambda_for(half_life)?;
        self.evaporate_all(now, 0.0);
        self.lambda = lambda;
        self.half_life = half_life;
        Ok(())
    }

    /// Settle `key` to `now`, then add `amount`. Returns the new strength.
    pub fn deposit(&mut self, key: &str, amount: f64, now: DateTime<Utc>) -> LoopResult<f64> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(LoopError::validation(format!(
                "deposit amount must be a finite non-negative number, got {amount}"
            )));
        }
        let lambda = self.lambda;
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| DecayEntry::fresh(key, now));
        entry.settle(lambda, now);
        entry.strength += amount;
        entry.last_deposit_at = Some(now);
        Ok(entry.strength)
    }

    /// Settle `key` to `now` and return its strength. Unknown keys read as zero
    /// and are not created.
    pub fn read(&mut self, key: &str, now: DateTime<Utc>) -> f64 {
        let lambda = self.lambda;
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.settle(lambda, now);
                entry.strength
            }
            None => 0.0,
        }
    }

    /// Settle `key` to `now`, then multiply by `factor`. Unknown keys are left
    /// alone. Multiplying keeps strength non-negative without a clamp.
    pub fn dampen(&mut self, key: &str, factor: f64, now: DateTime<Utc>) -> LoopResult<f64> {
        if !(0.0..=1.0).contains(&factor) {
            return Err(LoopError::validation(format!(
                "damping factor must be within [0, 1], got {factor}"
            )));
        }
        let lambda = self.lambda;
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.settle(lambda, now);
                entry.strength *= factor;
                Ok(entry.strength)
            }
            None => Ok(0.0),
        }
    }

    /// Eagerly settle every entry and drop those below `min_strength`.
    /// Returns the number of entries dropped.
    pub fn evaporate_all(&mut self, now: DateTime<Utc>, min_strength: f64) -> usize {
        let lambda = self.lambda;
        for entry in self.entries.values_mut() {
            entry.settle(lambda, now);
        }
        if min_strength <= 0.0 {
            return 0;
        }
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.strength >= min_strength);
        before - self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&DecayEntry> {
        self.entries.get(key)
    }

    /// Entries as last settled, without advancing time.
    pub fn entries(&self) -> impl Iterator<Item = &DecayEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load persisted entries. Decay resumes from each entry's stored
    /// `last_touched_at`. Invalid strengths are dropped rather than trusted.
    pub fn restore(&mut self, entries: impl IntoIterator<Item = DecayEntry>) -> usize {
        let mut loaded = 0;
        for entry in entries {
            if !entry.strength.is_finite() || entry.strength < 0.0 {
                tracing::warn!(key = %entry.key, strength = entry.strength, "Skipping persisted entry with invalid strength");
                continue;
            }
            self.entries.insert(entry.key.clone(), entry);
            loaded += 1;
        }
        loaded
    }
}

fn lambda_for(half_life: Duration) -> LoopResult<f64> {
    let secs = half_life.as_secs_f64();
    if secs <= 0.0 {
        return Err(LoopError::validation("half-life must be greater than zero"));
    }
    Ok(std::f64::consts::LN_2 / secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + ChronoDuration::seconds(secs)
    }

    fn store(half_life_secs: u64) -> DecayStore {
        DecayStore::new(Duration::from_secs(half_life_secs)).unwrap()
    }

    #[test]
    fn zero_elapsed_read_returns_deposit_exactly() {
        let mut store = store(60);
        store.deposit("a", 3.25, t(0)).unwrap();
        assert_eq!(store.read("a", t(0)), 3.25);
    }

    #[test]
    fn strength_halves_after_one_half_life() {
        let mut store = store(3600);
        store.deposit("a", 10.0, t(0)).unwrap();
        let strength = store.read("a", t(3600));
        assert!((strength - 5.0).abs() < 1e-9, "got {strength}");
    }

    #[test]
    fn read_settles_decay_into_the_entry() {
        let mut store = store(100);
        store.deposit("a", 8.0, t(0)).unwrap();
        store.read("a", t(100));

        let entry = store.get("a").unwrap();
        assert_eq!(entry.last_touched_at, t(100));
        assert!((entry.strength - 4.0).abs() < 1e-9);
        // Deposit time is unaffected by reads.
        assert_eq!(entry.last_deposit_at, Some(t(0)));
    }

    #[test]
    fn deposit_applies_after_decay() {
        let mut store = store(10);
        store.deposit("a", 4.0, t(0)).unwrap();
        let strength = store.deposit("a", 1.0, t(10)).unwrap();
        assert!((strength - 3.0).abs() < 1e-9);
    }

    #[test]
    fn interleaved_reads_do_not_change_the_result() {
        let mut a = store(45);
        let mut b = store(45);
        a.deposit("k", 7.0, t(0)).unwrap();
        b.deposit("k", 7.0, t(0)).unwrap();

        for s in [3, 17, 40, 41, 90] {
            a.read("k", t(s));
        }
        let interleaved = a.read("k", t(120));
        let once = b.read("k", t(120));
        assert!((interleaved - once).abs() < 1e-9);
    }

    #[test]
    fn rejects_negative_and_non_finite_deposits() {
        let mut store = store(60);
        assert!(matches!(store.deposit("a", -1.0, t(0)), Err(LoopError::Validation(_))));
        assert!(matches!(store.deposit("a", f64::NAN, t(0)), Err(LoopError::Validation(_))));
        assert!(store.get("a").is_none());
    }

    #[test]
    fn dampen_multiplies_and_validates_factor() {
        let mut store = store(1_000_000);
        store.deposit("a", 8.0, t(0)).unwrap();
        let strength = store.dampen("a", 0.5, t(0)).unwrap();
        assert_eq!(strength, 4.0);

        assert!(store.dampen("a", 1.5, t(0)).is_err());
        assert!(store.dampen("a", -0.1, t(0)).is_err());
        assert_eq!(store.dampen("missing", 0.5, t(0)).unwrap(), 0.0);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn unknown_keys_read_as_zero_without_being_created() {
        let mut store = store(60);
        assert_eq!(store.read("ghost", t(5)), 0.0);
        assert!(store.is_empty());
    }

    #[test]
    fn backwards_time_does_not_grow_strength() {
        let mut store = store(60);
        store.deposit("a", 2.0, t(100)).unwrap();
        assert_eq!(store.read("a", t(50)), 2.0);
        assert_eq!(store.get("a").unwrap().last_touched_at, t(100));
    }

    #[test]
    fn evaporate_all_prunes_weak_entries() {
        let mut store = store(1);
        store.deposit("weak", 1.0, t(0)).unwrap();
        store.deposit("strong", 1.0, t(30)).unwrap();

        let dropped = store.evaporate_all(t(30), 1e-4);
        assert_eq!(dropped, 1);
        assert!(store.get("weak").is_none());
        assert_eq!(store.get("strong").unwrap().strength, 1.0);
    }

    #[test]
    fn restore_resumes_decay_from_persisted_timestamp() {
        let mut original = store(600);
        original.deposit("p", 12.0, t(0)).unwrap();
        let persisted: Vec<DecayEntry> = original.entries().cloned().collect();

        let mut reloaded = store(600);
        assert_eq!(reloaded.restore(persisted), 1);
        let strength = reloaded.read("p", t(600));
        assert!((strength - 6.0).abs() < 1e-9);
    }

    #[test]
    fn restore_skips_invalid_strengths() {
        let mut store = store(60);
        let bad = DecayEntry {
            key: "bad".into(),
            strength: -3.0,
            last_touched_at: t(0),
            last_deposit_at: None,
        };
        assert_eq!(store.restore(vec![bad]), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn zero_half_life_is_rejected() {
        assert!(DecayStore::new(Duration::ZERO).is_err());
        let mut store = store(60);
        store.deposit("a", 2.0, t(0)).unwrap();
        assert!(store.set_half_life(Duration::ZERO, t(60)).is_err());
        assert_eq!(store.half_life(), Duration::from_secs(60));
        assert_eq!(store.get("a").unwrap().last_touched_at, t(0));
    }

    #[test]
    fn half_life_change_does_not_backdate_the_new_rate() {
        let mut unread = store(100);
        let mut read_first = store(100);
        unread.deposit("a", 8.0, t(0)).unwrap();
        read_first.deposit("a", 8.0, t(0)).unwrap();
        read_first.read("a", t(100));

        unread.set_half_life(Duration::from_secs(10), t(100)).unwrap();
        read_first.set_half_life(Duration::from_secs(10), t(100)).unwrap();

        for store in [&mut unread, &mut read_first] {
            assert!((store.read("a", t(100)) - 4.0).abs() < 1e-9);
            assert!((store.read("a", t(110)) - 2.0).abs() < 1e-9);
        }
    }
}
