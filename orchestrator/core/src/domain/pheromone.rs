// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Pheromone Table
//!
//! Action paths reinforced by outcomes and evaporated by time, in the manner
//! of an ant-colony trail. Built on [`DecayStore`], keyed by [`PathKey`].
//!
//! | Outcome | Effect on the trail |
//! |---------|---------------------|
//! | `Success` | deposit `1.0 × reinforcement` |
//! | `Partial` | deposit `partial_quality × reinforcement` |
//! | `Failure` | multiply by `damping_factor` |

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cycle::Outcome;
use crate::domain::decay::{DecayEntry, DecayStore};
use crate::domain::errors::{LoopError, LoopResult};

/// Reserved separator between step ids.
pub const PATH_SEPARATOR: &str = "->";

/// Canonical key for an ordered sequence of action steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathKey(String);

impl PathKey {
    /// Build a key from ordered step ids. Steps are trimmed; empty steps and
    /// steps containing the separator are rejected.
    pub fn build<I, S>(steps: I) -> LoopResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parts = Vec::new();
        for step in steps {
            let step = step.as_ref().trim();
            if step.is_empty() {
                return Err(LoopError::validation("path step ids cannot be empty"));
            }
            if step.contains(PATH_SEPARATOR) {
                return Err(LoopError::validation(format!(
                    "path step '{step}' contains the reserved separator '{PATH_SEPARATOR}'"
                )));
            }
            parts.push(step.to_string());
        }
        if parts.is_empty() {
            return Err(LoopError::validation("a path needs at least one step"));
        }
        Ok(Self(parts.join(PATH_SEPARATOR)))
    }

    /// Re-validate a key that came from storage or from a caller.
    pub fn parse(raw: &str) -> LoopResult<Self> {
        Self::build(raw.split(PATH_SEPARATOR))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn steps(&self) -> Vec<&str> {
        self.0.split(PATH_SEPARATOR).collect()
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tunables for reinforcement and evaporation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PheromoneSettings {
    /// Time for an untouched trail to lose half its strength.
    #[serde(with = "humantime_serde", default = "default_half_life")]
    pub half_life: Duration,

    /// Deposit quality credited for a partial outcome.
    #[serde(default = "default_partial_quality")]
    pub partial_quality: f64,

    /// Multiplier applied to a trail on failure.
    #[serde(default = "default_damping_factor")]
    pub damping_factor: f64,

    /// Base amount scaled by outcome quality on each deposit.
    #[serde(default = "default_reinforcement")]
    pub reinforcement: f64,

    /// Trails evaporated below this strength are forgotten. Zero keeps everything.
    #[serde(default = "default_min_strength")]
    pub min_strength: f64,
}

impl Default for PheromoneSettings {
    fn default() -> Self {
        Self {
            half_life: default_half_life(),
            partial_quality: default_partial_quality(),
            damping_factor: default_damping_factor(),
            reinforcement: default_reinforcement(),
            min_strength: default_min_strength(),
        }
    }
}

impl PheromoneSettings {
    pub fn validate(&self) -> LoopResult<()> {
        if self.half_life.is_zero() {
            return Err(LoopError::validation("pheromone.half_life must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.partial_quality) {
            return Err(LoopError::validation("pheromone.partial_quality must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.damping_factor) {
            return Err(LoopError::validation("pheromone.damping_factor must be within [0, 1]"));
        }
        if !self.reinforcement.is_finite() || self.reinforcement <= 0.0 {
            return Err(LoopError::validation("pheromone.reinforcement must be positive"));
        }
        if !self.min_strength.is_finite() || self.min_strength < 0.0 {
            return Err(LoopError::validation("pheromone.min_strength cannot be negative"));
        }
        Ok(())
    }
}

fn default_half_life() -> Duration {
    Duration::from_secs(6 * 60 * 60)
}

fn default_partial_quality() -> f64 {
    0.3
}

fn default_damping_factor() -> f64 {
    0.5
}

fn default_reinforcement() -> f64 {
    1.0
}

fn default_min_strength() -> f64 {
    1e-4
}

/// A path with its strength as of the ranking time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPath {
    pub path: PathKey,
    pub strength: f64,
    pub last_deposit_at: Option<DateTime<Utc>>,
}

pub struct PheromoneTable {
    store: DecayStore,
    settings: PheromoneSettings,
}

impl PheromoneTable {
    pub fn new(settings: PheromoneSettings) -> LoopResult<Self> {
        settings.validate()?;
        let store = DecayStore::new(settings.half_life)?;
        Ok(Self { store, settings })
    }

    pub fn settings(&self) -> &PheromoneSettings {
        &self.settings
    }

    /// Replace the tunables in one step. Trails are settled to `now` at the
    /// old half-life first.
    pub fn reconfigure(&mut self, settings: PheromoneSettings, now: DateTime<Utc>) -> LoopResult<()> {
        settings.validate()?;
        self.store.set_half_life(settings.half_life, now)?;
        self.settings = settings;
        Ok(())
    }

    pub fn build_path<I, S>(steps: I) -> LoopResult<PathKey>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        PathKey::build(steps)
    }

    /// Deposit `quality × reinforcement` onto `path`.
    pub fn deposit(&mut self, path: &PathKey, quality: f64, now: DateTime<Utc>) -> LoopResult<f64> {
        if !(0.0..=1.0).contains(&quality) {
            return Err(LoopError::validation(format!(
                "outcome quality must be within [0, 1], got {quality}"
            )));
        }
        self.store
            .deposit(path.as_str(), quality * self.settings.reinforcement, now)
    }

    /// Dampen `path` by the configured factor.
    pub fn penalize(&mut self, path: &PathKey, now: DateTime<Utc>) -> LoopResult<f64> {
        self.store
            .dampen(path.as_str(), self.settings.damping_factor, now)
    }

    /// Apply the learning rule for `outcome`. Returns the resulting strength.
    pub fn reinforce(&mut self, path: &PathKey, outcome: Outcome, now: DateTime<Utc>) -> LoopResult<f64> {
        match outcome {
            Outcome::Success => self.deposit(path, 1.0, now),
            Outcome::Partial => self.deposit(path, self.settings.partial_quality, now),
            Outcome::Failure => self.penalize(path, now),
        }
    }

    pub fn strength_of(&mut self, path: &PathKey, now: DateTime<Utc>) -> f64 {
        self.store.read(path.as_str(), now)
    }

    /// Evaporate every trail to `now`, then rank by strength descending.
    /// Equal strengths go to the most recently reinforced trail; keys settle
    /// anything left so the order is total.
    pub fn top_paths(&mut self, n: usize, now: DateTime<Utc>) -> Vec<RankedPath> {
        let pruned = self.store.evaporate_all(now, self.settings.min_strength);
        if pruned > 0 {
            tracing::debug!(pruned, "Forgot evaporated pheromone trails");
        }

        let mut ranked: Vec<RankedPath> = self
            .store
            .entries()
            .filter_map(|entry| {
                PathKey::parse(&entry.key).ok().map(|path| RankedPath {
                    path,
                    strength: entry.strength,
                    last_deposit_at: entry.last_deposit_at,
                })
            })
            .collect();

        ranked.sort_by(compare_ranked);
        ranked.truncate(n);
        ranked
    }

    /// Snapshot of one trail as last settled.
    pub fn entry(&self, path: &PathKey) -> Option<&DecayEntry> {
        self.store.get(path.as_str())
    }

    pub fn entries(&self) -> Vec<DecayEntry> {
        self.store.entries().cloned().collect()
    }

    /// Load persisted trails, storing each under its canonical path key.
    pub fn restore(&mut self, entries: Vec<DecayEntry>) -> usize {
        let valid = entries.into_iter().filter_map(|mut entry| match PathKey::parse(&entry.key) {
            Ok(path) => {
                entry.key = path.as_str().to_string();
                Some(entry)
            }
            Err(_) => {
                tracing::warn!(key = %entry.key, "Skipping persisted trail with malformed path key");
                None
            }
        });
        self.store.restore(valid)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

fn compare_ranked(a: &RankedPath, b: &RankedPath) -> Ordering {
    b.strength
        .partial_cmp(&a.strength)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.last_deposit_at.cmp(&a.last_deposit_at))
        .then_with(|| a.path.cmp(&b.path))
}
