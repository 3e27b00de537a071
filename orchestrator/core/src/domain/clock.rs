// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Clock Abstraction
//!
//! Every time-dependent computation in the loop (evaporation, sliding windows,
//! cooldowns, cycle timing) reads wall-clock time through [`Clock`] instead of
//! calling `Utc::now()` directly. Production wiring uses [`SystemClock`];
//! tests drive a [`ManualClock`] forward deterministically.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the host clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Virtual clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Start at the Unix epoch, convenient for tests that reason in offsets.
    pub fn at_epoch() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        *current += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }

    pub fn advance_millis(&self, millis: i64) {
        self.advance(Duration::milliseconds(millis));
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.current.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

/// Seconds elapsed from `earlier` to `later` as a float. Negative spans
/// (the clock moved backwards) collapse to zero.
pub fn elapsed_secs(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let delta = later.signed_duration_since(earlier);
    match delta.num_microseconds() {
        Some(micros) if micros > 0 => micros as f64 / 1_000_000.0,
        Some(_) => 0.0,
        None => (delta.num_milliseconds().max(0)) as f64 / 1_000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_only_when_told() {
        let clock = ManualClock::at_epoch();
        let start = clock.now();
        assert_eq!(clock.now(), start);

        clock.advance_secs(90);
        assert_eq!(clock.now() - start, Duration::seconds(90));

        clock.advance_millis(250);
        assert_eq!(clock.now() - start, Duration::milliseconds(90_250));
    }

    #[test]
    fn elapsed_secs_clamps_backwards_time() {
        let t0 = DateTime::<Utc>::UNIX_EPOCH;
        let t1 = t0 + Duration::milliseconds(1_500);
        assert_eq!(elapsed_secs(t0, t1), 1.5);
        assert_eq!(elapsed_secs(t1, t0), 0.0);
        assert_eq!(elapsed_secs(t0, t0), 0.0);
    }
}
