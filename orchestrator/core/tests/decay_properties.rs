// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0

use std::time::Duration;

use chrono::{DateTime, Utc};
use halo_core::domain::decay::DecayStore;
use proptest::prelude::*;

const KEY: &str = "drain->restart";

fn at(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::milliseconds(millis)
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

#[derive(Debug, Clone)]
enum Op {
    Deposit(f64),
    Dampen(f64),
    Read,
    Wait(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0.0f64..100.0).prop_map(Op::Deposit),
        (0.0f64..=1.0).prop_map(Op::Dampen),
        Just(Op::Read),
        (0i64..86_400_000).prop_map(Op::Wait),
    ]
}

proptest! {
    #[test]
    fn strength_never_goes_negative(ops in prop::collection::vec(op(), 1..64), half_life_secs in 1u64..100_000) {
        let mut store = DecayStore::new(Duration::from_secs(half_life_secs)).unwrap();
        let mut now = 0i64;
        for op in ops {
            match op {
                Op::Deposit(amount) => { store.deposit(KEY, amount, at(now)).unwrap(); }
                Op::Dampen(factor) => { store.dampen(KEY, factor, at(now)).unwrap(); }
                Op::Read => {}
                Op::Wait(millis) => now += millis,
            }
            let strength = store.read(KEY, at(now));
            prop_assert!(strength >= 0.0);
            prop_assert!(strength.is_finite());
        }
    }

    #[test]
    fn settling_in_steps_matches_settling_once(
        amount in 0.1f64..1_000.0,
        first in 0i64..10_000_000,
        second in 0i64..10_000_000,
    ) {
        let half_life = Duration::from_secs(3_600);
        let mut stepped = DecayStore::new(half_life).unwrap();
        let mut direct = DecayStore::new(half_life).unwrap();
        stepped.deposit(KEY, amount, at(0)).unwrap();
        direct.deposit(KEY, amount, at(0)).unwrap();

        stepped.read(KEY, at(first));
        let via_steps = stepped.read(KEY, at(first + second));
        let at_once = direct.read(KEY, at(first + second));
        prop_assert!(close(via_steps, at_once), "{via_steps} vs {at_once}");
    }

    #[test]
    fn reading_twice_at_the_same_instant_changes_nothing(amount in 0.0f64..1_000.0, when in 0i64..10_000_000) {
        let mut store = DecayStore::new(Duration::from_secs(600)).unwrap();
        store.deposit(KEY, amount, at(0)).unwrap();
        let once = store.read(KEY, at(when));
        let twice = store.read(KEY, at(when));
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn one_half_life_halves_strength(amount in 0.1f64..1_000.0, half_life_secs in 1u64..1_000_000) {
        let mut store = DecayStore::new(Duration::from_secs(half_life_secs)).unwrap();
        store.deposit(KEY, amount, at(0)).unwrap();
        let after = store.read(KEY, at(half_life_secs as i64 * 1_000));
        prop_assert!(close(after, amount / 2.0), "{after} vs {}", amount / 2.0);
    }
}

#[test]
fn clock_moving_backwards_does_not_grow_strength() {
    let mut store = DecayStore::new(Duration::from_secs(60)).unwrap();
    store.deposit(KEY, 4.0, at(60_000)).unwrap();
    assert_eq!(store.read(KEY, at(0)), 4.0);
    assert_eq!(store.read(KEY, at(60_000)), 4.0);
}
