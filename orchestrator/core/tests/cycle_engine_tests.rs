// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Cycle engine behaviour through its public surface: single-flight,
//! coalescing, reinforcement, bounded history and degraded persistence.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{engine_fixture, eventually, test_config, BrokenRepository, GatedExecutor, HangingExecutor};
use halo_core::application::{CycleEngine, EngineDependencies};
use halo_core::domain::clock::{Clock, ManualClock};
use halo_core::domain::cycle::{EnginePhase, Outcome, RequestDisposition, Selection};
use halo_core::domain::decay::DecayEntry;
use halo_core::domain::events::LoopEvent;
use halo_core::domain::pheromone::PathKey;
use halo_core::domain::repository::PheromoneRepository;
use halo_core::domain::trigger::{TriggerKind, TriggerReason};
use halo_core::infrastructure::event_bus::EventBus;

fn reason(id: &str, kind: TriggerKind) -> TriggerReason {
    TriggerReason::new(id, kind, format!("{id} fired"), DateTime::<Utc>::UNIX_EPOCH)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_run_one_cycle_and_one_follow_up() {
    let executor = GatedExecutor::closed(Outcome::Success);
    let fixture = engine_fixture(test_config(), executor.clone());
    let engine = fixture.engine.clone();

    let mut tasks = Vec::new();
    for i in 0..16 {
        let engine = engine.clone();
        let kind = if i == 11 { TriggerKind::Deploy } else { TriggerKind::Volume };
        tasks.push(tokio::spawn(async move {
            engine.request_cycle(reason(&format!("signal-{i}"), kind))
        }));
    }
    let mut started = 0;
    for task in tasks {
        if task.await.unwrap() == RequestDisposition::Started {
            started += 1;
        }
    }
    assert_eq!(started, 1);

    eventually(|| executor.calls() == 1).await;
    let status = engine.status();
    assert_eq!(status.phase, EnginePhase::Running);
    assert_eq!(status.pending_triggers.len(), 15);

    executor.release(2);
    engine.wait_until_idle().await;

    assert_eq!(executor.calls(), 2);
    assert_eq!(executor.max_active(), 1);

    let history = engine.history(None);
    assert_eq!(history.len(), 2);
    let follow_up = &history[0];
    let total_reasons = 1 + follow_up.reason.merged.len();
    assert_eq!(total_reasons, 15);
    let first_id = &history[1].reason.primary.trigger_id;
    assert!(!follow_up.reason.trigger_ids().contains(first_id));
    if first_id != "signal-11" {
        assert_eq!(follow_up.reason.primary.kind, TriggerKind::Deploy);
    }
    assert_eq!(engine.status().phase, EnginePhase::Idle);
    assert!(engine.status().pending_triggers.is_empty());
}

#[tokio::test]
async fn test_event_sequence_for_queued_request() {
    let executor = GatedExecutor::closed(Outcome::Success);
    let fixture = engine_fixture(test_config(), executor.clone());
    let mut events = fixture.bus.subscribe();

    assert_eq!(
        fixture.engine.request_cycle(reason("heartbeat", TriggerKind::Time)),
        RequestDisposition::Started
    );
    eventually(|| executor.calls() == 1).await;
    assert_eq!(
        fixture.engine.request_cycle(reason("traffic", TriggerKind::Volume)),
        RequestDisposition::Queued
    );
    executor.release(2);
    fixture.engine.wait_until_idle().await;

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event);
    }
    let tags: Vec<&str> = kinds
        .iter()
        .map(|event| match event {
            LoopEvent::CycleRequested { queued: false, .. } => "requested",
            LoopEvent::CycleRequested { queued: true, .. } => "queued",
            LoopEvent::CycleStarted { .. } => "started",
            LoopEvent::CycleCompleted { .. } => "completed",
        })
        .collect();
    assert_eq!(
        tags,
        vec!["requested", "started", "queued", "completed", "started", "completed"]
    );

    match &kinds[3] {
        LoopEvent::CycleCompleted { trigger_ids, .. } => assert_eq!(trigger_ids, &vec!["heartbeat".to_string()]),
        other => panic!("unexpected event {other:?}"),
    }
    match &kinds[5] {
        LoopEvent::CycleCompleted { trigger_ids, .. } => assert_eq!(trigger_ids, &vec!["traffic".to_string()]),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_failure_dampens_strongest_trail() {
    let executor = GatedExecutor::open(Outcome::Failure);
    let fixture = engine_fixture(test_config(), executor);
    let path = PathKey::parse("drain->restart").unwrap();

    fixture
        .pheromones
        .save(&DecayEntry {
            key: path.as_str().to_string(),
            strength: 8.0,
            last_touched_at: fixture.clock.now(),
            last_deposit_at: Some(fixture.clock.now()),
        })
        .await
        .unwrap();
    let restored = fixture.engine.restore().await.unwrap();
    assert_eq!(restored.trails, 1);

    fixture.engine.request_cycle(reason("outage", TriggerKind::Event));
    fixture.engine.wait_until_idle().await;

    let entry = &fixture.engine.history(Some(1))[0];
    assert_eq!(entry.chosen_path, path);
    assert_eq!(entry.selection, Selection::Exploit);
    assert_eq!(entry.outcome, Outcome::Failure);
    assert!((entry.strength_after - 4.0).abs() < 1e-9);
    assert!((fixture.engine.strength_of(&path) - 4.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_success_then_decay_by_half_life() {
    let executor = GatedExecutor::open(Outcome::Success);
    let mut config = test_config();
    config.pheromone.half_life = Duration::from_secs(3600);
    let fixture = engine_fixture(config, executor);
    let observe = PathKey::parse("observe").unwrap();

    fixture.engine.request_cycle(reason("heartbeat", TriggerKind::Time));
    fixture.engine.wait_until_idle().await;
    assert!((fixture.engine.strength_of(&observe) - 1.0).abs() < 1e-9);

    fixture.clock.advance_secs(3600);
    assert!((fixture.engine.strength_of(&observe) - 0.5).abs() < 1e-9);

    let ranked = fixture.engine.top_paths(3);
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].path, observe);
}

#[tokio::test]
async fn test_history_is_bounded_newest_first() {
    let executor = GatedExecutor::open(Outcome::Partial);
    let fixture = engine_fixture(test_config(), executor);

    for i in 0..250 {
        fixture.engine.request_cycle(reason(&format!("tick-{i}"), TriggerKind::Time));
        fixture.engine.wait_until_idle().await;
        fixture.clock.advance_secs(1);
    }

    let history = fixture.engine.history(None);
    assert_eq!(history.len(), 200);
    assert_eq!(history[0].reason.primary.trigger_id, "tick-249");
    assert_eq!(history[199].reason.primary.trigger_id, "tick-50");
    assert_eq!(fixture.engine.history(Some(5)).len(), 5);
    assert_eq!(fixture.engine.status().cycles_completed, 250);
}

#[tokio::test]
async fn test_executor_timeout_is_recorded_as_failure() {
    let mut config = test_config();
    config.engine.executor_timeout = Duration::from_millis(50);
    let fixture = engine_fixture(config, Arc::new(HangingExecutor));

    fixture.engine.request_cycle(reason("heartbeat", TriggerKind::Time));
    tokio::time::timeout(Duration::from_secs(5), fixture.engine.wait_until_idle())
        .await
        .expect("timed-out cycle should still complete");

    let entry = &fixture.engine.history(Some(1))[0];
    assert_eq!(entry.outcome, Outcome::Failure);
    assert!(entry.error_detail.as_deref().unwrap().contains("50ms"));
    assert_eq!(fixture.engine.status().phase, EnginePhase::Idle);
}

async fn degraded_engine(hang: bool) -> (CycleEngine, Arc<GatedExecutor>) {
    let mut config = test_config();
    config.engine.persistence_timeout = Duration::from_millis(50);
    let broken = Arc::new(BrokenRepository { hang });
    let executor = GatedExecutor::open(Outcome::Success);
    let engine = CycleEngine::new(
        config,
        EngineDependencies {
            executor: executor.clone(),
            pheromone_repository: broken.clone(),
            history_repository: broken,
            event_bus: EventBus::new(64),
            clock: Arc::new(ManualClock::at_epoch()),
        },
    )
    .unwrap();
    (engine, executor)
}

#[tokio::test]
async fn test_failing_persistence_degrades_without_stopping_the_loop() {
    let (engine, executor) = degraded_engine(false).await;
    assert!(engine.restore().await.is_err());
    assert!(engine.status().persistence_degraded);

    for i in 0..3 {
        engine.request_cycle(reason(&format!("tick-{i}"), TriggerKind::Time));
        engine.wait_until_idle().await;
    }

    let status = engine.status();
    assert!(status.persistence_degraded);
    assert_eq!(status.cycles_completed, 3);
    assert_eq!(executor.calls(), 3);
    assert_eq!(engine.history(None).len(), 3);
    assert!(engine.flush().await.is_err());
}

#[tokio::test]
async fn test_hanging_persistence_is_bounded() {
    let (engine, _) = degraded_engine(true).await;

    engine.request_cycle(reason("heartbeat", TriggerKind::Time));
    tokio::time::timeout(Duration::from_secs(5), engine.wait_until_idle())
        .await
        .expect("slow storage must not hold the cycle");

    assert!(engine.status().persistence_degraded);
    assert_eq!(engine.history(None).len(), 1);
}

#[tokio::test]
async fn test_reconfigure_mid_cycle_keeps_running_cycle_on_its_snapshot() {
    let executor = GatedExecutor::closed(Outcome::Failure);
    let fixture = engine_fixture(test_config(), executor.clone());
    let path = PathKey::parse("drain->restart").unwrap();
    fixture
        .pheromones
        .save(&DecayEntry {
            key: path.as_str().to_string(),
            strength: 8.0,
            last_touched_at: fixture.clock.now(),
            last_deposit_at: Some(fixture.clock.now()),
        })
        .await
        .unwrap();
    fixture.engine.restore().await.unwrap();

    fixture.engine.request_cycle(reason("outage", TriggerKind::Event));
    eventually(|| executor.calls() == 1).await;

    let mut harsher = test_config();
    harsher.pheromone.damping_factor = 0.25;
    fixture.engine.reconfigure(harsher).unwrap();
    executor.release(1);
    fixture.engine.wait_until_idle().await;

    assert!((fixture.engine.history(Some(1))[0].strength_after - 4.0).abs() < 1e-9);

    fixture.engine.request_cycle(reason("outage", TriggerKind::Event));
    executor.release(1);
    fixture.engine.wait_until_idle().await;
    assert!((fixture.engine.history(Some(1))[0].strength_after - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_half_life_change_settles_elapsed_decay_at_the_old_rate() {
    let mut config = test_config();
    config.pheromone.half_life = Duration::from_secs(100);
    let fixture = engine_fixture(config.clone(), GatedExecutor::open(Outcome::Success));
    let observe = PathKey::parse("observe").unwrap();

    fixture.engine.request_cycle(reason("heartbeat", TriggerKind::Time));
    fixture.engine.wait_until_idle().await;

    // No read between the deposit and the swap.
    fixture.clock.advance_secs(100);
    config.pheromone.half_life = Duration::from_secs(10);
    fixture.engine.reconfigure(config).unwrap();

    assert!((fixture.engine.strength_of(&observe) - 0.5).abs() < 1e-9);
    fixture.clock.advance_secs(10);
    assert!((fixture.engine.strength_of(&observe) - 0.25).abs() < 1e-9);
}
