// Copyright (c) 2026 HALO Loop Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Arbiter Ticker - background task for trigger evaluation
//!
//! Drives [`TriggerArbiter::evaluate`] on a fixed interval so time triggers
//! fire and thresholds held through a cooldown are re-checked, and clears a
//! trigger's in-flight flag when a `CycleCompleted` event carrying its id
//! arrives.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::trigger_arbiter::TriggerArbiter;
use crate::domain::clock::Clock;
use crate::domain::events::LoopEvent;
use crate::infrastructure::event_bus::{CompletionReceiver, EventBus, EventBusError};

pub struct ArbiterTicker {
    arbiter: Arc<TriggerArbiter>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    shutdown_token: CancellationToken,
}

impl ArbiterTicker {
    pub fn new(
        arbiter: Arc<TriggerArbiter>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            arbiter,
            event_bus,
            clock,
            tick_interval,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Spawn the ticker. Completion events are subscribed to before this
    /// returns, so none published afterwards are missed.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let completions = self.event_bus.subscribe_completions();
        tokio::spawn(async move {
            self.run(completions).await;
        })
    }

    /// One evaluation pass. Returns how many triggers fired.
    pub fn tick_once(&self) -> usize {
        self.arbiter.evaluate(self.clock.now())
    }

    async fn run(&self, mut completions: CompletionReceiver) {
        info!(
            tick_interval_ms = self.tick_interval.as_millis() as u64,
            triggers = self.arbiter.len(),
            "Starting arbiter ticker"
        );

        let mut tick = interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let fired = self.tick_once();
                    if fired > 0 {
                        debug!(fired, "Arbiter tick fired triggers");
                    }
                }
                completion = completions.recv() => {
                    match completion {
                        Ok(LoopEvent::CycleCompleted { trigger_ids, .. }) => {
                            self.arbiter.acknowledge(&trigger_ids);
                        }
                        Ok(_) => {}
                        Err(EventBusError::Lagged(missed)) => {
                            // Unacknowledged triggers are released by pending_ttl.
                            warn!(missed, "Arbiter ticker missed completion events");
                        }
                        Err(e) => {
                            warn!("Completion stream ended: {}", e);
                            break;
                        }
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping arbiter ticker");
                    break;
                }
            }
        }

        info!("Arbiter ticker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::trigger_arbiter::CycleRequester;
    use crate::domain::clock::ManualClock;
    use crate::domain::cycle::{CycleId, Outcome, RequestDisposition};
    use crate::domain::pheromone::PathKey;
    use crate::domain::trigger::{TriggerReason, TriggerSpec};
    use chrono::Utc;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CountingRequester {
        reasons: Mutex<Vec<TriggerReason>>,
    }

    impl CycleRequester for CountingRequester {
        fn request_cycle(&self, reason: TriggerReason) -> RequestDisposition {
            self.reasons.lock().push(reason);
            RequestDisposition::Started
        }
    }

    fn setup() -> (Arc<ArbiterTicker>, Arc<TriggerArbiter>, Arc<CountingRequester>, Arc<ManualClock>, EventBus) {
        let requester = Arc::new(CountingRequester::default());
        let clock = Arc::new(ManualClock::at_epoch());
        let arbiter = Arc::new(TriggerArbiter::new(
            requester.clone(),
            clock.clone(),
            Duration::from_secs(3600),
        ));
        let bus = EventBus::new(16);
        let ticker = Arc::new(ArbiterTicker::new(
            arbiter.clone(),
            bus.clone(),
            clock.clone(),
            Duration::from_millis(10),
        ));
        (ticker, arbiter, requester, clock, bus)
    }

    #[tokio::test]
    async fn test_tick_once_fires_due_time_trigger() {
        let (ticker, arbiter, requester, clock, _) = setup();
        arbiter.register(TriggerSpec::time("heartbeat", Duration::from_secs(5))).unwrap();

        assert_eq!(ticker.tick_once(), 0);
        clock.advance_secs(5);
        assert_eq!(ticker.tick_once(), 1);
        assert_eq!(requester.reasons.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_completion_event_acknowledges_trigger() {
        let (ticker, arbiter, _, clock, bus) = setup();
        arbiter.register(TriggerSpec::time("heartbeat", Duration::from_secs(5))).unwrap();
        clock.advance_secs(5);
        ticker.tick_once();
        assert!(arbiter.snapshot()[0].pending);

        let token = ticker.shutdown_token();
        let handle = ticker.clone().start();
        bus.publish(LoopEvent::CycleCompleted {
            cycle_id: CycleId::new(),
            chosen_path: PathKey::parse("observe").unwrap(),
            outcome: Outcome::Success,
            duration_ms: 1,
            trigger_ids: vec!["heartbeat".to_string()],
            timestamp: Utc::now(),
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            while arbiter.snapshot()[0].pending {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("trigger should be acknowledged");

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let (ticker, _, _, _, _) = setup();
        let token = ticker.shutdown_token();
        let handle = ticker.start();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("ticker should stop promptly")
            .unwrap();
    }
}
