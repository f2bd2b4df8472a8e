//! Coordinator: owns the `SignalIn`/`PriceTick` ingress
//! queues and bridges them through the Trading-Hours Port and Risk Gate to
//! the Arbiter and Position Manager.

pub mod coordinator;

pub use coordinator::{Coordinator, CoordinatorHandle};

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    use clock::TestClock;
    use common::{
        Config, Event, Exchange, OiLabel, RankInputs, Result, SectorMapPort, Signal, SignalSource,
        TradeSide, TradingHoursPort,
    };
    use risk::{RiskGate, RiskLimits};

    use super::*;

    struct AlwaysOpen;
    impl TradingHoursPort for AlwaysOpen {
        fn is_tradeable(&self, _exchange: Exchange, _ist_time: DateTime<Utc>) -> bool {
            true
        }
    }

    struct NeverOpen;
    impl TradingHoursPort for NeverOpen {
        fn is_tradeable(&self, _exchange: Exchange, _ist_time: DateTime<Utc>) -> bool {
            false
        }
    }

    struct FlatSectorMap;
    impl SectorMapPort for FlatSectorMap {
        fn sector_of(&self, _scrip_code: &str) -> String {
            "OTHER".to_string()
        }
    }

    #[derive(Default)]
    struct RecordingEventBus {
        events: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl common::EventBusPort for RecordingEventBus {
        async fn publish(&self, event: Event) -> Result<()> {
            self.events.lock().expect("poisoned").push(event);
            Ok(())
        }
    }

    fn signal(scrip: &str, price: f64, stop: f64, target1: f64) -> Signal {
        Signal {
            scrip_code: scrip.to_string(),
            exchange: Exchange::Nse,
            side: TradeSide::Long,
            signal_price: price,
            stop_loss: stop,
            target1,
            target2: None,
            strategy_id: "bulletproof".to_string(),
            source: SignalSource::Confirmed,
            received_at: Utc::now(),
            confidence: 0.9,
            rank_inputs: RankInputs { oi_ratio: 2.0, oi_label: OiLabel::LongBuildup, volume_surge: 3.0 },
        }
    }

    fn risk_gate(clock: Arc<TestClock>) -> Arc<RiskGate> {
        let limits = RiskLimits {
            max_drawdown_pct: 0.5,
            max_daily_loss_pct: 0.5,
            max_positions: 5,
            max_correlation: 0.9,
            max_sector_concentration: 0.9,
            max_leverage: 5.0,
        };
        Arc::new(RiskGate::new(limits, 1_000_000.0, Arc::new(FlatSectorMap), clock).expect("valid limits"))
    }

    #[tokio::test(start_paused = true)]
    async fn admitted_signal_reaches_the_position_manager() {
        let start = Utc.with_ymd_and_hms(2026, 7, 28, 9, 15, 0).unwrap();
        let clock: Arc<TestClock> = Arc::new(TestClock::new(start));
        let event_bus = Arc::new(RecordingEventBus::default());

        let (coordinator, handle, mut order_rx, _verification_results_tx) = Coordinator::new(
            Config { trade_notional: 10_000.0, max_stop_pct: 0.05, ..Config::default() },
            clock.clone(),
            risk_gate(clock.clone()),
            Arc::new(AlwaysOpen),
            event_bus.clone(),
        );
        tokio::spawn(coordinator.run());

        handle.submit_signal(signal("RELIANCE", 100.0, 97.8, 105.0)).await.unwrap();

        // Clears the arbiter's 35 s layer1 window and 60 s global batch.
        tokio::time::advance(StdDuration::from_secs(96)).await;
        tokio::task::yield_now().await;

        handle.submit_tick(common::PriceTick {
            scrip_code: "RELIANCE".to_string(),
            price: 100.0,
            timestamp: clock.now(),
        });
        tokio::task::yield_now().await;

        let order = order_rx.recv().await.expect("entry order submitted");
        assert_eq!(order.ticket.scrip_code, "RELIANCE");
    }

    #[tokio::test(start_paused = true)]
    async fn signal_outside_trading_hours_never_reaches_the_arbiter() {
        let start = Utc.with_ymd_and_hms(2026, 7, 28, 20, 0, 0).unwrap();
        let clock: Arc<TestClock> = Arc::new(TestClock::new(start));
        let event_bus = Arc::new(RecordingEventBus::default());

        let (coordinator, handle, mut order_rx, _verification_results_tx) = Coordinator::new(
            Config::default(),
            clock.clone(),
            risk_gate(clock.clone()),
            Arc::new(NeverOpen),
            event_bus,
        );
        tokio::spawn(coordinator.run());

        handle.submit_signal(signal("TCS", 100.0, 98.5, 103.0)).await.unwrap();

        tokio::time::advance(StdDuration::from_secs(96)).await;
        tokio::task::yield_now().await;

        assert!(order_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn risk_gate_rejection_emits_a_failed_trade_result() {
        let start = Utc.with_ymd_and_hms(2026, 7, 28, 9, 15, 0).unwrap();
        let clock: Arc<TestClock> = Arc::new(TestClock::new(start));
        let event_bus = Arc::new(RecordingEventBus::default());

        // A starting portfolio value too small to support even one trade at
        // the default notional forces the leverage check to reject.
        let tight_limits = RiskLimits {
            max_drawdown_pct: 0.5,
            max_daily_loss_pct: 0.5,
            max_positions: 5,
            max_correlation: 0.9,
            max_sector_concentration: 0.9,
            max_leverage: 1.0,
        };
        let risk_gate = Arc::new(
            RiskGate::new(tight_limits, 500.0, Arc::new(FlatSectorMap), clock.clone())
                .expect("valid limits"),
        );

        let (coordinator, handle, mut order_rx, _verification_results_tx) = Coordinator::new(
            Config::default(),
            clock.clone(),
            risk_gate,
            Arc::new(AlwaysOpen),
            event_bus.clone(),
        );
        tokio::spawn(coordinator.run());

        handle.submit_signal(signal("INFY", 100.0, 98.5, 103.0)).await.unwrap();

        tokio::time::advance(StdDuration::from_secs(96)).await;
        tokio::task::yield_now().await;

        assert!(order_rx.try_recv().is_err());
        let events = event_bus.events.lock().expect("poisoned");
        assert!(events.iter().any(|e| matches!(
            e,
            Event::TradeResult(r) if r.scrip_code == "INFY" && matches!(r.outcome, common::TradeOutcome::Failed)
        )));
    }

    #[tokio::test]
    async fn full_tick_queue_drops_newest_and_counts_it() {
        let clock: Arc<TestClock> = Arc::new(TestClock::new(Utc::now()));
        let event_bus = Arc::new(RecordingEventBus::default());
        let (coordinator, handle, _order_rx, _verification_results_tx) = Coordinator::new(
            Config::default(),
            clock.clone(),
            risk_gate(clock),
            Arc::new(AlwaysOpen),
            event_bus,
        );
        // Don't spawn `run` — the tick queue fills up and every submission
        // past capacity is a drop we can observe directly.
        drop(coordinator);

        for i in 0..5000 {
            handle.submit_tick(common::PriceTick {
                scrip_code: "X".to_string(),
                price: 100.0 + i as f64,
                timestamp: Utc::now(),
            });
        }

        assert!(handle.dropped_tick_count() > 0);
    }
}
