use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;

use clock::{SystemClock, TestClock};
use common::{ActiveTrade, Exchange, SectorMapPort, TradeSide, TradeStatus};
use risk::{RiskGate, RiskLimits};

struct FlatSectorMap;

impl SectorMapPort for FlatSectorMap {
    fn sector_of(&self, _scrip_code: &str) -> String {
        "UNCLASSIFIED".to_string()
    }
}

fn make_trade(scrip_code: &str, signal_price: f64, position_size: u64) -> ActiveTrade {
    let now = Utc::now();
    ActiveTrade {
        trade_id: uuid::Uuid::new_v4(),
        scrip_code: scrip_code.to_string(),
        exchange: Exchange::Nse,
        side: TradeSide::Long,
        strategy_id: "prop-test".to_string(),
        signal_time: now,
        signal_price,
        stop_loss: signal_price * 0.98,
        target1: signal_price * 1.02,
        target2: signal_price * 1.04,
        status: TradeStatus::WaitingForEntry,
        entry_price: None,
        entry_time: None,
        position_size,
        high_since_entry: None,
        low_since_entry: None,
        trailing_stop: None,
        target1_hit: false,
        entry_delayed: false,
        delay_pivot: None,
        delay_reason: None,
        max_hold_deadline: now + chrono::Duration::hours(6),
        created_at: now,
        extra: None,
        event_seq: 0,
    }
}

fn default_limits() -> RiskLimits {
    RiskLimits {
        max_drawdown_pct: 0.15,
        max_daily_loss_pct: 0.03,
        max_positions: 5,
        max_correlation: 0.70,
        max_sector_concentration: 0.40,
        max_leverage: 2.0,
    }
}

proptest! {
    /// `try_admit` must never panic on extreme price/size inputs, regardless
    /// of whether it ultimately admits or rejects.
    #[test]
    fn admission_never_panics_on_extreme_inputs(
        signal_price in 0.0001f64..1_000_000.0f64,
        position_size in 1u64..100_000u64,
        current_value in 1.0f64..10_000_000.0f64,
    ) {
        let gate = RiskGate::new(
            default_limits(),
            current_value,
            Arc::new(FlatSectorMap),
            Arc::new(SystemClock),
        ).unwrap();

        let proposed = make_trade("RELIANCE", signal_price, position_size);
        let _ = gate.try_admit(&proposed, &[]);
    }

    /// Loosening `max_positions` alone never turns an admit decision of the
    /// same proposed trade into a reject.
    #[test]
    fn loosening_max_positions_never_turns_admit_into_reject(
        n_existing in 0usize..10usize,
    ) {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let strict = RiskGate::new(
            RiskLimits { max_positions: n_existing, ..default_limits() },
            1_000_000.0,
            Arc::new(FlatSectorMap),
            clock.clone(),
        ).unwrap();
        let loose = RiskGate::new(
            RiskLimits { max_positions: n_existing + 10, ..default_limits() },
            1_000_000.0,
            Arc::new(FlatSectorMap),
            clock,
        ).unwrap();

        let existing: Vec<ActiveTrade> = (0..n_existing)
            .map(|i| make_trade(&format!("SCRIP{i}"), 100.0, 1))
            .collect();
        let proposed = make_trade("NEWONE", 100.0, 1);

        if strict.admit(&proposed, &existing) {
            prop_assert!(loose.admit(&proposed, &existing));
        }
    }
}
