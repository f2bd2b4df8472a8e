use common::{ActiveTrade, Config, DelayReason, Error, ExtraContext, Result, Signal, TradeSide};

/// Validate a signal against §3's setup invariants before a trade is ever
/// created: stop/target ordering, max stop distance, min move, min RR.
pub fn validate_signal(signal: &Signal, config: &Config) -> Result<()> {
    let (sl_ok, t1_ok) = match signal.side {
        TradeSide::Long => (
            signal.stop_loss < signal.signal_price,
            signal.signal_price < signal.target1,
        ),
        TradeSide::Short => (
            signal.stop_loss > signal.signal_price,
            signal.signal_price > signal.target1,
        ),
    };
    if !sl_ok || !t1_ok {
        return Err(Error::ValidationFailure(format!(
            "stop_loss/target1 ordering invalid for {:?} signal on {}",
            signal.side, signal.scrip_code
        )));
    }

    let stop_distance_pct = (signal.signal_price - signal.stop_loss).abs() / signal.signal_price;
    if stop_distance_pct > config.max_stop_pct {
        return Err(Error::ValidationFailure(format!(
            "stop distance {:.4} exceeds max_stop_pct {:.4}",
            stop_distance_pct, config.max_stop_pct
        )));
    }

    let move_pct = (signal.target1 - signal.signal_price).abs() / signal.signal_price;
    if move_pct < config.min_move_pct {
        return Err(Error::ValidationFailure(format!(
            "target1 move {:.4} below min_move_pct {:.4}",
            move_pct, config.min_move_pct
        )));
    }

    let risk = (signal.signal_price - signal.stop_loss).abs();
    let reward = (signal.target1 - signal.signal_price).abs();
    if risk <= 0.0 || reward / risk < config.min_rr {
        return Err(Error::ValidationFailure(format!(
            "reward/risk below min_rr {:.2}",
            config.min_rr
        )));
    }

    Ok(())
}

/// Default `target2` when the signal does not supply one.
/// Derived from `target1` rather than `signal_price` directly, so it always
/// sits beyond target1 in the trade direction regardless of how far target1
/// itself is from the signal price.
pub fn default_target2(signal: &Signal) -> f64 {
    signal.target2.unwrap_or(match signal.side {
        TradeSide::Long => signal.target1 * 1.03,
        TradeSide::Short => signal.target1 * 0.97,
    })
}

/// Outcome of entry-delay analysis at trade creation.
pub struct DelayAnalysis {
    pub delayed: bool,
    pub pivot: Option<f64>,
    pub reason: Option<DelayReason>,
}

/// `target_proximity = 1 - |target1 - signal_price| / signal_price`; delay
/// if `>= 0.995`, i.e. target1 sits within half a percent of the signal
/// price and leaves no room to run. Else `pivot_proximity =
/// |signal_price - stop_loss| / signal_price`; delay if `<= 0.02` with
/// `delay_pivot = stop_loss`. Otherwise immediate.
pub fn analyze_entry_delay(signal: &Signal) -> DelayAnalysis {
    let target_proximity =
        1.0 - (signal.target1 - signal.signal_price).abs() / signal.signal_price;
    if target_proximity >= 0.995 {
        return DelayAnalysis {
            delayed: true,
            pivot: None,
            reason: Some(DelayReason::Target50PercentClose),
        };
    }

    let pivot_proximity = (signal.signal_price - signal.stop_loss).abs() / signal.signal_price;
    if pivot_proximity <= 0.02 {
        return DelayAnalysis {
            delayed: true,
            pivot: Some(signal.stop_loss),
            reason: Some(DelayReason::PivotTooClose),
        };
    }

    DelayAnalysis {
        delayed: false,
        pivot: None,
        reason: None,
    }
}

/// Whether `price` triggers entry for a `WAITING_FOR_ENTRY` trade, and the
/// fill price to stamp. `single_trade_mode` selects between the two
/// delayed-entry variants: pivot-retest ("bulletproof") when `true`,
/// pivot-breakout when `false`.
pub fn check_entry(trade: &ActiveTrade, price: f64, single_trade_mode: bool) -> Option<f64> {
    if price <= 0.0 {
        return None;
    }

    if !trade.entry_delayed {
        return check_immediate_entry(trade, price);
    }

    if single_trade_mode {
        check_pivot_retest_entry(trade, price)
    } else {
        check_pivot_breakout_entry(trade, price)
    }
}

fn check_immediate_entry(trade: &ActiveTrade, price: f64) -> Option<f64> {
    let sp = trade.signal_price;
    let triggered = match trade.side {
        TradeSide::Long => price >= sp * 1.001 || (price - sp).abs() <= sp * 0.002,
        TradeSide::Short => price <= sp * 0.999 || (price - sp).abs() <= sp * 0.002,
    };
    triggered.then_some(price)
}

/// `retest_zone = stop_loss + 0.2 * (signal_price - stop_loss)`, mirrored
/// for SHORT. Enter while price sits between the stop and the retest zone.
pub fn retest_zone(trade: &ActiveTrade) -> f64 {
    trade.stop_loss + 0.2 * (trade.signal_price - trade.stop_loss)
}

fn check_pivot_retest_entry(trade: &ActiveTrade, price: f64) -> Option<f64> {
    let zone = match &trade.extra {
        Some(ExtraContext::Bulletproof { retest_zone }) => *retest_zone,
        _ => retest_zone(trade),
    };
    let triggered = match trade.side {
        TradeSide::Long => price > trade.stop_loss && price <= zone,
        TradeSide::Short => price < trade.stop_loss && price >= zone,
    };
    triggered.then_some(price)
}

fn check_pivot_breakout_entry(trade: &ActiveTrade, price: f64) -> Option<f64> {
    let pivot = trade.delay_pivot?;
    let triggered = match trade.side {
        TradeSide::Long => price > pivot * 1.001,
        TradeSide::Short => price < pivot * 0.999,
    };
    triggered.then_some(price)
}
