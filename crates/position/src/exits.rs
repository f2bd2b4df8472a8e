use common::{ActiveTrade, ExtraContext, TradeSide};

/// Outcome of one exit-priority evaluation pass over a live trade.
/// Checked in order; the first match wins — stop always dominates within
/// the same call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    None,
    StopLoss,
    Target1Partial,
    Trailing,
    Target2,
    PrevCloseDrop,
}

/// Update `high_since_entry`/`low_since_entry` watermarks. Must run before
/// `evaluate` so trailing-stop math sees the current extreme.
pub fn update_watermarks(trade: &mut ActiveTrade, price: f64) {
    trade.high_since_entry = Some(trade.high_since_entry.map_or(price, |h| h.max(price)));
    trade.low_since_entry = Some(trade.low_since_entry.map_or(price, |l| l.min(price)));
}

/// Priority 1-5 exit check for an `ACTIVE`/`PARTIAL_EXIT` trade. Does not
/// mutate; callers apply the chosen transition themselves.
pub fn evaluate(trade: &ActiveTrade, price: f64, trail_pct: f64) -> ExitDecision {
    if hit_stop_loss(trade, price) {
        return ExitDecision::StopLoss;
    }
    if !trade.target1_hit && hit_target1(trade, price) {
        return ExitDecision::Target1Partial;
    }
    if trade.target1_hit && hit_trailing(trade, price, trail_pct) {
        return ExitDecision::Trailing;
    }
    if hit_target2(trade, price) {
        return ExitDecision::Target2;
    }
    if trade.target1_hit && hit_prev_close_drop(trade, price) {
        return ExitDecision::PrevCloseDrop;
    }
    ExitDecision::None
}

fn hit_stop_loss(trade: &ActiveTrade, price: f64) -> bool {
    match trade.side {
        TradeSide::Long => price <= trade.stop_loss,
        TradeSide::Short => price >= trade.stop_loss,
    }
}

fn hit_target1(trade: &ActiveTrade, price: f64) -> bool {
    match trade.side {
        TradeSide::Long => price >= trade.target1,
        TradeSide::Short => price <= trade.target1,
    }
}

fn hit_target2(trade: &ActiveTrade, price: f64) -> bool {
    match trade.side {
        TradeSide::Long => price >= trade.target2,
        TradeSide::Short => price <= trade.target2,
    }
}

/// Hit when price crosses back through the current trailing stop. The
/// stop itself is maintained by `recompute_trailing_stop`, which only ever
/// tightens it, so this is a plain comparison.
fn hit_trailing(trade: &ActiveTrade, price: f64, trail_pct: f64) -> bool {
    let trail = trade.trailing_stop.unwrap_or_else(|| match trade.side {
        TradeSide::Long => trade.high_since_entry.unwrap_or(price) * (1.0 - trail_pct),
        TradeSide::Short => trade.low_since_entry.unwrap_or(price) * (1.0 + trail_pct),
    });
    match trade.side {
        TradeSide::Long => price <= trail,
        TradeSide::Short => price >= trail,
    }
}

fn hit_prev_close_drop(trade: &ActiveTrade, price: f64) -> bool {
    let Some(ExtraContext::EnhancedPA { prev_close }) = trade.extra else {
        return false;
    };
    match trade.side {
        TradeSide::Long => price <= prev_close * 0.99,
        TradeSide::Short => price >= prev_close * 1.01,
    }
}

/// Recompute the trailing stop after a favorable watermark move. Only ever
/// tightens — never called before `target1_hit`.
pub fn recompute_trailing_stop(trade: &mut ActiveTrade, trail_pct: f64) {
    let candidate = match trade.side {
        TradeSide::Long => trade.high_since_entry.map(|h| h * (1.0 - trail_pct)),
        TradeSide::Short => trade.low_since_entry.map(|l| l * (1.0 + trail_pct)),
    };
    let Some(candidate) = candidate else { return };
    trade.trailing_stop = Some(match trade.trailing_stop {
        Some(current) => match trade.side {
            TradeSide::Long => current.max(candidate),
            TradeSide::Short => current.min(candidate),
        },
        None => candidate,
    });
}
