use std::sync::{Arc, Mutex};

use chrono::Duration as ChronoDuration;
use tracing::{info, warn};

use common::{ActiveTrade, PortfolioState, Result, SectorMapPort};

use crate::limits::RiskLimits;

/// Reason `try_admit` rejected a proposed trade.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionReject {
    EmergencyLatched,
    MaxDrawdownBreached,
    MaxDailyLossBreached,
    MaxPositionsReached,
    CorrelationTooHigh { other_scrip: String, corr: f64 },
    SectorConcentrationExceeded { sector: String, pct: f64 },
    LeverageExceeded { leverage: f64 },
}

impl std::fmt::Display for AdmissionReject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionReject::EmergencyLatched => write!(f, "EMERGENCY_STOP"),
            AdmissionReject::MaxDrawdownBreached => write!(f, "MAX_DRAWDOWN_BREACHED"),
            AdmissionReject::MaxDailyLossBreached => write!(f, "MAX_DAILY_LOSS_BREACHED"),
            AdmissionReject::MaxPositionsReached => write!(f, "MAX_POSITIONS_REACHED"),
            AdmissionReject::CorrelationTooHigh { other_scrip, corr } => {
                write!(f, "CORRELATION_TOO_HIGH(vs {other_scrip}, {corr:.2})")
            }
            AdmissionReject::SectorConcentrationExceeded { sector, pct } => {
                write!(f, "SECTOR_CONCENTRATION_EXCEEDED({sector}, {pct:.2})")
            }
            AdmissionReject::LeverageExceeded { leverage } => {
                write!(f, "LEVERAGE_EXCEEDED({leverage:.2})")
            }
        }
    }
}

/// Snapshot returned by `RiskGate::diagnostics`.
#[derive(Debug, Clone)]
pub struct RiskDiagnostics {
    pub current_value: f64,
    pub peak_value: f64,
    pub drawdown_pct: f64,
    pub emergency_stop: bool,
    pub emergency_reason: Option<String>,
    pub daily_pnl_today: f64,
}

/// The synchronous "can this trade be taken" admission gate.
///
/// All of `admit`/`try_admit` and `update_value` run under one mutex, so no
/// caller can observe a portfolio value update interleaved with an
/// in-progress admission decision.
pub struct RiskGate {
    limits: RiskLimits,
    sector_map: Arc<dyn SectorMapPort>,
    clock: Arc<dyn clock::Clock>,
    state: Mutex<PortfolioState>,
}

impl RiskGate {
    pub fn new(
        limits: RiskLimits,
        initial_value: f64,
        sector_map: Arc<dyn SectorMapPort>,
        clock: Arc<dyn clock::Clock>,
    ) -> Result<Self> {
        let limits = limits.validate()?;
        Ok(Self {
            limits,
            sector_map,
            clock,
            state: Mutex::new(PortfolioState::new(initial_value)),
        })
    }

    /// Boolean convenience wrapper over `try_admit`.
    pub fn admit(&self, proposed: &ActiveTrade, current_positions: &[ActiveTrade]) -> bool {
        self.try_admit(proposed, current_positions).is_ok()
    }

    /// Same decision as `admit`, but surfaces the specific reason for
    /// rejection so callers can log/emit it.
    pub fn try_admit(
        &self,
        proposed: &ActiveTrade,
        current_positions: &[ActiveTrade],
    ) -> std::result::Result<(), AdmissionReject> {
        let mut state = self.state.lock().expect("risk gate mutex poisoned");

        // 1. Emergency-stop latch clear.
        if state.emergency_stop {
            return Err(AdmissionReject::EmergencyLatched);
        }

        // 2. Drawdown check — breach latches emergency-stop.
        let drawdown = state.drawdown();
        if drawdown >= self.limits.max_drawdown_pct {
            state.emergency_stop = true;
            state.emergency_time = Some(self.clock.now());
            state.emergency_reason = Some("MAX_DRAWDOWN_BREACHED".to_string());
            warn!(
                drawdown_pct = drawdown * 100.0,
                "max drawdown breached — emergency stop latched"
            );
            return Err(AdmissionReject::MaxDrawdownBreached);
        }

        // 3. Daily loss check.
        let today = self.clock.now().date_naive();
        let daily_pnl = state.daily.get(&today).map(|d| d.pnl).unwrap_or(0.0);
        if state.current_value > 0.0 {
            let daily_loss_pct = (-daily_pnl).max(0.0) / state.current_value;
            if daily_loss_pct >= self.limits.max_daily_loss_pct {
                return Err(AdmissionReject::MaxDailyLossBreached);
            }
        }

        // 4. Position-count check.
        if current_positions.len() >= self.limits.max_positions {
            return Err(AdmissionReject::MaxPositionsReached);
        }

        // 5. Correlation check.
        let proposed_sector = self.sector_map.sector_of(&proposed.scrip_code);
        for other in current_positions {
            let corr = if other.scrip_code == proposed.scrip_code {
                1.0
            } else if self.sector_map.sector_of(&other.scrip_code) == proposed_sector {
                0.7
            } else {
                0.3
            };
            if corr > self.limits.max_correlation {
                return Err(AdmissionReject::CorrelationTooHigh {
                    other_scrip: other.scrip_code.clone(),
                    corr,
                });
            }
        }

        // 6. Sector concentration check (including the proposed trade).
        if state.current_value > 0.0 {
            let sector_value: f64 = current_positions
                .iter()
                .filter(|p| self.sector_map.sector_of(&p.scrip_code) == proposed_sector)
                .map(exposure)
                .sum::<f64>()
                + exposure(proposed);
            let sector_pct = sector_value / state.current_value;
            if sector_pct > self.limits.max_sector_concentration {
                return Err(AdmissionReject::SectorConcentrationExceeded {
                    sector: proposed_sector,
                    pct: sector_pct,
                });
            }
        }

        // 7. Leverage check.
        if state.current_value > 0.0 {
            let total_exposure: f64 =
                current_positions.iter().map(exposure).sum::<f64>() + exposure(proposed);
            let leverage = total_exposure / state.current_value;
            if leverage > self.limits.max_leverage {
                return Err(AdmissionReject::LeverageExceeded { leverage });
            }
        }

        Ok(())
    }

    /// Update the portfolio's current value after a realized P&L and track
    /// the running peak for drawdown.
    pub fn update_value(&self, new_value: f64, pnl: f64) {
        let mut state = self.state.lock().expect("risk gate mutex poisoned");
        state.current_value = new_value;
        if new_value > state.peak_value {
            state.peak_value = new_value;
        }
        let today = self.clock.now().date_naive();
        let bucket = state.daily.entry(today).or_default();
        bucket.pnl += pnl;
        bucket.trade_count += 1;
        info!(
            current_value = new_value,
            peak_value = state.peak_value,
            pnl,
            "portfolio value updated"
        );
    }

    /// Clear the emergency-stop latch. Requires an explicit operator
    /// identifier and is always logged.
    pub fn reset_emergency(&self, operator_id: &str) {
        let mut state = self.state.lock().expect("risk gate mutex poisoned");
        warn!(operator_id, "emergency stop reset by operator");
        state.emergency_stop = false;
        state.emergency_time = None;
        state.emergency_reason = None;
    }

    pub fn diagnostics(&self) -> RiskDiagnostics {
        let state = self.state.lock().expect("risk gate mutex poisoned");
        let today = self.clock.now().date_naive();
        RiskDiagnostics {
            current_value: state.current_value,
            peak_value: state.peak_value,
            drawdown_pct: state.drawdown(),
            emergency_stop: state.emergency_stop,
            emergency_reason: state.emergency_reason.clone(),
            daily_pnl_today: state.daily.get(&today).map(|d| d.pnl).unwrap_or(0.0),
        }
    }

    /// Trim the daily-performance map to the last 90 days. Intended to be
    /// driven by a periodic `clock::TimerService` task.
    pub fn trim_daily_history(&self) {
        let mut state = self.state.lock().expect("risk gate mutex poisoned");
        let cutoff = (self.clock.now() - ChronoDuration::days(90)).date_naive();
        state.daily.retain(|date, _| *date >= cutoff);
    }
}

/// Estimated notional exposure of a trade for leverage/sector/correlation
/// math. Uses the filled entry price once active; falls back to the
/// signal price for a trade still awaiting entry.
fn exposure(trade: &ActiveTrade) -> f64 {
    let price = trade.entry_price.unwrap_or(trade.signal_price);
    price * trade.position_size as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{Exchange, TradeSide, TradeStatus};

    struct FlatSectorMap;
    impl SectorMapPort for FlatSectorMap {
        fn sector_of(&self, _scrip_code: &str) -> String {
            "UNCLASSIFIED".to_string()
        }
    }

    fn trade(scrip_code: &str, signal_price: f64, position_size: u64) -> ActiveTrade {
        let now = Utc::now();
        ActiveTrade {
            trade_id: uuid::Uuid::new_v4(),
            scrip_code: scrip_code.to_string(),
            exchange: Exchange::Nse,
            side: TradeSide::Long,
            strategy_id: "unit-test".to_string(),
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

    fn gate(initial_value: f64) -> RiskGate {
        RiskGate::new(
            RiskLimits {
                max_drawdown_pct: 0.15,
                max_daily_loss_pct: 0.03,
                max_positions: 5,
                max_correlation: 0.70,
                max_sector_concentration: 0.40,
                max_leverage: 2.0,
            },
            initial_value,
            Arc::new(FlatSectorMap),
            Arc::new(clock::SystemClock),
        )
        .unwrap()
    }

    #[test]
    fn admits_below_every_limit() {
        let g = gate(1_000_000.0);
        let proposed = trade("RELIANCE", 2500.0, 100);
        assert!(g.admit(&proposed, &[]));
    }

    #[test]
    fn drawdown_at_exactly_15_001_percent_latches_emergency_stop() {
        let g = gate(1_000_000.0);
        // Peak stays 1,000,000; crash current_value to exactly 15.001% underwater.
        g.update_value(1_000_000.0 * (1.0 - 0.15001), 0.0);

        let proposed = trade("RELIANCE", 2500.0, 100);
        let result = g.try_admit(&proposed, &[]);
        assert_eq!(result, Err(AdmissionReject::MaxDrawdownBreached));
        assert!(g.diagnostics().emergency_stop);

        // Latch persists even once value recovers above the threshold.
        g.update_value(1_000_000.0, 0.0);
        assert_eq!(
            g.try_admit(&proposed, &[]),
            Err(AdmissionReject::EmergencyLatched)
        );
    }

    #[test]
    fn drawdown_at_exactly_the_limit_does_not_latch() {
        let g = gate(1_000_000.0);
        g.update_value(1_000_000.0 * (1.0 - 0.14999), 0.0);
        let proposed = trade("RELIANCE", 2500.0, 100);
        assert!(g.admit(&proposed, &[]));
    }

    #[test]
    fn reset_emergency_clears_the_latch() {
        let g = gate(1_000_000.0);
        g.update_value(500_000.0, 0.0);
        let proposed = trade("RELIANCE", 2500.0, 100);
        assert!(!g.admit(&proposed, &[]));
        assert!(g.diagnostics().emergency_stop);

        g.reset_emergency("ops-desk");
        assert!(!g.diagnostics().emergency_stop);
        // Drawdown is still 50% though, so the very next check re-latches it.
        assert!(!g.admit(&proposed, &[]));
    }

    #[test]
    fn max_positions_reached_rejects_before_correlation_is_considered() {
        let g = gate(1_000_000.0);
        let existing: Vec<ActiveTrade> = (0..5).map(|i| trade(&format!("S{i}"), 100.0, 1)).collect();
        let proposed = trade("NEWONE", 100.0, 1);
        assert_eq!(
            g.try_admit(&proposed, &existing),
            Err(AdmissionReject::MaxPositionsReached)
        );
    }

    #[test]
    fn sector_concentration_rejects_when_same_sector_exposure_too_high() {
        let g = gate(10_000.0);
        // Flat sector map puts everything in one sector, so two sizable
        // trades already exceed the 40% cap once a third is proposed.
        let existing = vec![trade("A", 1000.0, 2), trade("B", 1000.0, 2)];
        let proposed = trade("C", 1000.0, 2);
        let result = g.try_admit(&proposed, &existing);
        assert!(matches!(
            result,
            Err(AdmissionReject::SectorConcentrationExceeded { .. })
        ));
    }

    #[test]
    fn leverage_exceeded_rejects_when_total_exposure_too_high() {
        let g = gate(1_000.0);
        let proposed = trade("BIG", 1000.0, 3);
        assert_eq!(
            g.try_admit(&proposed, &[]),
            Err(AdmissionReject::LeverageExceeded { leverage: 3.0 })
        );
    }

    #[test]
    fn trim_daily_history_drops_buckets_older_than_90_days() {
        let clock = Arc::new(clock::TestClock::new(Utc::now()));
        let g = RiskGate::new(
            RiskLimits {
                max_drawdown_pct: 0.15,
                max_daily_loss_pct: 0.03,
                max_positions: 5,
                max_correlation: 0.70,
                max_sector_concentration: 0.40,
                max_leverage: 2.0,
            },
            1_000_000.0,
            Arc::new(FlatSectorMap),
            clock.clone(),
        )
        .unwrap();
        g.update_value(1_000_000.0, 100.0);
        clock.advance(chrono::Duration::days(120));
        g.trim_daily_history();
        assert_eq!(g.diagnostics().daily_pnl_today, 0.0);
    }
}
