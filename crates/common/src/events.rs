use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ExitReason, TradeResult, TradeSide};

/// Emitted once, when a trade's entry order fills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEntryEvent {
    pub trade_id: uuid::Uuid,
    pub scrip_code: String,
    pub side: TradeSide,
    pub entry_price: f64,
    pub position_size: u64,
    pub entry_time: DateTime<Utc>,
}

/// Emitted on a partial exit (e.g. T1 half-close). Realized P&L is
/// bookkept here but no `PortfolioUpdateEvent` follows — the trade is
/// still open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeExitPartialEvent {
    pub trade_id: uuid::Uuid,
    pub scrip_code: String,
    pub exit_reason: ExitReason,
    pub qty_closed: u64,
    pub exit_price: f64,
    pub realized_pnl: f64,
    pub remaining_size: u64,
    pub timestamp: DateTime<Utc>,
}

/// Emitted exactly once per terminal transition of an entered trade, always
/// immediately followed by a `PortfolioUpdateEvent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeExitEvent {
    pub trade_id: uuid::Uuid,
    pub scrip_code: String,
    pub side: TradeSide,
    pub strategy_id: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub position_size: u64,
    pub realized_pnl: f64,
    pub exit_reason: ExitReason,
    pub duration_secs: i64,
    pub signal_time: DateTime<Utc>,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
}

/// Emitted immediately after every `TradeExitEvent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioUpdateEvent {
    pub current_value: f64,
    pub total_pnl: f64,
    pub roi_pct: f64,
    pub timestamp: DateTime<Utc>,
}

/// Everything the Event Emitter can place on the outbound Event Bus port.
///
/// `TradeResult` covers trades that never reached an entry fill (failed
/// validation, lost arbitration, or timed out waiting for entry); entered
/// trades instead close via `TradeExit` + `PortfolioUpdate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    TradeEntry(TradeEntryEvent),
    TradeExitPartial(TradeExitPartialEvent),
    TradeExit(TradeExitEvent),
    PortfolioUpdate(PortfolioUpdateEvent),
    TradeResult(TradeResult),
}
