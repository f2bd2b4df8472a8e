use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A single market tick delivered by the Price Bus port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceTick {
    pub scrip_code: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Exchange tag carried by an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum Exchange {
    Nse,
    Bse,
    Mcx,
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Exchange::Nse => write!(f, "NSE"),
            Exchange::Bse => write!(f, "BSE"),
            Exchange::Mcx => write!(f, "MCX"),
        }
    }
}

/// Direction of a candidate trade / active position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    pub fn opposite(self) -> Self {
        match self {
            TradeSide::Long => TradeSide::Short,
            TradeSide::Short => TradeSide::Long,
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Long => write!(f, "LONG"),
            TradeSide::Short => write!(f, "SHORT"),
        }
    }
}

/// Side of a broker order. Distinct from `TradeSide`: a SHORT trade is
/// entered with a SELL order and exited with a BUY order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Open-interest label used by the rank-score function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OiLabel {
    LongBuildup,
    ShortCovering,
    ShortBuildup,
    LongUnwinding,
}

/// Identifies which class of producer emitted a signal. `Confirmed` and
/// `Unconfirmed` share Layer-1 per-instrument dedup; every `Category` name
/// runs in its own independent Layer-2 lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalSource {
    Confirmed,
    Unconfirmed,
    Category(String),
}

/// The Layer-1 dedup pairing a signal participates in: `Confirmed` and
/// `Unconfirmed` share one slot pair per scrip; every category is its own
/// independent lane that bypasses Layer 1 entirely.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceLane {
    ConfirmedUnconfirmed,
    Category(String),
}

impl SignalSource {
    pub fn lane(&self) -> SourceLane {
        match self {
            SignalSource::Confirmed | SignalSource::Unconfirmed => {
                SourceLane::ConfirmedUnconfirmed
            }
            SignalSource::Category(name) => SourceLane::Category(name.clone()),
        }
    }

    pub fn label(&self) -> String {
        match self {
            SignalSource::Confirmed => "CONFIRMED".to_string(),
            SignalSource::Unconfirmed => "UNCONFIRMED".to_string(),
            SignalSource::Category(name) => format!("CATEGORY:{name}"),
        }
    }
}

/// Open-interest/volume inputs consumed by the rank-score function.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RankInputs {
    pub oi_ratio: f64,
    pub oi_label: OiLabel,
    pub volume_surge: f64,
}

/// Whether the fabric is submitting orders to a live broker or simulating
/// fills against a deterministic paper broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

/// A candidate signal emitted by an upstream strategy producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub scrip_code: String,
    pub exchange: Exchange,
    pub side: TradeSide,
    pub signal_price: f64,
    pub stop_loss: f64,
    pub target1: f64,
    pub target2: Option<f64>,
    pub strategy_id: String,
    pub source: SignalSource,
    pub received_at: DateTime<Utc>,
    pub confidence: f64,
    pub rank_inputs: RankInputs,
}

/// Reason a `WAITING_FOR_ENTRY` trade had its entry delayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelayReason {
    Target50PercentClose,
    PivotTooClose,
}

/// Strategy-specific trade extensions that don't belong in the closed
/// `ActiveTrade` field set. Replaces the `Map<String, Object>` metadata bags
/// the source system carried per trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExtraContext {
    /// Single-trade pivot-retest ("bulletproof") entry mode: the zone above
    /// the stop within which a retest is accepted as an entry.
    Bulletproof { retest_zone: f64 },
    /// Optional post-T1 exit mode: terminal exit when price falls through
    /// `prev_close * 0.99`.
    EnhancedPA { prev_close: f64 },
}

/// Lifecycle status of an `ActiveTrade`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    WaitingForEntry,
    Active,
    PartialExit,
    ClosedProfit,
    ClosedLoss,
    ClosedTimeout,
    Failed,
}

impl TradeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TradeStatus::ClosedProfit
                | TradeStatus::ClosedLoss
                | TradeStatus::ClosedTimeout
                | TradeStatus::Failed
        )
    }

    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }
}

/// Why a trade closed or failed. Carried on `TradeResult` and close events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    Target1Partial,
    Trailing,
    Target2,
    PrevCloseDrop,
    TimeLimit,
    BrokerRejected,
    Emergency(String),
    InternalInvariant,
    VerificationTimeout,
    /// Lost arbitration; `String` is the winner's identity for the message.
    SupersededBy(String),
    EntryTimeout,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::Target1Partial => write!(f, "TARGET1_PARTIAL"),
            ExitReason::Trailing => write!(f, "TRAILING_STOP"),
            ExitReason::Target2 => write!(f, "TARGET2"),
            ExitReason::PrevCloseDrop => write!(f, "PREV_CLOSE_DROP"),
            ExitReason::TimeLimit => write!(f, "TIME_LIMIT"),
            ExitReason::BrokerRejected => write!(f, "BROKER_REJECTED"),
            ExitReason::Emergency(reason) => write!(f, "EMERGENCY:{reason}"),
            ExitReason::InternalInvariant => write!(f, "INTERNAL_INVARIANT"),
            ExitReason::VerificationTimeout => write!(f, "VERIFICATION_TIMEOUT"),
            ExitReason::SupersededBy(who) => write!(f, "SUPERSEDED_BY_{who}"),
            ExitReason::EntryTimeout => write!(f, "ENTRY_TIMEOUT"),
        }
    }
}

/// A trade under management by the Position Manager.
///
/// Created and mutated exclusively by `position::PositionManager`; every
/// other crate only ever sees a cloned read-view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTrade {
    pub trade_id: uuid::Uuid,
    pub scrip_code: String,
    pub exchange: Exchange,
    pub side: TradeSide,
    pub strategy_id: String,
    pub signal_time: DateTime<Utc>,
    pub signal_price: f64,
    pub stop_loss: f64,
    pub target1: f64,
    pub target2: f64,
    pub status: TradeStatus,
    pub entry_price: Option<f64>,
    pub entry_time: Option<DateTime<Utc>>,
    pub position_size: u64,
    pub high_since_entry: Option<f64>,
    pub low_since_entry: Option<f64>,
    pub trailing_stop: Option<f64>,
    pub target1_hit: bool,
    pub entry_delayed: bool,
    pub delay_pivot: Option<f64>,
    pub delay_reason: Option<DelayReason>,
    pub max_hold_deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub extra: Option<ExtraContext>,
    /// Monotonic counter bumped on every transition; backs idempotent event
    /// redelivery.
    pub event_seq: u64,
}

impl ActiveTrade {
    /// `true` while the price favorability direction matters for watermark
    /// and trailing-stop updates, i.e. once an entry has been filled.
    pub fn is_entered(&self) -> bool {
        matches!(self.status, TradeStatus::Active | TradeStatus::PartialExit)
    }
}

/// Intent of a broker order submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderIntent {
    Entry,
    Exit,
}

/// Status of a broker order as tracked by the Order Verification Loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Filled,
    Partial,
    Rejected,
    Timeout,
}

/// One broker submission tracked by the Order Verification Loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTicket {
    pub order_id: Option<String>,
    pub trade_id: uuid::Uuid,
    pub scrip_code: String,
    pub side: OrderSide,
    pub intent: OrderIntent,
    pub qty: u64,
    pub exchange: Exchange,
    pub exchange_type: String,
    pub limit_price: Option<f64>,
    pub retries_used: u32,
    pub created_at: DateTime<Utc>,
    pub status: OrderStatus,
}

/// Per-day portfolio performance bucket.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DailyStats {
    pub pnl: f64,
    pub trade_count: u32,
}

/// Process-wide portfolio singleton. Access is serialized by
/// `risk::RiskGate`; nothing outside that crate mutates it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    pub start_value: f64,
    pub current_value: f64,
    pub peak_value: f64,
    pub emergency_stop: bool,
    pub emergency_time: Option<DateTime<Utc>>,
    pub emergency_reason: Option<String>,
    pub daily: HashMap<NaiveDate, DailyStats>,
}

impl PortfolioState {
    pub fn new(start_value: f64) -> Self {
        Self {
            start_value,
            current_value: start_value,
            peak_value: start_value,
            emergency_stop: false,
            emergency_time: None,
            emergency_reason: None,
            daily: HashMap::new(),
        }
    }

    pub fn drawdown(&self) -> f64 {
        if self.peak_value <= 0.0 {
            return 0.0;
        }
        (self.peak_value - self.current_value) / self.peak_value
    }
}

/// Transient per-candidate record inside the Arbiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub scrip_code: String,
    pub source: SignalSource,
    pub signal: Signal,
    pub rank_score: f64,
    pub received_at: DateTime<Utc>,
}

/// Terminal outcome recorded for every signal the fabric ever admits for
/// arbitration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TradeOutcome {
    Filled,
    Failed,
    Superseded,
    Timeout,
}

/// A submission handed from the Position Manager to the Order Verification
/// Loop. Carries the
/// idempotency key so the verifier's key-map can dedupe redelivered
/// requests without the Position Manager needing to know its internals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub ticket: OrderTicket,
    pub idempotency_key: uuid::Uuid,
}

/// Terminal (or partial) outcome of a tracked order, reported back to the
/// Position Manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VerificationOutcome {
    Success { filled_qty: u64, avg_price: f64 },
    Partial { filled: u64, remaining: u64, avg_price: f64 },
    Failure { reason: String },
}

/// One verifier callback invocation, routed back to the owning trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub trade_id: uuid::Uuid,
    pub intent: OrderIntent,
    pub outcome: VerificationOutcome,
}

/// Append-only terminal record persisted to the `trade_results` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    pub trade_id: uuid::Uuid,
    pub scrip_code: String,
    pub strategy_id: String,
    pub outcome: TradeOutcome,
    pub exit_reason: Option<ExitReason>,
    pub realized_pnl: f64,
    pub entry_price: Option<f64>,
    pub exit_price: Option<f64>,
    pub signal_time: DateTime<Utc>,
    pub entry_time: Option<DateTime<Utc>>,
    pub exit_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub event_seq: u64,
}
