use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{Event, Exchange, Order, Result};

/// Status of one order as reported by `BrokerPort::fetch_order_book`.
/// `status` is left as the broker's own vocabulary (e.g. `"COMPLETE"`,
/// `"REJECTED"`) — the Order Verification Loop normalizes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrderStatus {
    pub order_id: String,
    pub status: String,
    pub qty: u64,
    pub pending_qty: u64,
    pub avg_price: f64,
    pub message: Option<String>,
}

/// Out-of-scope collaborator: accepts market/limit orders, reports fills.
/// Specified only by the shape the Order Verification Loop consumes.
#[async_trait]
pub trait BrokerPort: Send + Sync {
    async fn place_market_order(&self, order: &Order) -> Result<String>;
    async fn fetch_order_book(&self) -> Result<Vec<BrokerOrderStatus>>;
}

/// Best-effort operator notification channel.
#[async_trait]
pub trait ChatPort: Send + Sync {
    async fn send(&self, channel: &str, text: &str) -> Result<()>;
}

/// Outbound event bus the Event Emitter writes to.
#[async_trait]
pub trait EventBusPort: Send + Sync {
    async fn publish(&self, event: Event) -> Result<()>;
}

/// Sector lookup for the Risk Gate's concentration check. Falls back to
/// `"OTHER"` for unknown symbols.
pub trait SectorMapPort: Send + Sync {
    fn sector_of(&self, scrip_code: &str) -> String;
}

/// Trading-calendar gate consulted by the Coordinator before a signal
/// reaches arbitration.
pub trait TradingHoursPort: Send + Sync {
    fn is_tradeable(&self, exchange: Exchange, ist_time: DateTime<Utc>) -> bool;
}

/// Daily pivot levels, used only for telemetry/notification text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PivotLevels {
    pub pivot: f64,
    pub r1: f64,
    pub r2: f64,
    pub r3: f64,
    pub r4: f64,
    pub s1: f64,
    pub s2: f64,
    pub s3: f64,
    pub s4: f64,
}

#[async_trait]
pub trait PivotPort: Send + Sync {
    async fn daily_pivots(&self, scrip_code: &str, date: NaiveDate) -> Result<PivotLevels>;
}

/// An order to submit through the Broker Port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub scrip_code: String,
    pub exchange: Exchange,
    pub exchange_type: String,
    pub side: crate::OrderSide,
    pub qty: u64,
    pub limit_price: Option<f64>,
}
