use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};

use common::{BrokerOrderStatus, BrokerPort, Error, Order, Result};

/// Deterministic stand-in for a live broker: every placed order fills
/// immediately at the last known price for its scrip, with configurable
/// slippage. Used for paper-mode runs and for tests that need a `BrokerPort`
/// without real network I/O.
pub struct PaperBroker {
    prices: Mutex<HashMap<String, f64>>,
    orders: Mutex<Vec<BrokerOrderStatus>>,
    next_id: Mutex<u64>,
    slippage_bps: f64,
}

impl PaperBroker {
    pub fn new(slippage_bps: f64) -> Self {
        info!(slippage_bps, "paper broker initialized");
        Self {
            prices: Mutex::new(HashMap::new()),
            orders: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
            slippage_bps,
        }
    }

    /// Feed the latest known price for a scrip (called by whatever is
    /// driving the price-tick ingress in paper mode).
    pub fn update_price(&self, scrip_code: &str, price: f64) {
        self.prices.lock().expect("poisoned").insert(scrip_code.to_string(), price);
    }

    fn fill_price(&self, scrip_code: &str, side: common::OrderSide) -> Result<f64> {
        let mid = *self
            .prices
            .lock()
            .expect("poisoned")
            .get(scrip_code)
            .ok_or_else(|| Error::BrokerTransient(format!("no price known for {scrip_code}")))?;
        Ok(match side {
            common::OrderSide::Buy => mid * (1.0 + self.slippage_bps / 10_000.0),
            common::OrderSide::Sell => mid * (1.0 - self.slippage_bps / 10_000.0),
        })
    }
}

#[async_trait]
impl BrokerPort for PaperBroker {
    async fn place_market_order(&self, order: &Order) -> Result<String> {
        let fill_price = self.fill_price(&order.scrip_code, order.side)?;
        let order_id = {
            let mut next_id = self.next_id.lock().expect("poisoned");
            let id = format!("PAPER-{}", *next_id);
            *next_id += 1;
            id
        };

        debug!(
            scrip = %order.scrip_code,
            side = %order.side,
            qty = order.qty,
            fill_price,
            "paper fill simulated"
        );

        self.orders.lock().expect("poisoned").push(BrokerOrderStatus {
            order_id: order_id.clone(),
            status: "COMPLETE".to_string(),
            qty: order.qty,
            pending_qty: 0,
            avg_price: fill_price,
            message: None,
        });

        Ok(order_id)
    }

    async fn fetch_order_book(&self) -> Result<Vec<BrokerOrderStatus>> {
        Ok(self.orders.lock().expect("poisoned").clone())
    }
}
