use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use common::{BrokerOrderStatus, BrokerPort, Error, Order, Result};

type HmacSha256 = Hmac<Sha256>;

/// HMAC-signed REST client for a live broker backend. The exact endpoint
/// shapes below (`POST /orders`, `GET /orders`) are a thin, broker-neutral
/// contract matching exactly the Broker Port surface this fabric consumes
/// (place, fetch book) — swap `base_url` to point at a specific broker's
/// gateway without touching the signing or error-mapping logic.
pub struct RestBrokerClient {
    base_url: String,
    api_key: String,
    secret: String,
    http: Client,
}

impl RestBrokerClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            secret: secret.into(),
            http: Client::builder()
                .use_rustls_tls()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build broker HTTP client"),
        }
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_millis() as u64
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Map a transport-level failure onto the taxonomy the Order
    /// Verification Loop distinguishes: a non-2xx broker response is
    /// permanent (the order was evaluated and refused), a request that never
    /// reached the broker is transient (retry may succeed).
    fn classify_transport_error(err: reqwest::Error) -> Error {
        if err.is_timeout() || err.is_connect() {
            Error::BrokerTransient(err.to_string())
        } else {
            Error::Http(err.to_string())
        }
    }
}

#[async_trait]
impl BrokerPort for RestBrokerClient {
    async fn place_market_order(&self, order: &Order) -> Result<String> {
        let ts = Self::timestamp_ms();
        let body = PlaceOrderBody {
            scrip_code: &order.scrip_code,
            exchange: order.exchange,
            exchange_type: &order.exchange_type,
            side: order.side,
            qty: order.qty,
            limit_price: order.limit_price,
            timestamp: ts,
        };
        let payload = serde_json::to_string(&body).map_err(Error::from)?;
        let signature = self.sign(&payload);

        debug!(scrip = %order.scrip_code, side = %order.side, "submitting order");

        let resp = self
            .http
            .post(format!("{}/orders", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .header("X-SIGNATURE", &signature)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(Self::classify_transport_error)?;

        let status = resp.status();
        let text = resp.text().await.map_err(Self::classify_transport_error)?;

        if status.is_server_error() {
            return Err(Error::BrokerTransient(format!("HTTP {status}: {text}")));
        }
        if !status.is_success() {
            return Err(Error::BrokerPermanent(format!("HTTP {status}: {text}")));
        }

        let parsed: PlaceOrderResponse = serde_json::from_str(&text).map_err(Error::from)?;
        Ok(parsed.order_id)
    }

    async fn fetch_order_book(&self) -> Result<Vec<BrokerOrderStatus>> {
        let ts = Self::timestamp_ms();
        let query = format!("timestamp={ts}");
        let signature = self.sign(&query);

        let resp = self
            .http
            .get(format!("{}/orders?{query}", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .header("X-SIGNATURE", &signature)
            .send()
            .await
            .map_err(Self::classify_transport_error)?;

        let status = resp.status();
        let text = resp.text().await.map_err(Self::classify_transport_error)?;

        if !status.is_success() {
            return Err(Error::BrokerTransient(format!("HTTP {status}: {text}")));
        }

        let parsed: OrderBookResponse = serde_json::from_str(&text).map_err(Error::from)?;
        Ok(parsed.orders)
    }
}

#[derive(serde::Serialize)]
struct PlaceOrderBody<'a> {
    scrip_code: &'a str,
    exchange: common::Exchange,
    exchange_type: &'a str,
    side: common::OrderSide,
    qty: u64,
    limit_price: Option<f64>,
    timestamp: u64,
}

#[derive(Deserialize)]
struct PlaceOrderResponse {
    order_id: String,
}

#[derive(Deserialize)]
struct OrderBookResponse {
    orders: Vec<BrokerOrderStatus>,
}
