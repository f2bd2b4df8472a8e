use chrono::{DateTime, Utc};
use common::{OrderSide, TradeSide};
use uuid::Uuid;

/// Namespace for name-based idempotency keys, so the same
/// `(scrip_code, side, signal_time_millis, signal_price)` tuple always
/// hashes to the same UUID across process restarts.
const IDEMPOTENCY_NAMESPACE: Uuid = Uuid::from_bytes([
    0x3f, 0x1a, 0x5c, 0x9e, 0x7b, 0x42, 0x4d, 0x8a, 0x9e, 0x11, 0x6d, 0x2b, 0x8f, 0x03, 0xc4, 0x77,
]);

/// Deterministic idempotency key for an order submission, derived from the
/// signal identity rather than any mutable trade state — replaying the same
/// signal always yields the same key.
pub fn entry_idempotency_key(
    scrip_code: &str,
    side: TradeSide,
    signal_time: DateTime<Utc>,
    signal_price: f64,
) -> Uuid {
    let name = format!(
        "{scrip_code}:{side}:{}:{signal_price}",
        signal_time.timestamp_millis()
    );
    Uuid::new_v5(&IDEMPOTENCY_NAMESPACE, name.as_bytes())
}

/// Idempotency key for an exit order, derived from the trade identity and
/// the exit sequence number so a retried partial exit does not collide with
/// the final exit's key.
pub fn exit_idempotency_key(trade_id: Uuid, order_side: OrderSide, seq: u64) -> Uuid {
    let name = format!("{trade_id}:{order_side}:{seq}");
    Uuid::new_v5(&IDEMPOTENCY_NAMESPACE, name.as_bytes())
}
