use std::time::Duration;

use chrono::{DateTime, Utc};
use common::OrderTicket;
use uuid::Uuid;

use clock::TimerHandle;

/// One broker submission being tracked to a terminal outcome.
/// Keyed by the broker-assigned `order_id` once placement succeeds.
pub(crate) struct PendingOrder {
    pub ticket: OrderTicket,
    pub idempotency_key: Uuid,
    pub verification_attempts: u32,
    pub poll_timer: Option<TimerHandle>,
    pub timeout_timer: Option<TimerHandle>,
    pub created_at: DateTime<Utc>,
}

/// Normalized broker order status, independent of any one broker's string
/// vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusClass {
    Complete,
    Partial,
    Rejected,
    Pending,
}

/// Map a broker's own status vocabulary onto the verifier's four outcomes.
/// Anything unrecognized is treated as still pending, so an unfamiliar
/// broker string never prematurely fails a live order — only the hard
/// timeout can close it out in that case.
pub(crate) fn classify(status: &str) -> StatusClass {
    match status.to_ascii_uppercase().as_str() {
        "COMPLETE" | "FULLY_EXECUTED" | "FILLED" => StatusClass::Complete,
        "PARTIAL" | "PARTIALLY_FILLED" => StatusClass::Partial,
        "REJECTED" | "CANCELLED" | "CANCELED" | "FAILED" => StatusClass::Rejected,
        _ => StatusClass::Pending,
    }
}

/// Linear poll backoff: `2s * min(attempts, 10)`.
pub(crate) fn poll_backoff(verification_attempts: u32) -> Duration {
    Duration::from_secs(2 * verification_attempts.min(10) as u64)
}

/// Exponential retry backoff: `base * 2^retries_used`, base 2 s.
pub(crate) fn retry_backoff(retries_used: u32, base_ms: u64) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(1u64 << retries_used.min(16)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_recognizes_terminal_and_pending_states() {
        assert_eq!(classify("complete"), StatusClass::Complete);
        assert_eq!(classify("FULLY_EXECUTED"), StatusClass::Complete);
        assert_eq!(classify("Partial"), StatusClass::Partial);
        assert_eq!(classify("REJECTED"), StatusClass::Rejected);
        assert_eq!(classify("cancelled"), StatusClass::Rejected);
        assert_eq!(classify("PENDING"), StatusClass::Pending);
        assert_eq!(classify("OPEN"), StatusClass::Pending);
        assert_eq!(classify("SOME_UNKNOWN_BROKER_CODE"), StatusClass::Pending);
    }

    #[test]
    fn poll_backoff_grows_linearly_then_caps() {
        assert_eq!(poll_backoff(1), Duration::from_secs(2));
        assert_eq!(poll_backoff(5), Duration::from_secs(10));
        assert_eq!(poll_backoff(10), Duration::from_secs(20));
        assert_eq!(poll_backoff(50), Duration::from_secs(20));
    }

    #[test]
    fn retry_backoff_doubles_per_attempt() {
        assert_eq!(retry_backoff(0, 2_000), Duration::from_millis(2_000));
        assert_eq!(retry_backoff(1, 2_000), Duration::from_millis(4_000));
        assert_eq!(retry_backoff(2, 2_000), Duration::from_millis(8_000));
    }
}
