use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use common::VerificationOutcome;
use uuid::Uuid;

/// Outcome of reserving an idempotency key prior to order placement.
pub(crate) enum Reservation {
    /// First time this key has been seen; the caller should submit.
    New,
    /// A submission with this key is already in flight; ignore — the
    /// existing flow will resolve it.
    InFlight,
    /// This key already reached a terminal outcome; replay it.
    Known(VerificationOutcome),
}

enum KeyStatus {
    Pending,
    Completed(VerificationOutcome),
}

struct KeyRecord {
    status: KeyStatus,
    recorded_at: DateTime<Utc>,
}

/// `map<idempotency_key, outcome>` guarding duplicate order submissions.
/// Keys expire 24 h after their last status change via `sweep`.
#[derive(Default)]
pub(crate) struct IdempotencyStore {
    records: Mutex<HashMap<Uuid, KeyRecord>>,
}

impl IdempotencyStore {
    pub fn reserve(&self, key: Uuid, now: DateTime<Utc>) -> Reservation {
        let mut records = self.records.lock().expect("idempotency map poisoned");
        match records.get(&key) {
            Some(KeyRecord { status: KeyStatus::Pending, .. }) => Reservation::InFlight,
            Some(KeyRecord { status: KeyStatus::Completed(outcome), .. }) => {
                Reservation::Known(outcome.clone())
            }
            None => {
                records.insert(
                    key,
                    KeyRecord {
                        status: KeyStatus::Pending,
                        recorded_at: now,
                    },
                );
                Reservation::New
            }
        }
    }

    pub fn complete(&self, key: Uuid, outcome: VerificationOutcome, now: DateTime<Utc>) {
        let mut records = self.records.lock().expect("idempotency map poisoned");
        records.insert(
            key,
            KeyRecord {
                status: KeyStatus::Completed(outcome),
                recorded_at: now,
            },
        );
    }

    /// Drop every key whose last status change is older than 24 h.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::hours(24);
        let mut records = self.records.lock().expect("idempotency map poisoned");
        records.retain(|_, rec| rec.recorded_at > cutoff);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.lock().expect("idempotency map poisoned").len()
    }
}
