use std::collections::HashMap;

use chrono::{DateTime, Utc};
use clock::TimerHandle;
use common::{BatchEntry, Signal, SourceLane};

use crate::scoring::rank_score;

/// Layer-1 per-instrument dedup slot pair. Only the
/// `ConfirmedUnconfirmed` lane passes through Layer 1; category lanes go
/// straight to a `LaneBatch`.
#[derive(Debug, Default)]
pub struct Layer1Group {
    pub confirmed: Option<Signal>,
    pub unconfirmed: Option<Signal>,
    pub timer: Option<TimerHandle>,
}

impl Layer1Group {
    /// Resolve the group: CONFIRMED beats UNCONFIRMED if both are present;
    /// otherwise the sole present signal wins. Returns
    /// `(winner, loser)`.
    pub fn resolve(self) -> (Option<Signal>, Option<Signal>) {
        match (self.confirmed, self.unconfirmed) {
            (Some(c), Some(u)) => (Some(c), Some(u)),
            (Some(c), None) => (Some(c), None),
            (None, Some(u)) => (Some(u), None),
            (None, None) => (None, None),
        }
    }
}

/// One Layer-2 batch window: a global batch for the confirmed/unconfirmed
/// lane, or a category-private lane batch. Later submissions
/// for the same scrip overwrite the earlier entry without resetting the
/// window timer.
#[derive(Debug, Default)]
pub struct LaneBatch {
    pub entries: HashMap<String, BatchEntry>,
    pub timer: Option<TimerHandle>,
}

impl LaneBatch {
    pub fn submit(&mut self, lane: &SourceLane, signal: Signal, received_at: DateTime<Utc>) {
        let score = rank_score(&signal, lane);
        self.entries.insert(
            signal.scrip_code.clone(),
            BatchEntry {
                scrip_code: signal.scrip_code.clone(),
                source: signal.source.clone(),
                signal,
                rank_score: score,
                received_at,
            },
        );
    }

    /// Drain the batch, returning `(winner, losers)`. `None` winner only
    /// when the batch was empty.
    pub fn resolve(&mut self) -> (Option<BatchEntry>, Vec<BatchEntry>) {
        let mut entries: Vec<BatchEntry> = self.entries.drain().map(|(_, v)| v).collect();
        self.timer = None;
        if entries.is_empty() {
            return (None, Vec::new());
        }
        if entries.len() == 1 {
            return (entries.pop(), Vec::new());
        }
        let winner_idx = entries
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.rank_score.total_cmp(&b.rank_score))
            .map(|(i, _)| i)
            .expect("entries is non-empty");
        let winner = entries.remove(winner_idx);
        (Some(winner), entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
