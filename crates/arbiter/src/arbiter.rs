use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use clock::{Clock, TimerService};
use common::{Config, ExitReason, Signal, SignalSource, SourceLane, TradeOutcome, TradeResult};

use crate::lane::{Layer1Group, LaneBatch};

/// Signal Arbiter: per-instrument 35 s dedup followed by a
/// 60 s cross-instrument batch, with independent category lanes that
/// bypass Layer 1 entirely.
pub struct Arbiter {
    layer1_window: Duration,
    layer2_window: Duration,
    clock: Arc<dyn Clock>,
    timers: TimerService,
    layer1: Mutex<HashMap<String, Layer1Group>>,
    global_batch: Mutex<LaneBatch>,
    category_lanes: Mutex<HashMap<String, LaneBatch>>,
    winners_tx: mpsc::UnboundedSender<Signal>,
    results_tx: mpsc::UnboundedSender<TradeResult>,
}

impl Arbiter {
    pub fn new(
        config: &Config,
        clock: Arc<dyn Clock>,
        winners_tx: mpsc::UnboundedSender<Signal>,
        results_tx: mpsc::UnboundedSender<TradeResult>,
    ) -> Arc<Self> {
        Arc::new(Self {
            layer1_window: Duration::from_secs(config.layer1_buffer_sec.max(0) as u64),
            layer2_window: Duration::from_secs(config.layer2_batch_sec.max(0) as u64),
            clock,
            timers: TimerService::new(),
            layer1: Mutex::new(HashMap::new()),
            global_batch: Mutex::new(LaneBatch::default()),
            category_lanes: Mutex::new(HashMap::new()),
            winners_tx,
            results_tx,
        })
    }

    /// Submit a candidate signal. Non-blocking beyond a short lock hold.
    pub fn submit(self: &Arc<Self>, signal: Signal) {
        match signal.source.lane() {
            SourceLane::ConfirmedUnconfirmed => self.submit_layer1(signal),
            SourceLane::Category(name) => self.submit_category(name, signal),
        }
    }

    fn submit_layer1(self: &Arc<Self>, signal: Signal) {
        let scrip_code = signal.scrip_code.clone();
        let mut layer1 = self.layer1.lock().expect("layer1 mutex poisoned");
        let is_new = !layer1.contains_key(&scrip_code);
        let group = layer1.entry(scrip_code.clone()).or_default();
        match signal.source {
            SignalSource::Confirmed => group.confirmed = Some(signal),
            SignalSource::Unconfirmed => group.unconfirmed = Some(signal),
            SignalSource::Category(_) => unreachable!("category signals never reach layer1"),
        }
        if is_new {
            let this = self.clone();
            let scrip_for_timer = scrip_code.clone();
            let handle = self
                .timers
                .schedule_once(self.layer1_window, move || {
                    this.flush_layer1(&scrip_for_timer);
                });
            group.timer = Some(handle);
        }
        drop(layer1);
        debug!(scrip_code, "signal buffered in layer1");
    }

    /// Resolve a Layer-1 group and forward its winner to the global batch.
    /// Safe to call more than once — a second call on an already-drained
    /// scrip is a no-op.
    fn flush_layer1(self: &Arc<Self>, scrip_code: &str) {
        let group = {
            let mut layer1 = self.layer1.lock().expect("layer1 mutex poisoned");
            layer1.remove(scrip_code)
        };
        let Some(group) = group else { return };
        let (winner, loser) = group.resolve();

        if let Some(loser) = loser {
            let winner_label = winner
                .as_ref()
                .map(|w| w.source.label())
                .unwrap_or_else(|| "UNKNOWN".to_string());
            self.emit_superseded(&loser, ExitReason::SupersededBy(winner_label));
        }

        if let Some(winner) = winner {
            self.submit_global_batch(winner);
        }
    }

    fn submit_global_batch(self: &Arc<Self>, signal: Signal) {
        let lane = SourceLane::ConfirmedUnconfirmed;
        let now = self.clock.now();
        let mut batch = self.global_batch.lock().expect("global batch mutex poisoned");
        let is_new = batch.is_empty();
        batch.submit(&lane, signal, now);
        if is_new {
            let this = self.clone();
            let handle = self
                .timers
                .schedule_once(self.layer2_window, move || {
                    this.flush_global_batch();
                });
            batch.timer = Some(handle);
        }
    }

    fn flush_global_batch(self: &Arc<Self>) {
        let (winner, losers) = {
            let mut batch = self.global_batch.lock().expect("global batch mutex poisoned");
            batch.resolve()
        };
        self.resolve_batch_outcome(winner, losers);
    }

    fn submit_category(self: &Arc<Self>, category: String, signal: Signal) {
        let lane = SourceLane::Category(category.clone());
        let now = self.clock.now();
        let mut lanes = self.category_lanes.lock().expect("category lanes mutex poisoned");
        let batch = lanes.entry(category.clone()).or_default();
        let is_new = batch.is_empty();
        batch.submit(&lane, signal, now);
        if is_new {
            let this = self.clone();
            let handle = self
                .timers
                .schedule_once(self.layer2_window, move || {
                    this.flush_category_lane(&category);
                });
            batch.timer = Some(handle);
        }
    }

    fn flush_category_lane(self: &Arc<Self>, category: &str) {
        let (winner, losers) = {
            let mut lanes = self.category_lanes.lock().expect("category lanes mutex poisoned");
            match lanes.get_mut(category) {
                Some(batch) => batch.resolve(),
                None => return,
            }
        };
        self.resolve_batch_outcome(winner, losers);
    }

    fn resolve_batch_outcome(
        self: &Arc<Self>,
        winner: Option<common::BatchEntry>,
        losers: Vec<common::BatchEntry>,
    ) {
        let Some(winner) = winner else { return };
        for loser in &losers {
            self.emit_superseded(
                &loser.signal,
                ExitReason::SupersededBy(format!("BEST_{}", winner.scrip_code)),
            );
        }
        info!(
            scrip_code = %winner.scrip_code,
            rank_score = winner.rank_score,
            "arbitration winner forwarded"
        );
        let _ = self.winners_tx.send(winner.signal);
    }

    fn emit_superseded(&self, signal: &Signal, reason: ExitReason) {
        let now = self.clock.now();
        let result = TradeResult {
            trade_id: uuid::Uuid::new_v4(),
            scrip_code: signal.scrip_code.clone(),
            strategy_id: signal.strategy_id.clone(),
            outcome: TradeOutcome::Superseded,
            exit_reason: Some(reason),
            realized_pnl: 0.0,
            entry_price: None,
            exit_price: None,
            signal_time: signal.received_at,
            entry_time: None,
            exit_time: Some(now),
            duration_secs: None,
            event_seq: 0,
        };
        let _ = self.results_tx.send(result);
    }

    /// Flush every outstanding group and batch synchronously, invoking the
    /// timer callbacks inline. Used on crash/shutdown.
    pub fn flush_all(self: &Arc<Self>) {
        let scrips: Vec<String> = self
            .layer1
            .lock()
            .expect("layer1 mutex poisoned")
            .keys()
            .cloned()
            .collect();
        for scrip in scrips {
            self.flush_layer1(&scrip);
        }
        self.flush_global_batch();
        let categories: Vec<String> = self
            .category_lanes
            .lock()
            .expect("category lanes mutex poisoned")
            .keys()
            .cloned()
            .collect();
        for category in categories {
            self.flush_category_lane(&category);
        }
        self.timers.shutdown();
    }
}
