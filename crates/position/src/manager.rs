use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use clock::{Clock, TimerHandle, TimerService};
use common::{
    ActiveTrade, Config, Event, ExitReason, ExtraContext, OrderIntent, OrderRequest, OrderSide,
    OrderTicket, PortfolioUpdateEvent, Result, Signal, TradeEntryEvent, TradeExitEvent,
    TradeExitPartialEvent, TradeOutcome, TradeResult, TradeSide, TradeStatus, VerificationOutcome,
    VerificationResult,
};

use crate::delay::{analyze_entry_delay, check_entry, default_target2, validate_signal};
use crate::exits::{evaluate, recompute_trailing_stop, update_watermarks, ExitDecision};
use crate::idempotency::{entry_idempotency_key, exit_idempotency_key};

const SHARD_COUNT: usize = 16;

/// Per-trade runtime state kept alongside the shared `ActiveTrade` view.
/// Not part of the cross-crate data model — purely internal bookkeeping
/// for timers and cumulative partial realization.
struct TradeSlot {
    trade: ActiveTrade,
    last_price: Option<f64>,
    realized_pnl_so_far: f64,
    entry_timeout_timer: Option<TimerHandle>,
    max_hold_timer: Option<TimerHandle>,
}

/// Position Manager: owns `map<scrip_code, ActiveTrade>`,
/// partitioned by a hash of `scrip_code` into independent shards so price
/// ticks for different instruments never contend on the same lock.
pub struct PositionManager {
    config: Config,
    clock: Arc<dyn Clock>,
    timers: TimerService,
    shards: Vec<Mutex<HashMap<String, TradeSlot>>>,
    order_tx: mpsc::UnboundedSender<OrderRequest>,
    event_tx: mpsc::UnboundedSender<Event>,
}

impl PositionManager {
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        order_tx: mpsc::UnboundedSender<OrderRequest>,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> Arc<Self> {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for _ in 0..SHARD_COUNT {
            shards.push(Mutex::new(HashMap::new()));
        }
        Arc::new(Self {
            config,
            clock,
            timers: TimerService::new(),
            shards,
            order_tx,
            event_tx,
        })
    }

    fn shard_for(&self, scrip_code: &str) -> &Mutex<HashMap<String, TradeSlot>> {
        let mut hash: u64 = 1469598103934665603; // FNV-1a offset basis
        for b in scrip_code.as_bytes() {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        &self.shards[(hash as usize) % self.shards.len()]
    }

    /// Create a `WAITING_FOR_ENTRY` trade from a winning signal. Fails with
    /// `ValidationFailure` if the signal breaks §3's setup invariants, or
    /// `AlreadyActive` if the scrip already has an open trade.
    pub fn create_trade(self: &Arc<Self>, signal: Signal, signal_time: DateTime<Utc>) -> Result<Uuid> {
        validate_signal(&signal, &self.config)?;

        let target2 = default_target2(&signal);
        let delay = analyze_entry_delay(&signal);
        let now = self.clock.now();

        let extra = if delay.delayed && self.config.single_trade_mode {
            Some(ExtraContext::Bulletproof {
                retest_zone: signal.stop_loss + 0.2 * (signal.signal_price - signal.stop_loss),
            })
        } else {
            None
        };

        let trade_id = Uuid::new_v4();
        let trade = ActiveTrade {
            trade_id,
            scrip_code: signal.scrip_code.clone(),
            exchange: signal.exchange,
            side: signal.side,
            strategy_id: signal.strategy_id.clone(),
            signal_time,
            signal_price: signal.signal_price,
            stop_loss: signal.stop_loss,
            target1: signal.target1,
            target2,
            status: TradeStatus::WaitingForEntry,
            entry_price: None,
            entry_time: None,
            position_size: 0,
            high_since_entry: None,
            low_since_entry: None,
            trailing_stop: None,
            target1_hit: false,
            entry_delayed: delay.delayed,
            delay_pivot: delay.pivot,
            delay_reason: delay.reason,
            max_hold_deadline: now + chrono::Duration::hours(self.config.max_hold_hours),
            created_at: now,
            extra,
            event_seq: 0,
        };

        let scrip_code = signal.scrip_code.clone();
        {
            let mut shard = self.shard_for(&scrip_code).lock().expect("shard mutex poisoned");
            if shard.contains_key(&scrip_code) {
                return Err(common::Error::AlreadyActive(scrip_code));
            }
            shard.insert(
                scrip_code.clone(),
                TradeSlot {
                    trade,
                    last_price: None,
                    realized_pnl_so_far: 0.0,
                    entry_timeout_timer: None,
                    max_hold_timer: None,
                },
            );
        }

        self.schedule_entry_timeout(scrip_code.clone(), trade_id, signal_time);
        self.schedule_max_hold(scrip_code, trade_id);

        Ok(trade_id)
    }

    fn schedule_entry_timeout(self: &Arc<Self>, scrip_code: String, trade_id: Uuid, signal_time: DateTime<Utc>) {
        let deadline = signal_time + chrono::Duration::minutes(self.config.entry_timeout_min);
        let wait = (deadline - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
        let this = self.clone();
        let scrip_for_timer = scrip_code.clone();
        let handle = self.timers.schedule_once(wait, move || {
            this.on_entry_timeout(&scrip_for_timer, trade_id);
        });
        let mut shard = self.shard_for(&scrip_code).lock().expect("shard mutex poisoned");
        if let Some(slot) = shard.get_mut(&scrip_code) {
            if slot.trade.trade_id == trade_id {
                slot.entry_timeout_timer = Some(handle);
            }
        }
    }

    fn schedule_max_hold(self: &Arc<Self>, scrip_code: String, trade_id: Uuid) {
        let wait = Duration::from_secs((self.config.max_hold_hours.max(0) as u64) * 3600);
        let this = self.clone();
        let scrip_for_timer = scrip_code.clone();
        let handle = self.timers.schedule_once(wait, move || {
            this.on_max_hold(&scrip_for_timer, trade_id);
        });
        let mut shard = self.shard_for(&scrip_code).lock().expect("shard mutex poisoned");
        if let Some(slot) = shard.get_mut(&scrip_code) {
            if slot.trade.trade_id == trade_id {
                slot.max_hold_timer = Some(handle);
            }
        }
    }

    /// Drive the state machine for one price tick. Non-blocking beyond the
    /// owning shard's short critical section.
    pub fn on_price(self: &Arc<Self>, scrip_code: &str, price: f64, tick_time: DateTime<Utc>) {
        if price <= 0.0 {
            warn!(scrip_code, price, "ignoring non-positive price tick");
            return;
        }

        let mut shard = self.shard_for(scrip_code).lock().expect("shard mutex poisoned");
        let Some(slot) = shard.get_mut(scrip_code) else {
            return;
        };
        slot.last_price = Some(price);

        match slot.trade.status {
            TradeStatus::WaitingForEntry => {
                if let Some(fill_price) = check_entry(&slot.trade, price, self.config.single_trade_mode) {
                    self.enter(slot, fill_price, tick_time);
                }
            }
            TradeStatus::Active | TradeStatus::PartialExit => {
                update_watermarks(&mut slot.trade, price);
                if slot.trade.target1_hit {
                    recompute_trailing_stop(&mut slot.trade, self.config.trail_pct);
                }
                match evaluate(&slot.trade, price, self.config.trail_pct) {
                    ExitDecision::None => {}
                    ExitDecision::StopLoss => self.close(slot, scrip_code, price, tick_time, ExitReason::StopLoss),
                    ExitDecision::Target1Partial => self.partial_exit(slot, price, tick_time),
                    ExitDecision::Trailing => self.close(slot, scrip_code, price, tick_time, ExitReason::Trailing),
                    ExitDecision::Target2 => self.close(slot, scrip_code, price, tick_time, ExitReason::Target2),
                    ExitDecision::PrevCloseDrop => {
                        self.close(slot, scrip_code, price, tick_time, ExitReason::PrevCloseDrop)
                    }
                }
            }
            TradeStatus::ClosedProfit
            | TradeStatus::ClosedLoss
            | TradeStatus::ClosedTimeout
            | TradeStatus::Failed => {}
        }

        if slot.trade.status.is_terminal() {
            shard.remove(scrip_code);
        }
    }

    fn enter(&self, slot: &mut TradeSlot, fill_price: f64, tick_time: DateTime<Utc>) {
        let trade = &mut slot.trade;
        trade.entry_price = Some(fill_price);
        trade.entry_time = Some(tick_time);
        trade.position_size = (self.config.trade_notional / fill_price).floor() as u64;
        trade.status = TradeStatus::Active;
        trade.high_since_entry = Some(fill_price);
        trade.low_since_entry = Some(fill_price);
        trade.event_seq += 1;

        if let Some(h) = slot.entry_timeout_timer.take() {
            self.timers.cancel(h);
        }

        let order_side = entry_order_side(trade.side);
        let idempotency_key = entry_idempotency_key(&trade.scrip_code, trade.side, trade.signal_time, trade.signal_price);
        let ticket = OrderTicket {
            order_id: None,
            trade_id: trade.trade_id,
            scrip_code: trade.scrip_code.clone(),
            side: order_side,
            intent: OrderIntent::Entry,
            qty: trade.position_size,
            exchange: trade.exchange,
            exchange_type: "MARKET".to_string(),
            limit_price: None,
            retries_used: 0,
            created_at: tick_time,
            status: common::OrderStatus::Pending,
        };
        let _ = self.order_tx.send(OrderRequest { ticket, idempotency_key });

        let _ = self.event_tx.send(Event::TradeEntry(TradeEntryEvent {
            trade_id: trade.trade_id,
            scrip_code: trade.scrip_code.clone(),
            side: trade.side,
            entry_price: fill_price,
            position_size: trade.position_size,
            entry_time: tick_time,
        }));

        info!(scrip_code = %trade.scrip_code, fill_price, "trade entered");
    }

    /// Submit a SELL (or BUY-to-cover) order for `qty` of an open position.
    /// Keyed off the trade's current `event_seq` so a partial exit and the
    /// final exit never share an idempotency key.
    fn submit_exit_order(&self, trade: &ActiveTrade, qty: u64, tick_time: DateTime<Utc>) {
        let order_side = exit_order_side(trade.side);
        let idempotency_key = exit_idempotency_key(trade.trade_id, order_side, trade.event_seq);
        let ticket = OrderTicket {
            order_id: None,
            trade_id: trade.trade_id,
            scrip_code: trade.scrip_code.clone(),
            side: order_side,
            intent: OrderIntent::Exit,
            qty,
            exchange: trade.exchange,
            exchange_type: "MARKET".to_string(),
            limit_price: None,
            retries_used: 0,
            created_at: tick_time,
            status: common::OrderStatus::Pending,
        };
        let _ = self.order_tx.send(OrderRequest { ticket, idempotency_key });
    }

    fn partial_exit(&self, slot: &mut TradeSlot, price: f64, tick_time: DateTime<Utc>) {
        let trade = &mut slot.trade;
        let entry_price = trade.entry_price.unwrap_or(price);
        let half = trade.position_size / 2;
        let pnl = signed_pnl(trade.side, entry_price, price, half);

        trade.position_size -= half;
        trade.target1_hit = true;
        trade.trailing_stop = Some(entry_price);
        trade.status = TradeStatus::PartialExit;
        trade.event_seq += 1;
        slot.realized_pnl_so_far += pnl;

        self.submit_exit_order(trade, half, tick_time);

        let _ = self.event_tx.send(Event::TradeExitPartial(TradeExitPartialEvent {
            trade_id: trade.trade_id,
            scrip_code: trade.scrip_code.clone(),
            exit_reason: ExitReason::Target1Partial,
            qty_closed: half,
            exit_price: price,
            realized_pnl: pnl,
            remaining_size: trade.position_size,
            timestamp: tick_time,
        }));

        info!(scrip_code = %trade.scrip_code, price, pnl, "target1 partial exit");
    }

    fn close(
        &self,
        slot: &mut TradeSlot,
        scrip_code: &str,
        price: f64,
        tick_time: DateTime<Utc>,
        reason: ExitReason,
    ) {
        let trade = &mut slot.trade;
        let entry_price = trade.entry_price.unwrap_or(price);
        let closing_qty = trade.position_size;
        let remaining_pnl = signed_pnl(trade.side, entry_price, price, closing_qty);
        let total_pnl = slot.realized_pnl_so_far + remaining_pnl;

        trade.status = match reason {
            ExitReason::StopLoss | ExitReason::InternalInvariant => TradeStatus::ClosedLoss,
            _ => {
                if total_pnl >= 0.0 {
                    TradeStatus::ClosedProfit
                } else {
                    TradeStatus::ClosedLoss
                }
            }
        };
        trade.event_seq += 1;

        if let Some(h) = slot.max_hold_timer.take() {
            self.timers.cancel(h);
        }
        if let Some(h) = slot.entry_timeout_timer.take() {
            self.timers.cancel(h);
        }

        self.submit_exit_order(trade, closing_qty, tick_time);

        let entry_time = trade.entry_time.unwrap_or(tick_time);
        let duration_secs = (tick_time - entry_time).num_seconds();

        let _ = self.event_tx.send(Event::TradeExit(TradeExitEvent {
            trade_id: trade.trade_id,
            scrip_code: scrip_code.to_string(),
            side: trade.side,
            strategy_id: trade.strategy_id.clone(),
            entry_price,
            exit_price: price,
            position_size: trade.position_size,
            realized_pnl: total_pnl,
            exit_reason: reason.clone(),
            duration_secs,
            signal_time: trade.signal_time,
            entry_time,
            exit_time: tick_time,
        }));
        let _ = self.event_tx.send(Event::PortfolioUpdate(PortfolioUpdateEvent {
            current_value: 0.0,
            total_pnl,
            roi_pct: 0.0,
            timestamp: tick_time,
        }));
        let _ = self.event_tx.send(Event::TradeResult(TradeResult {
            trade_id: trade.trade_id,
            scrip_code: trade.scrip_code.clone(),
            strategy_id: trade.strategy_id.clone(),
            outcome: TradeOutcome::Filled,
            exit_reason: Some(reason),
            realized_pnl: total_pnl,
            entry_price: trade.entry_price,
            exit_price: Some(price),
            signal_time: trade.signal_time,
            entry_time: trade.entry_time,
            exit_time: Some(tick_time),
            duration_secs: Some(duration_secs),
            event_seq: trade.event_seq,
        }));
    }

    /// Record an entry that never actually filled at the broker. No
    /// position was ever taken, so size and realized P&L are both zero and
    /// the trade is recorded as `Failed`, not a closed fill.
    fn fail_entry(&self, slot: &mut TradeSlot, scrip_code: &str, now: DateTime<Utc>, reason: ExitReason) {
        let trade = &mut slot.trade;
        trade.position_size = 0;
        trade.status = TradeStatus::Failed;
        trade.event_seq += 1;

        if let Some(h) = slot.max_hold_timer.take() {
            self.timers.cancel(h);
        }
        if let Some(h) = slot.entry_timeout_timer.take() {
            self.timers.cancel(h);
        }

        let _ = self.event_tx.send(Event::TradeResult(TradeResult {
            trade_id: trade.trade_id,
            scrip_code: scrip_code.to_string(),
            strategy_id: trade.strategy_id.clone(),
            outcome: TradeOutcome::Failed,
            exit_reason: Some(reason),
            realized_pnl: 0.0,
            entry_price: None,
            exit_price: None,
            signal_time: trade.signal_time,
            entry_time: None,
            exit_time: Some(now),
            duration_secs: None,
            event_seq: trade.event_seq,
        }));
    }

    fn on_entry_timeout(self: &Arc<Self>, scrip_code: &str, trade_id: Uuid) {
        let mut shard = self.shard_for(scrip_code).lock().expect("shard mutex poisoned");
        let Some(slot) = shard.get_mut(scrip_code) else { return };
        if slot.trade.trade_id != trade_id || slot.trade.status != TradeStatus::WaitingForEntry {
            return;
        }
        slot.trade.status = TradeStatus::ClosedTimeout;
        slot.trade.event_seq += 1;
        let now = self.clock.now();

        let _ = self.event_tx.send(Event::TradeResult(TradeResult {
            trade_id,
            scrip_code: slot.trade.scrip_code.clone(),
            strategy_id: slot.trade.strategy_id.clone(),
            outcome: TradeOutcome::Timeout,
            exit_reason: Some(ExitReason::EntryTimeout),
            realized_pnl: 0.0,
            entry_price: None,
            exit_price: None,
            signal_time: slot.trade.signal_time,
            entry_time: None,
            exit_time: Some(now),
            duration_secs: None,
            event_seq: slot.trade.event_seq,
        }));

        if let Some(h) = slot.max_hold_timer.take() {
            self.timers.cancel(h);
        }
        shard.remove(scrip_code);
    }

    fn on_max_hold(self: &Arc<Self>, scrip_code: &str, trade_id: Uuid) {
        let mut shard = self.shard_for(scrip_code).lock().expect("shard mutex poisoned");
        let Some(slot) = shard.get_mut(scrip_code) else { return };
        if slot.trade.trade_id != trade_id || !slot.trade.is_entered() {
            return;
        }
        let price = slot.last_price.or(slot.trade.entry_price).unwrap_or(slot.trade.signal_price);
        let now = self.clock.now();
        self.close(slot, scrip_code, price, now, ExitReason::TimeLimit);
        shard.remove(scrip_code);
    }

    /// Force-close a trade at its last seen price. Returns
    /// `false` if no open trade exists for the scrip.
    pub fn emergency_exit(self: &Arc<Self>, scrip_code: &str, caller_reason: &str) -> bool {
        let mut shard = self.shard_for(scrip_code).lock().expect("shard mutex poisoned");
        let Some(slot) = shard.get_mut(scrip_code) else {
            return false;
        };
        if slot.trade.status.is_terminal() {
            return false;
        }
        let price = slot
            .last_price
            .or(slot.trade.entry_price)
            .unwrap_or(slot.trade.signal_price);
        let now = self.clock.now();
        self.close(
            slot,
            scrip_code,
            price,
            now,
            ExitReason::Emergency(caller_reason.to_string()),
        );
        shard.remove(scrip_code);
        true
    }

    /// Reconcile a broker verification outcome against the owning trade.
    /// Only `Entry`-intent failures change trade state here: an exit order
    /// has already been applied optimistically against the tick that
    /// triggered it, so a failed exit fill is logged for operator
    /// attention rather than reopening a trade already reported closed.
    pub fn handle_verification_result(self: &Arc<Self>, result: VerificationResult) {
        for shard in &self.shards {
            let mut guard = shard.lock().expect("shard mutex poisoned");
            let Some((scrip_code, _)) = guard
                .iter()
                .find(|(_, s)| s.trade.trade_id == result.trade_id)
                .map(|(k, _)| (k.clone(), ()))
            else {
                continue;
            };

            if result.intent != OrderIntent::Entry {
                if let VerificationOutcome::Failure { reason } = &result.outcome {
                    warn!(trade_id = %result.trade_id, reason, "exit order verification failed after optimistic close");
                }
                return;
            }

            let slot = guard.get_mut(&scrip_code).expect("scrip present");
            match &result.outcome {
                VerificationOutcome::Success { avg_price, .. } => {
                    slot.trade.entry_price = Some(*avg_price);
                    info!(trade_id = %result.trade_id, avg_price, "entry order verified");
                }
                VerificationOutcome::Partial { avg_price, .. } => {
                    slot.trade.entry_price = Some(*avg_price);
                }
                VerificationOutcome::Failure { reason } => {
                    warn!(trade_id = %result.trade_id, reason, "entry order rejected by broker");
                    let now = self.clock.now();
                    self.fail_entry(slot, &scrip_code, now, ExitReason::BrokerRejected);
                    guard.remove(&scrip_code);
                }
            }
            return;
        }
    }

    /// Read-only snapshot of every open trade, across all shards.
    pub fn snapshot(&self) -> Vec<ActiveTrade> {
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .expect("shard mutex poisoned")
                    .values()
                    .map(|s| s.trade.clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn shutdown(&self) {
        self.timers.shutdown();
    }
}

fn entry_order_side(side: TradeSide) -> OrderSide {
    match side {
        TradeSide::Long => OrderSide::Buy,
        TradeSide::Short => OrderSide::Sell,
    }
}

fn exit_order_side(side: TradeSide) -> OrderSide {
    match side {
        TradeSide::Long => OrderSide::Sell,
        TradeSide::Short => OrderSide::Buy,
    }
}

fn signed_pnl(side: TradeSide, entry_price: f64, exit_price: f64, qty: u64) -> f64 {
    let diff = match side {
        TradeSide::Long => exit_price - entry_price,
        TradeSide::Short => entry_price - exit_price,
    };
    diff * qty as f64
}
