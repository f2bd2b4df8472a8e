use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use arbiter::Arbiter;
use clock::Clock;
use common::{
    ActiveTrade, Config, Error, Event, EventBusPort, OrderRequest, PriceTick, Result, Signal,
    TradeOutcome, TradeResult, TradeStatus, TradingHoursPort, VerificationResult,
};
use position::{delay::default_target2, PositionManager};
use risk::RiskGate;

const SIGNAL_QUEUE_CAPACITY: usize = 256;
const TICK_QUEUE_CAPACITY: usize = 4096;

/// Cloneable handle for ingress callers (the upstream signal/tick feeds).
#[derive(Clone)]
pub struct CoordinatorHandle {
    signal_tx: mpsc::Sender<Signal>,
    tick_tx: mpsc::Sender<PriceTick>,
    dropped_ticks: Arc<AtomicU64>,
    position_manager: Arc<PositionManager>,
}

impl CoordinatorHandle {
    /// Blocks with bounded backpressure if the signal queue is full, per
    /// the ingress overflow policy for `SignalIn`.
    pub async fn submit_signal(&self, signal: Signal) -> Result<()> {
        self.signal_tx
            .send(signal)
            .await
            .map_err(|_| Error::Other("signal ingress closed".to_string()))
    }

    /// Drop-newest on a full tick queue, per the ingress overflow policy
    /// for `PriceTick`; tracks how many were dropped.
    pub fn submit_tick(&self, tick: PriceTick) {
        match self.tick_tx.try_send(tick) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped_ticks.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Closed(_)) => warn!("tick ingress closed, dropping tick"),
        }
    }

    pub fn dropped_tick_count(&self) -> u64 {
        self.dropped_ticks.load(Ordering::Relaxed)
    }

    /// Read-only view of every trade currently under management, for
    /// periodic durable snapshotting of the `active_trades` table.
    pub fn snapshot(&self) -> Vec<ActiveTrade> {
        self.position_manager.snapshot()
    }
}

/// Bridges `SignalIn`/`PriceTick` ingress to the Trading-Hours Port, the
/// Risk Gate, the Arbiter and the Position Manager. Construction wires the
/// Arbiter and Position Manager internally; the Order Verification Loop
/// lives in a separate crate and is connected purely through the two typed
/// channels this returns (`order_rx`, `verification_results_tx`).
pub struct Coordinator {
    config: Config,
    clock: Arc<dyn Clock>,
    risk_gate: Arc<RiskGate>,
    trading_hours: Arc<dyn TradingHoursPort>,
    event_bus: Arc<dyn EventBusPort>,
    arbiter: Arc<Arbiter>,
    position_manager: Arc<PositionManager>,

    signal_rx: mpsc::Receiver<Signal>,
    tick_rx: mpsc::Receiver<PriceTick>,
    winners_rx: mpsc::UnboundedReceiver<Signal>,
    arbiter_results_rx: mpsc::UnboundedReceiver<TradeResult>,
    position_events_rx: mpsc::UnboundedReceiver<Event>,
    verification_results_rx: mpsc::UnboundedReceiver<VerificationResult>,

    dropped_ticks: Arc<AtomicU64>,
}

impl Coordinator {
    #[allow(clippy::type_complexity)]
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        risk_gate: Arc<RiskGate>,
        trading_hours: Arc<dyn TradingHoursPort>,
        event_bus: Arc<dyn EventBusPort>,
    ) -> (
        Self,
        CoordinatorHandle,
        mpsc::UnboundedReceiver<OrderRequest>,
        mpsc::UnboundedSender<VerificationResult>,
    ) {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
        let (tick_tx, tick_rx) = mpsc::channel(TICK_QUEUE_CAPACITY);
        let (winners_tx, winners_rx) = mpsc::unbounded_channel();
        let (arbiter_results_tx, arbiter_results_rx) = mpsc::unbounded_channel();
        let (order_tx, order_rx) = mpsc::unbounded_channel();
        let (position_events_tx, position_events_rx) = mpsc::unbounded_channel();
        let (verification_results_tx, verification_results_rx) = mpsc::unbounded_channel();

        let arbiter = Arbiter::new(&config, clock.clone(), winners_tx, arbiter_results_tx);
        let position_manager =
            PositionManager::new(config.clone(), clock.clone(), order_tx, position_events_tx);

        let dropped_ticks = Arc::new(AtomicU64::new(0));
        let handle = CoordinatorHandle {
            signal_tx,
            tick_tx,
            dropped_ticks: dropped_ticks.clone(),
            position_manager: position_manager.clone(),
        };

        let coordinator = Self {
            config,
            clock,
            risk_gate,
            trading_hours,
            event_bus,
            arbiter,
            position_manager,
            signal_rx,
            tick_rx,
            winners_rx,
            arbiter_results_rx,
            position_events_rx,
            verification_results_rx,
            dropped_ticks,
        };

        (coordinator, handle, order_rx, verification_results_tx)
    }

    /// Drain every ingress/egress channel concurrently. Intended to be
    /// `tokio::spawn`ed once at startup; returns only when every channel has
    /// closed (normal shutdown) or an unrecoverable send failure occurs.
    pub async fn run(mut self) {
        info!("coordinator starting");
        loop {
            tokio::select! {
                signal = self.signal_rx.recv() => {
                    match signal {
                        Some(signal) => self.on_signal(signal).await,
                        None => { info!("signal ingress closed"); break; }
                    }
                }
                tick = self.tick_rx.recv() => {
                    match tick {
                        Some(tick) => self.on_tick(tick),
                        None => { info!("tick ingress closed"); break; }
                    }
                }
                winner = self.winners_rx.recv() => {
                    match winner {
                        Some(signal) => self.on_arbiter_winner(signal).await,
                        None => { warn!("arbiter winner channel closed"); break; }
                    }
                }
                result = self.arbiter_results_rx.recv() => {
                    match result {
                        Some(result) => self.publish(Event::TradeResult(result)).await,
                        None => { warn!("arbiter results channel closed"); break; }
                    }
                }
                event = self.position_events_rx.recv() => {
                    match event {
                        Some(event) => self.on_position_event(event).await,
                        None => { warn!("position event channel closed"); break; }
                    }
                }
                result = self.verification_results_rx.recv() => {
                    match result {
                        Some(result) => self.position_manager.handle_verification_result(result),
                        None => { warn!("verification results channel closed"); break; }
                    }
                }
            }
        }
        info!(dropped_ticks = self.dropped_ticks.load(Ordering::Relaxed), "coordinator stopped");
    }

    async fn on_signal(&self, signal: Signal) {
        let now = self.clock.now();
        if !self.trading_hours.is_tradeable(signal.exchange, now) {
            debug!(scrip = %signal.scrip_code, "signal arrived outside trading hours, dropped");
            return;
        }
        self.arbiter.submit(signal);
    }

    fn on_tick(&self, tick: PriceTick) {
        if tick.price <= 0.0 {
            debug!(scrip = %tick.scrip_code, price = tick.price, "ignoring non-positive tick");
            return;
        }
        self.position_manager.on_price(&tick.scrip_code, tick.price, tick.timestamp);
    }

    async fn on_arbiter_winner(&self, signal: Signal) {
        let signal_time = signal.received_at;
        let proposed = proposed_trade(&signal, &self.config, signal_time);
        let current_positions = self.position_manager.snapshot();

        match self.risk_gate.try_admit(&proposed, &current_positions) {
            Ok(()) => {
                if let Err(err) = self.position_manager.create_trade(signal.clone(), signal_time) {
                    warn!(scrip = %signal.scrip_code, %err, "admitted signal failed trade creation");
                    self.publish(Event::TradeResult(failed_result(&signal, signal_time))).await;
                }
            }
            Err(reason) => {
                warn!(scrip = %signal.scrip_code, %reason, "risk gate rejected signal");
                self.publish(Event::TradeResult(failed_result(&signal, signal_time))).await;
            }
        }
    }

    /// Feed the Risk Gate's portfolio tracking from trade closures and
    /// enrich the `PortfolioUpdate` that follows before it reaches the
    /// Event Bus. The Position Manager owns trade state, not portfolio
    /// value, so it hands off a realized P&L here rather than computing
    /// `current_value`/`roi_pct` itself.
    async fn on_position_event(&self, event: Event) {
        match event {
            Event::TradeExit(exit) => {
                let new_value = self.risk_gate.diagnostics().current_value + exit.realized_pnl;
                self.risk_gate.update_value(new_value, exit.realized_pnl);
                self.publish(Event::TradeExit(exit)).await;
            }
            Event::PortfolioUpdate(mut update) => {
                let diag = self.risk_gate.diagnostics();
                update.current_value = diag.current_value;
                update.roi_pct = if self.config.initial_portfolio_value > 0.0 {
                    (diag.current_value - self.config.initial_portfolio_value) / self.config.initial_portfolio_value
                } else {
                    0.0
                };
                self.publish(Event::PortfolioUpdate(update)).await;
            }
            other => self.publish(other).await,
        }
    }

    async fn publish(&self, event: Event) {
        if let Err(err) = self.event_bus.publish(event).await {
            warn!(%err, "failed to publish event");
        }
    }
}

/// Build a synthetic `ActiveTrade` carrying the position size the trade
/// would take if admitted, purely so the Risk Gate's exposure/leverage math
/// has something to compute against before the Position Manager actually
/// creates the trade.
fn proposed_trade(signal: &Signal, config: &Config, signal_time: DateTime<Utc>) -> ActiveTrade {
    let position_size = (config.trade_notional / signal.signal_price).floor() as u64;
    ActiveTrade {
        trade_id: uuid::Uuid::nil(),
        scrip_code: signal.scrip_code.clone(),
        exchange: signal.exchange,
        side: signal.side,
        strategy_id: signal.strategy_id.clone(),
        signal_time,
        signal_price: signal.signal_price,
        stop_loss: signal.stop_loss,
        target1: signal.target1,
        target2: default_target2(signal),
        status: TradeStatus::WaitingForEntry,
        entry_price: None,
        entry_time: None,
        position_size,
        high_since_entry: None,
        low_since_entry: None,
        trailing_stop: None,
        target1_hit: false,
        entry_delayed: false,
        delay_pivot: None,
        delay_reason: None,
        max_hold_deadline: signal_time + chrono::Duration::hours(config.max_hold_hours),
        created_at: signal_time,
        extra: None,
        event_seq: 0,
    }
}

fn failed_result(signal: &Signal, signal_time: DateTime<Utc>) -> TradeResult {
    TradeResult {
        trade_id: uuid::Uuid::new_v4(),
        scrip_code: signal.scrip_code.clone(),
        strategy_id: signal.strategy_id.clone(),
        outcome: TradeOutcome::Failed,
        exit_reason: None,
        realized_pnl: 0.0,
        entry_price: None,
        exit_price: None,
        signal_time,
        entry_time: None,
        exit_time: None,
        duration_secs: None,
        event_seq: 0,
    }
}
