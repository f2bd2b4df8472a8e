use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use clock::{Clock, TimerService};
use common::{
    BrokerPort, Config, Order, OrderIntent, OrderRequest, OrderTicket, VerificationOutcome,
    VerificationResult,
};

use crate::keymap::{IdempotencyStore, Reservation};
use crate::pending::{classify, poll_backoff, retry_backoff, PendingOrder, StatusClass};

/// Order Verification Loop: tracks broker order IDs through
/// status polling with backoff and a bounded hard timeout, reporting
/// outcomes back to the Position Manager via `results_tx`.
pub struct Verifier {
    broker: Arc<dyn BrokerPort>,
    clock: Arc<dyn Clock>,
    config: Config,
    timers: TimerService,
    pending: Mutex<HashMap<String, PendingOrder>>,
    idempotency: IdempotencyStore,
    results_tx: mpsc::UnboundedSender<VerificationResult>,
}

impl Verifier {
    pub fn new(
        broker: Arc<dyn BrokerPort>,
        clock: Arc<dyn Clock>,
        config: Config,
        results_tx: mpsc::UnboundedSender<VerificationResult>,
    ) -> Arc<Self> {
        Arc::new(Self {
            broker,
            clock,
            config,
            timers: TimerService::new(),
            pending: Mutex::new(HashMap::new()),
            idempotency: IdempotencyStore::default(),
            results_tx,
        })
    }

    /// Drain the order-request ingress, tracking each submission to a
    /// terminal outcome. Intended to be `tokio::spawn`ed once at startup.
    pub async fn run(self: Arc<Self>, mut order_rx: mpsc::UnboundedReceiver<OrderRequest>) {
        self.start_liveness_ticker();
        self.start_idempotency_sweep();

        while let Some(request) = order_rx.recv().await {
            let this = self.clone();
            tokio::spawn(async move { this.submit(request).await });
        }

        info!("order ingress closed, shutting down verifier timers");
        self.timers.shutdown();
    }

    /// Cancel all outstanding timers and give in-flight callbacks a short
    /// grace period to finish.
    pub async fn shutdown(&self) {
        self.timers.shutdown();
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    fn start_liveness_ticker(self: &Arc<Self>) {
        let this = self.clone();
        self.timers
            .schedule_periodic(Duration::from_secs(10), Duration::from_secs(10), move || {
                let this = this.clone();
                tokio::spawn(async move { this.poll_all_outstanding().await });
            });
    }

    fn start_idempotency_sweep(self: &Arc<Self>) {
        let this = self.clone();
        self.timers
            .schedule_periodic(Duration::from_secs(3600), Duration::from_secs(3600), move || {
                this.idempotency.sweep(this.clock.now());
            });
    }

    async fn poll_all_outstanding(self: &Arc<Self>) {
        let order_ids: Vec<String> = self
            .pending
            .lock()
            .expect("pending map poisoned")
            .keys()
            .cloned()
            .collect();
        for order_id in order_ids {
            let this = self.clone();
            tokio::spawn(async move { this.poll_order(order_id).await });
        }
    }

    /// Handle one order request: dedupe against the idempotency map, then
    /// submit to the broker and start tracking.
    async fn submit(self: Arc<Self>, request: OrderRequest) {
        match self.idempotency.reserve(request.idempotency_key, self.clock.now()) {
            Reservation::InFlight => {}
            Reservation::Known(outcome) => {
                self.emit(request.ticket.trade_id, request.ticket.intent, outcome);
            }
            Reservation::New => self.place_and_track(request).await,
        }
    }

    async fn place_and_track(self: Arc<Self>, request: OrderRequest) {
        let order = Order {
            scrip_code: request.ticket.scrip_code.clone(),
            exchange: request.ticket.exchange,
            exchange_type: request.ticket.exchange_type.clone(),
            side: request.ticket.side,
            qty: request.ticket.qty,
            limit_price: request.ticket.limit_price,
        };

        match self.broker.place_market_order(&order).await {
            Ok(order_id) => self.track(order_id, request).await,
            Err(err) => {
                warn!(trade_id = %request.ticket.trade_id, %err, "order placement failed");
                self.handle_rejection(request.ticket, request.idempotency_key, err.to_string())
                    .await;
            }
        }
    }

    async fn track(self: Arc<Self>, order_id: String, request: OrderRequest) {
        let pending = PendingOrder {
            ticket: request.ticket,
            idempotency_key: request.idempotency_key,
            verification_attempts: 0,
            poll_timer: None,
            timeout_timer: None,
            created_at: self.clock.now(),
        };
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(order_id.clone(), pending);

        self.schedule_poll(order_id.clone(), Duration::from_secs(5));
        self.schedule_timeout(order_id);
    }

    fn schedule_poll(self: &Arc<Self>, order_id: String, delay: Duration) {
        let this = self.clone();
        let id_for_timer = order_id.clone();
        let handle = self.timers.schedule_once(delay, move || {
            let this = this.clone();
            let id = id_for_timer.clone();
            tokio::spawn(async move { this.poll_order(id).await });
        });
        if let Some(p) = self.pending.lock().expect("pending map poisoned").get_mut(&order_id) {
            p.poll_timer = Some(handle);
        }
    }

    fn schedule_timeout(self: &Arc<Self>, order_id: String) {
        let wait = Duration::from_millis(self.config.verification_timeout_ms);
        let this = self.clone();
        let id_for_timer = order_id.clone();
        let handle = self.timers.schedule_once(wait, move || {
            let this = this.clone();
            let id = id_for_timer.clone();
            tokio::spawn(async move { this.on_hard_timeout(id).await });
        });
        if let Some(p) = self.pending.lock().expect("pending map poisoned").get_mut(&order_id) {
            p.timeout_timer = Some(handle);
        }
    }

    async fn poll_order(self: Arc<Self>, order_id: String) {
        {
            let mut map = self.pending.lock().expect("pending map poisoned");
            let Some(p) = map.get_mut(&order_id) else { return };
            p.verification_attempts += 1;
        }

        let book = match self.broker.fetch_order_book().await {
            Ok(book) => book,
            Err(err) => {
                warn!(order_id, %err, "order book fetch failed, will retry poll");
                self.reschedule_poll(order_id);
                return;
            }
        };

        let Some(status) = book.into_iter().find(|s| s.order_id == order_id) else {
            self.reschedule_poll(order_id);
            return;
        };

        match classify(&status.status) {
            StatusClass::Complete => {
                self.complete(
                    order_id,
                    VerificationOutcome::Success {
                        filled_qty: status.qty,
                        avg_price: status.avg_price,
                    },
                )
                .await;
            }
            StatusClass::Partial => {
                self.complete(
                    order_id,
                    VerificationOutcome::Partial {
                        filled: status.qty.saturating_sub(status.pending_qty),
                        remaining: status.pending_qty,
                        avg_price: status.avg_price,
                    },
                )
                .await;
            }
            StatusClass::Rejected => {
                let Some(ticket) = self.ticket_for(&order_id) else { return };
                let key = self.key_for(&order_id);
                self.drop_pending(&order_id);
                if let Some(key) = key {
                    self.handle_rejection(
                        ticket,
                        key,
                        status.message.unwrap_or_else(|| "order rejected by broker".to_string()),
                    )
                    .await;
                }
            }
            StatusClass::Pending => self.reschedule_poll(order_id),
        }
    }

    fn reschedule_poll(self: &Arc<Self>, order_id: String) {
        let attempts = self
            .pending
            .lock()
            .expect("pending map poisoned")
            .get(&order_id)
            .map(|p| p.verification_attempts)
            .unwrap_or(0);
        self.schedule_poll(order_id, poll_backoff(attempts));
    }

    /// Either resubmit with incremented `retries_used` after an exponential
    /// backoff, or give up and report `Failure` once `max_retry_attempts`
    /// is exhausted.
    async fn handle_rejection(self: Arc<Self>, ticket: OrderTicket, key: Uuid, reason: String) {
        if ticket.retries_used < self.config.max_retry_attempts {
            let mut retry_ticket = ticket;
            retry_ticket.retries_used += 1;
            let backoff = retry_backoff(retry_ticket.retries_used - 1, self.config.retry_delay_ms);
            let this = self.clone();
            self.timers.schedule_once(backoff, move || {
                let this = this.clone();
                let request = OrderRequest { ticket: retry_ticket.clone(), idempotency_key: key };
                tokio::spawn(async move { this.place_and_track(request).await });
            });
        } else {
            warn!(trade_id = %ticket.trade_id, reason, "order retries exhausted");
            self.finish(ticket.trade_id, ticket.intent, key, VerificationOutcome::Failure { reason });
        }
    }

    async fn on_hard_timeout(self: Arc<Self>, order_id: String) {
        let Some(p) = self.take_pending(&order_id) else { return };
        self.finish(
            p.ticket.trade_id,
            p.ticket.intent,
            p.idempotency_key,
            VerificationOutcome::Failure { reason: "verification timed out".to_string() },
        );
    }

    async fn complete(self: Arc<Self>, order_id: String, outcome: VerificationOutcome) {
        let Some(p) = self.take_pending(&order_id) else { return };
        self.finish(p.ticket.trade_id, p.ticket.intent, p.idempotency_key, outcome);
    }

    fn finish(
        &self,
        trade_id: uuid::Uuid,
        intent: OrderIntent,
        key: Uuid,
        outcome: VerificationOutcome,
    ) {
        self.idempotency.complete(key, outcome.clone(), self.clock.now());
        self.emit(trade_id, intent, outcome);
    }

    fn emit(&self, trade_id: uuid::Uuid, intent: OrderIntent, outcome: VerificationOutcome) {
        let _ = self.results_tx.send(VerificationResult { trade_id, intent, outcome });
    }

    fn take_pending(&self, order_id: &str) -> Option<PendingOrder> {
        let p = self.pending.lock().expect("pending map poisoned").remove(order_id)?;
        if let Some(h) = p.poll_timer.clone() {
            self.timers.cancel(h);
        }
        if let Some(h) = p.timeout_timer.clone() {
            self.timers.cancel(h);
        }
        Some(p)
    }

    fn drop_pending(&self, order_id: &str) {
        let _ = self.take_pending(order_id);
    }

    fn ticket_for(&self, order_id: &str) -> Option<OrderTicket> {
        self.pending
            .lock()
            .expect("pending map poisoned")
            .get(order_id)
            .map(|p| p.ticket.clone())
    }

    fn key_for(&self, order_id: &str) -> Option<Uuid> {
        self.pending
            .lock()
            .expect("pending map poisoned")
            .get(order_id)
            .map(|p| p.idempotency_key)
    }

    #[cfg(test)]
    pub(crate) fn outstanding_count(&self) -> usize {
        self.pending.lock().expect("pending map poisoned").len()
    }
}
