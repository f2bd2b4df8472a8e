//! Order Verification Loop: tracks every broker order submission from
//! placement through to a fill, partial fill, rejection, or timeout, and
//! reports the outcome back over a typed channel.

mod keymap;
mod pending;
pub mod verifier;

pub use verifier::Verifier;

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use clock::TestClock;
    use common::{
        BrokerOrderStatus, BrokerPort, Config, Error, Exchange, Order, OrderIntent, OrderRequest,
        OrderSide, OrderStatus, OrderTicket, Result, VerificationOutcome, VerificationResult,
    };

    use super::*;

    /// Deterministic stand-in broker: placement outcome and the order book
    /// returned on each poll are both scripted ahead of time.
    #[derive(Default)]
    struct MockBroker {
        placements: Mutex<Vec<Result<String>>>,
        books: Mutex<Vec<Vec<BrokerOrderStatus>>>,
        placed_orders: Mutex<Vec<Order>>,
    }

    impl MockBroker {
        fn new(placements: Vec<Result<String>>, books: Vec<Vec<BrokerOrderStatus>>) -> Arc<Self> {
            Arc::new(Self {
                placements: Mutex::new(placements),
                books: Mutex::new(books),
                placed_orders: Mutex::new(Vec::new()),
            })
        }

        fn placement_count(&self) -> usize {
            self.placed_orders.lock().expect("poisoned").len()
        }
    }

    #[async_trait]
    impl BrokerPort for MockBroker {
        async fn place_market_order(&self, order: &Order) -> Result<String> {
            self.placed_orders.lock().expect("poisoned").push(order.clone());
            let mut queue = self.placements.lock().expect("poisoned");
            if queue.is_empty() {
                return Err(Error::BrokerPermanent("mock broker exhausted".to_string()));
            }
            queue.remove(0)
        }

        async fn fetch_order_book(&self) -> Result<Vec<BrokerOrderStatus>> {
            let mut queue = self.books.lock().expect("poisoned");
            if queue.is_empty() {
                return Ok(Vec::new());
            }
            Ok(if queue.len() == 1 { queue[0].clone() } else { queue.remove(0) })
        }
    }

    fn ticket(scrip: &str, intent: OrderIntent) -> OrderTicket {
        OrderTicket {
            order_id: None,
            trade_id: Uuid::new_v4(),
            scrip_code: scrip.to_string(),
            side: OrderSide::Buy,
            intent,
            qty: 10,
            exchange: Exchange::Nse,
            exchange_type: "EQ".to_string(),
            limit_price: None,
            retries_used: 0,
            created_at: Utc::now(),
            status: OrderStatus::Pending,
        }
    }

    fn harness(
        broker: Arc<MockBroker>,
        config: Config,
    ) -> (
        Arc<Verifier>,
        Arc<TestClock>,
        mpsc::UnboundedSender<OrderRequest>,
        mpsc::UnboundedReceiver<VerificationResult>,
    ) {
        let start = Utc.with_ymd_and_hms(2026, 7, 28, 9, 15, 0).unwrap();
        let clock = Arc::new(TestClock::new(start));
        let (order_tx, order_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let verifier = Verifier::new(broker, clock.clone(), config, results_tx);
        tokio::spawn(verifier.clone().run(order_rx));
        (verifier, clock, order_tx, results_rx)
    }

    async fn advance(clock: &TestClock, secs: u64) {
        clock.advance(chrono::Duration::seconds(secs as i64));
        tokio::time::advance(StdDuration::from_secs(secs)).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_fill_reports_success() {
        let broker = MockBroker::new(
            vec![Ok("ORD-1".to_string())],
            vec![vec![BrokerOrderStatus {
                order_id: "ORD-1".to_string(),
                status: "COMPLETE".to_string(),
                qty: 10,
                pending_qty: 0,
                avg_price: 101.5,
                message: None,
            }]],
        );
        let (_verifier, clock, order_tx, mut results_rx) = harness(broker, Config::default());

        order_tx
            .send(OrderRequest { ticket: ticket("RELIANCE", OrderIntent::Entry), idempotency_key: Uuid::new_v4() })
            .unwrap();
        tokio::task::yield_now().await;

        advance(&clock, 5).await;

        let result = results_rx.recv().await.expect("verification result");
        match result.outcome {
            VerificationOutcome::Success { filled_qty, avg_price } => {
                assert_eq!(filled_qty, 10);
                assert_eq!(avg_price, 101.5);
            }
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pending_order_polls_with_linear_backoff_then_fills() {
        let broker = MockBroker::new(
            vec![Ok("ORD-2".to_string())],
            vec![
                vec![BrokerOrderStatus {
                    order_id: "ORD-2".to_string(),
                    status: "OPEN".to_string(),
                    qty: 10,
                    pending_qty: 10,
                    avg_price: 0.0,
                    message: None,
                }],
                vec![BrokerOrderStatus {
                    order_id: "ORD-2".to_string(),
                    status: "COMPLETE".to_string(),
                    qty: 10,
                    pending_qty: 0,
                    avg_price: 99.8,
                    message: None,
                }],
            ],
        );
        let (_verifier, clock, order_tx, mut results_rx) = harness(broker, Config::default());

        order_tx
            .send(OrderRequest { ticket: ticket("TCS", OrderIntent::Entry), idempotency_key: Uuid::new_v4() })
            .unwrap();
        tokio::task::yield_now().await;

        advance(&clock, 5).await;
        advance(&clock, 2).await;

        let result = results_rx.recv().await.expect("verification result");
        assert!(matches!(result.outcome, VerificationOutcome::Success { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_retries_with_exponential_backoff_before_failing() {
        let broker = MockBroker::new(
            vec![
                Err(Error::BrokerTransient("throttled".to_string())),
                Err(Error::BrokerTransient("throttled".to_string())),
                Err(Error::BrokerTransient("throttled".to_string())),
                Err(Error::BrokerTransient("throttled".to_string())),
            ],
            vec![Vec::new()],
        );
        let config = Config { max_retry_attempts: 3, retry_delay_ms: 1_000, ..Config::default() };
        let (_verifier, clock, order_tx, mut results_rx) = harness(broker.clone(), config);

        order_tx
            .send(OrderRequest { ticket: ticket("INFY", OrderIntent::Entry), idempotency_key: Uuid::new_v4() })
            .unwrap();
        tokio::task::yield_now().await;

        for _ in 0..3 {
            advance(&clock, 30).await;
        }

        let result = results_rx.recv().await.expect("verification result");
        assert!(matches!(result.outcome, VerificationOutcome::Failure { .. }));
        assert_eq!(broker.placement_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn hard_timeout_fires_when_broker_never_resolves() {
        let broker = MockBroker::new(vec![Ok("ORD-3".to_string())], vec![vec![BrokerOrderStatus {
            order_id: "ORD-3".to_string(),
            status: "OPEN".to_string(),
            qty: 10,
            pending_qty: 10,
            avg_price: 0.0,
            message: None,
        }]]);
        let config = Config { verification_timeout_ms: 30_000, ..Config::default() };
        let (_verifier, clock, order_tx, mut results_rx) = harness(broker, config);

        order_tx
            .send(OrderRequest { ticket: ticket("WIPRO", OrderIntent::Entry), idempotency_key: Uuid::new_v4() })
            .unwrap();
        tokio::task::yield_now().await;

        advance(&clock, 31).await;

        let result = results_rx.recv().await.expect("verification result");
        assert!(matches!(result.outcome, VerificationOutcome::Failure { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_idempotency_key_is_not_resubmitted() {
        let broker = MockBroker::new(
            vec![Ok("ORD-4".to_string())],
            vec![vec![BrokerOrderStatus {
                order_id: "ORD-4".to_string(),
                status: "COMPLETE".to_string(),
                qty: 10,
                pending_qty: 0,
                avg_price: 50.0,
                message: None,
            }]],
        );
        let (_verifier, clock, order_tx, mut results_rx) = harness(broker.clone(), Config::default());

        let key = Uuid::new_v4();
        order_tx.send(OrderRequest { ticket: ticket("HDFC", OrderIntent::Entry), idempotency_key: key }).unwrap();
        tokio::task::yield_now().await;
        advance(&clock, 5).await;
        let first = results_rx.recv().await.expect("first result");
        assert!(matches!(first.outcome, VerificationOutcome::Success { .. }));

        order_tx.send(OrderRequest { ticket: ticket("HDFC", OrderIntent::Entry), idempotency_key: key }).unwrap();
        tokio::task::yield_now().await;

        let replay = results_rx.recv().await.expect("replayed result");
        assert!(matches!(replay.outcome, VerificationOutcome::Success { .. }));
        assert_eq!(broker.placement_count(), 1);
    }
}
