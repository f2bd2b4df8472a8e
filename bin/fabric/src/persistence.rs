//! `EventBusPort` adapter that durably records trade outcomes to SQLite and
//! forwards a human-readable line to the Chat Port for every event worth an
//! operator's attention. Also owns the periodic `active_trades` snapshot
//! flush, since that table mirrors live state rather than append-only
//! history and so isn't naturally driven by one event at a time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{error, warn};

use common::{ActiveTrade, ChatPort, Error, Event, EventBusPort, ExitReason, Result, TradeOutcome};
use coordinator::CoordinatorHandle;

pub struct SqliteEventBus {
    pool: SqlitePool,
    chat: Option<Arc<dyn ChatPort>>,
    chat_channel: Option<String>,
}

impl SqliteEventBus {
    pub fn new(pool: SqlitePool, chat: Option<Arc<dyn ChatPort>>, chat_channel: Option<String>) -> Self {
        Self { pool, chat, chat_channel }
    }

    async fn notify(&self, text: String) {
        let (Some(chat), Some(channel)) = (&self.chat, &self.chat_channel) else {
            return;
        };
        if let Err(err) = chat.send(channel, &text).await {
            warn!(%err, "failed to deliver chat notification");
        }
    }

    async fn persist_trade_result(
        &self,
        trade_id: uuid::Uuid,
        scrip_code: &str,
        strategy_id: &str,
        outcome: TradeOutcome,
        exit_reason: Option<&ExitReason>,
        realized_pnl: f64,
        entry_price: Option<f64>,
        exit_price: Option<f64>,
        signal_time: chrono::DateTime<Utc>,
        entry_time: Option<chrono::DateTime<Utc>>,
        exit_time: Option<chrono::DateTime<Utc>>,
        duration_secs: Option<i64>,
        event_seq: u64,
    ) -> std::result::Result<(), sqlx::Error> {
        let outcome_str = outcome_label(outcome);
        let exit_reason_str = exit_reason.map(|r| r.to_string());
        let event_seq = event_seq as i64;
        let recorded_at = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO trade_results
                (trade_id, scrip_code, strategy_id, outcome, exit_reason, realized_pnl,
                 entry_price, exit_price, signal_time, entry_time, exit_time,
                 duration_secs, event_seq, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(trade_id) DO UPDATE SET
                outcome = excluded.outcome,
                exit_reason = excluded.exit_reason,
                realized_pnl = excluded.realized_pnl,
                exit_price = excluded.exit_price,
                exit_time = excluded.exit_time,
                duration_secs = excluded.duration_secs,
                event_seq = excluded.event_seq
            "#,
        )
        .bind(trade_id.to_string())
        .bind(scrip_code)
        .bind(strategy_id)
        .bind(outcome_str)
        .bind(exit_reason_str)
        .bind(realized_pnl)
        .bind(entry_price)
        .bind(exit_price)
        .bind(signal_time.to_rfc3339())
        .bind(entry_time.map(|t| t.to_rfc3339()))
        .bind(exit_time.map(|t| t.to_rfc3339()))
        .bind(duration_secs)
        .bind(event_seq)
        .bind(recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn outcome_label(outcome: TradeOutcome) -> &'static str {
    match outcome {
        TradeOutcome::Filled => "FILLED",
        TradeOutcome::Failed => "FAILED",
        TradeOutcome::Superseded => "SUPERSEDED",
        TradeOutcome::Timeout => "TIMEOUT",
    }
}

#[async_trait]
impl EventBusPort for SqliteEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        match event {
            Event::TradeEntry(e) => {
                self.notify(format!(
                    "Entered {} {:?} {} @ {:.2}",
                    e.scrip_code, e.side, e.position_size, e.entry_price
                ))
                .await;
            }
            Event::TradeExitPartial(e) => {
                self.notify(format!(
                    "Partial exit {} qty {} @ {:.2} ({}), pnl {:.2}",
                    e.scrip_code, e.qty_closed, e.exit_price, e.exit_reason, e.realized_pnl
                ))
                .await;
            }
            Event::TradeExit(e) => {
                self.persist_trade_result(
                    e.trade_id,
                    &e.scrip_code,
                    &e.strategy_id,
                    TradeOutcome::Filled,
                    Some(&e.exit_reason),
                    e.realized_pnl,
                    Some(e.entry_price),
                    Some(e.exit_price),
                    e.signal_time,
                    Some(e.entry_time),
                    Some(e.exit_time),
                    Some(e.duration_secs),
                    0,
                )
                .await
                .map_err(Error::Database)?;

                self.notify(format!(
                    "Closed {} {:?} ({}), pnl {:.2}",
                    e.scrip_code, e.side, e.exit_reason, e.realized_pnl
                ))
                .await;
            }
            Event::PortfolioUpdate(e) => {
                self.notify(format!(
                    "Portfolio value {:.2}, total pnl {:.2} ({:.2}%)",
                    e.current_value, e.total_pnl, e.roi_pct
                ))
                .await;
            }
            Event::TradeResult(r) => {
                self.persist_trade_result(
                    r.trade_id,
                    &r.scrip_code,
                    &r.strategy_id,
                    r.outcome.clone(),
                    r.exit_reason.as_ref(),
                    r.realized_pnl,
                    r.entry_price,
                    r.exit_price,
                    r.signal_time,
                    r.entry_time,
                    r.exit_time,
                    r.duration_secs,
                    r.event_seq,
                )
                .await
                .map_err(Error::Database)?;
            }
        }
        Ok(())
    }
}

/// Upsert every trade currently under management into `active_trades`.
/// Intended to be driven by a periodic task; cheap enough to run every few
/// seconds since the Position Manager's snapshot is an in-memory clone.
async fn flush_active_trades(pool: &SqlitePool, trades: &[ActiveTrade]) -> std::result::Result<(), sqlx::Error> {
    for trade in trades {
        let extra_json = trade
            .extra
            .as_ref()
            .map(|e| serde_json::to_string(e).unwrap_or_default());
        let delay_reason = trade.delay_reason.map(|r| format!("{r:?}"));

        sqlx::query(
            r#"
            INSERT INTO active_trades
                (trade_id, scrip_code, exchange, side, strategy_id, signal_time, signal_price,
                 stop_loss, target1, target2, status, entry_price, entry_time, position_size,
                 high_since_entry, low_since_entry, trailing_stop, target1_hit, entry_delayed,
                 delay_pivot, delay_reason, max_hold_deadline, created_at, extra, event_seq)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(trade_id) DO UPDATE SET
                status = excluded.status,
                entry_price = excluded.entry_price,
                entry_time = excluded.entry_time,
                high_since_entry = excluded.high_since_entry,
                low_since_entry = excluded.low_since_entry,
                trailing_stop = excluded.trailing_stop,
                target1_hit = excluded.target1_hit,
                entry_delayed = excluded.entry_delayed,
                delay_pivot = excluded.delay_pivot,
                delay_reason = excluded.delay_reason,
                event_seq = excluded.event_seq
            "#,
        )
        .bind(trade.trade_id.to_string())
        .bind(trade.scrip_code.clone())
        .bind(trade.exchange.to_string())
        .bind(trade.side.to_string())
        .bind(trade.strategy_id.clone())
        .bind(trade.signal_time.to_rfc3339())
        .bind(trade.signal_price)
        .bind(trade.stop_loss)
        .bind(trade.target1)
        .bind(trade.target2)
        .bind(format!("{:?}", trade.status))
        .bind(trade.entry_price)
        .bind(trade.entry_time.map(|t| t.to_rfc3339()))
        .bind(trade.position_size as i64)
        .bind(trade.high_since_entry)
        .bind(trade.low_since_entry)
        .bind(trade.trailing_stop)
        .bind(trade.target1_hit as i64)
        .bind(trade.entry_delayed as i64)
        .bind(trade.delay_pivot)
        .bind(delay_reason)
        .bind(trade.max_hold_deadline.to_rfc3339())
        .bind(trade.created_at.to_rfc3339())
        .bind(extra_json)
        .bind(trade.event_seq as i64)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Spawn the periodic `active_trades` snapshot-flush task. Runs until the
/// handle (and therefore the Coordinator behind it) is dropped.
pub fn spawn_active_trades_flusher(pool: SqlitePool, handle: CoordinatorHandle, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let trades = handle.snapshot();
            if let Err(err) = flush_active_trades(&pool, &trades).await {
                error!(%err, "failed to flush active_trades snapshot");
            }
        }
    });
}
