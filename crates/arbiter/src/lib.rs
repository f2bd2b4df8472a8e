//! Signal Arbiter: per-instrument deduplication followed by
//! a cross-instrument batch that picks a single winner by rank score.

pub mod arbiter;
pub mod lane;
pub mod scoring;

pub use arbiter::Arbiter;
pub use scoring::rank_score;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use tokio::sync::mpsc;

    use clock::SystemClock;
    use common::{Config, Exchange, OiLabel, RankInputs, Signal, SignalSource, TradeSide};

    use super::*;

    fn signal(scrip: &str, source: SignalSource, rank: f64) -> Signal {
        Signal {
            scrip_code: scrip.to_string(),
            exchange: Exchange::Nse,
            side: TradeSide::Long,
            signal_price: 100.0,
            stop_loss: 99.0,
            target1: 101.5,
            target2: None,
            strategy_id: "s1".to_string(),
            source,
            received_at: Utc::now(),
            confidence: 0.9,
            rank_inputs: RankInputs {
                oi_ratio: rank,
                oi_label: OiLabel::LongBuildup,
                volume_surge: 0.0,
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn layer1_supersedes_unconfirmed_with_confirmed_in_same_window() {
        let config = Config::default();
        let (winners_tx, mut winners_rx) = mpsc::unbounded_channel();
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        let arbiter = Arbiter::new(&config, Arc::new(SystemClock), winners_tx, results_tx);

        arbiter.submit(signal("RELIANCE", SignalSource::Unconfirmed, 1.0));
        tokio::time::advance(Duration::from_secs(15)).await;
        arbiter.submit(signal("RELIANCE", SignalSource::Confirmed, 1.0));

        tokio::time::advance(Duration::from_secs(21)).await;
        tokio::task::yield_now().await;

        let loser = results_rx.recv().await.expect("superseded result");
        assert_eq!(loser.scrip_code, "RELIANCE");
        assert!(matches!(
            loser.exit_reason,
            Some(common::ExitReason::SupersededBy(ref who)) if who == "CONFIRMED"
        ));

        // Winner proceeds into the 60 s global batch; it has not reached
        // the downstream channel yet.
        assert!(winners_rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        let winner = winners_rx.recv().await.expect("batch winner");
        assert_eq!(winner.scrip_code, "RELIANCE");
        assert!(matches!(winner.source, SignalSource::Confirmed));
    }

    #[tokio::test(start_paused = true)]
    async fn global_batch_picks_highest_rank_score() {
        let config = Config::default();
        let (winners_tx, mut winners_rx) = mpsc::unbounded_channel();
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        let arbiter = Arbiter::new(&config, Arc::new(SystemClock), winners_tx, results_tx);

        arbiter.submit(signal("A", SignalSource::Confirmed, 1.0)); // rank 1.2
        arbiter.submit(signal("B", SignalSource::Confirmed, 3.0)); // rank 3.6 — winner
        arbiter.submit(signal("C", SignalSource::Confirmed, 2.0)); // rank 2.4

        // Each scrip resolves its own 35 s layer1 window independently and
        // immediately (no competing source), landing in the same 60s batch.
        tokio::time::advance(Duration::from_secs(36)).await;
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        let winner = winners_rx.recv().await.expect("batch winner");
        assert_eq!(winner.scrip_code, "B");

        let mut superseded = Vec::new();
        while let Ok(r) = results_rx.try_recv() {
            superseded.push(r.scrip_code);
        }
        superseded.sort();
        assert_eq!(superseded, vec!["A".to_string(), "C".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn category_lane_bypasses_layer1_and_uses_oi_score_alone() {
        let config = Config::default();
        let (winners_tx, mut winners_rx) = mpsc::unbounded_channel();
        let (results_tx, _results_rx) = mpsc::unbounded_channel();
        let arbiter = Arbiter::new(&config, Arc::new(SystemClock), winners_tx, results_tx);

        arbiter.submit(signal(
            "RELIANCE",
            SignalSource::Category("FUDKOI".to_string()),
            1.0,
        ));
        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        let winner = winners_rx.recv().await.expect("lane winner");
        assert_eq!(winner.scrip_code, "RELIANCE");
    }

    #[test]
    fn flush_all_on_an_idle_arbiter_is_a_no_op() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let config = Config::default();
            let (winners_tx, _winners_rx) = mpsc::unbounded_channel();
            let (results_tx, _results_rx) = mpsc::unbounded_channel();
            let arbiter = Arbiter::new(&config, Arc::new(SystemClock), winners_tx, results_tx);
            arbiter.flush_all();
            arbiter.flush_all();
        });
    }
}
