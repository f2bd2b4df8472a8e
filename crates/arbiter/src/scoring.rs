use common::{OiLabel, Signal, SourceLane, TradeSide};

/// `rank_score(s) = 0.6 * oi_score(s) + 0.4 * min(volume_surge, 10.0)`.
/// The FUDKOI category lane uses `oi_score` alone — no volume term.
pub fn rank_score(signal: &Signal, lane: &SourceLane) -> f64 {
    let oi = oi_score(signal);
    if matches!(lane, SourceLane::Category(name) if name == "FUDKOI") {
        return oi;
    }
    0.6 * oi + 0.4 * signal.rank_inputs.volume_surge.min(10.0)
}

/// Aligned-direction labels score double a counter-direction covering label;
/// anything else scores zero.
fn oi_score(signal: &Signal) -> f64 {
    let ratio = signal.rank_inputs.oi_ratio.abs();
    let label = signal.rank_inputs.oi_label;
    let weight = match (signal.side, label) {
        (TradeSide::Long, OiLabel::LongBuildup) => 2.0,
        (TradeSide::Long, OiLabel::ShortCovering) => 1.0,
        (TradeSide::Short, OiLabel::ShortBuildup) => 2.0,
        (TradeSide::Short, OiLabel::LongUnwinding) => 1.0,
        _ => 0.0,
    };
    ratio * weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{Exchange, RankInputs, SignalSource};

    fn signal(side: TradeSide, oi_label: OiLabel, oi_ratio: f64, volume_surge: f64) -> Signal {
        Signal {
            scrip_code: "RELIANCE".to_string(),
            exchange: Exchange::Nse,
            side,
            signal_price: 100.0,
            stop_loss: 99.0,
            target1: 101.5,
            target2: None,
            strategy_id: "s1".to_string(),
            source: SignalSource::Confirmed,
            received_at: Utc::now(),
            confidence: 0.9,
            rank_inputs: RankInputs {
                oi_ratio,
                oi_label,
                volume_surge,
            },
        }
    }

    #[test]
    fn aligned_long_buildup_scores_double_a_covering_label() {
        let lane = SourceLane::ConfirmedUnconfirmed;
        let aligned = signal(TradeSide::Long, OiLabel::LongBuildup, 1.0, 0.0);
        let covering = signal(TradeSide::Long, OiLabel::ShortCovering, 1.0, 0.0);
        assert!(rank_score(&aligned, &lane) > rank_score(&covering, &lane));
    }

    #[test]
    fn counter_direction_label_scores_zero_oi_component() {
        let lane = SourceLane::ConfirmedUnconfirmed;
        let s = signal(TradeSide::Long, OiLabel::ShortBuildup, 5.0, 0.0);
        assert_eq!(rank_score(&s, &lane), 0.0);
    }

    #[test]
    fn volume_surge_is_capped_at_ten() {
        let lane = SourceLane::ConfirmedUnconfirmed;
        let capped = signal(TradeSide::Long, OiLabel::LongBuildup, 0.0, 50.0);
        let at_cap = signal(TradeSide::Long, OiLabel::LongBuildup, 0.0, 10.0);
        assert_eq!(rank_score(&capped, &lane), rank_score(&at_cap, &lane));
    }

    #[test]
    fn fudkoi_category_ignores_volume() {
        let lane = SourceLane::Category("FUDKOI".to_string());
        let s = signal(TradeSide::Long, OiLabel::LongBuildup, 1.0, 50.0);
        assert_eq!(rank_score(&s, &lane), oi_score(&s));
    }
}
