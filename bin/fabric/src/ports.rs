//! Concrete adapters for the ports that have no dedicated crate: trading
//! calendar and sector lookup. Both are out-of-scope external collaborators
//! per the core's design, so the fabric binary owns the simplest adapter
//! that satisfies the port contract.

use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc, Weekday};
use std::collections::HashMap;

use common::{Exchange, SectorMapPort, TradingHoursPort};

/// NSE/BSE trade 09:15–15:30 IST, MCX 09:00–23:30 IST, Monday through
/// Friday. Holidays are not modeled — the exchange calendar is an external
/// collaborator this fabric does not attempt to replicate.
pub struct IstTradingHours;

impl TradingHoursPort for IstTradingHours {
    fn is_tradeable(&self, exchange: Exchange, ist_time: DateTime<Utc>) -> bool {
        let ist = ist_time.with_timezone(&clock::ist_offset());
        if matches!(ist.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let (open, close) = match exchange {
            Exchange::Nse | Exchange::Bse => (
                NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
                NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
            ),
            Exchange::Mcx => (
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(23, 30, 0).unwrap(),
            ),
        };
        let now = ist.time().with_nanosecond(0).unwrap_or(ist.time());
        now >= open && now <= close
    }
}

/// Static in-memory sector lookup, `OTHER` for anything unrecognized.
/// A real deployment would source this from an instrument master; the
/// table here covers a handful of well-known large caps so the Risk
/// Gate's sector-concentration check has something non-trivial to chew on
/// out of the box.
pub struct StaticSectorMap {
    sectors: HashMap<&'static str, &'static str>,
}

impl StaticSectorMap {
    pub fn new() -> Self {
        let sectors = [
            ("RELIANCE", "ENERGY"),
            ("ONGC", "ENERGY"),
            ("TCS", "IT"),
            ("INFY", "IT"),
            ("WIPRO", "IT"),
            ("HDFCBANK", "FINANCIALS"),
            ("ICICIBANK", "FINANCIALS"),
            ("SBIN", "FINANCIALS"),
            ("SUNPHARMA", "PHARMA"),
            ("CIPLA", "PHARMA"),
        ]
        .into_iter()
        .collect();
        Self { sectors }
    }
}

impl Default for StaticSectorMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SectorMapPort for StaticSectorMap {
    fn sector_of(&self, scrip_code: &str) -> String {
        self.sectors
            .get(scrip_code)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "OTHER".to_string())
    }
}
