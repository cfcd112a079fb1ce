//! Deterministic offline provider.
//!
//! Produces plausible snapshots for a fixed instrument list without touching
//! the network. Every value is seeded from BLAKE3(instrument, date), so the
//! same request always yields the same table. Weekends and 1 January are
//! treated as market holidays and produce empty snapshots.
//!
//! Developer and test use only: the numbers are not market data.

use super::provider::{DataError, SnapshotProvider};
use super::table::{InstrumentId, WideSnapshot};
use crate::registry::{Family, Source};
use chrono::{Datelike, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Large caps used when no instrument list is given.
pub const DEFAULT_INSTRUMENTS: [&str; 6] = ["005930", "000660", "035420", "051910", "005380", "035720"];

pub struct SyntheticProvider {
    instruments: Vec<InstrumentId>,
    fetches: AtomicUsize,
}

impl SyntheticProvider {
    pub fn new<I, T>(instruments: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<InstrumentId>,
    {
        Self {
            instruments: instruments.into_iter().map(Into::into).collect(),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Number of `fetch_snapshot` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    fn is_trading_day(date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !(date.month() == 1 && date.day() == 1)
    }

    fn rng_for(instrument: &InstrumentId, date: Option<NaiveDate>) -> StdRng {
        let mut hasher = blake3::Hasher::new();
        hasher.update(instrument.as_str().as_bytes());
        if let Some(date) = date {
            hasher.update(date.to_string().as_bytes());
        }
        StdRng::from_seed(*hasher.finalize().as_bytes())
    }

    fn row(family: Family, instrument: &InstrumentId, date: NaiveDate) -> Vec<Option<f64>> {
        // Per-instrument constants, stable across dates.
        let mut base = Self::rng_for(instrument, None);
        let level = (base.gen_range(10.0..900.0_f64) * 100.0).round();
        let shares = base.gen_range(50_000_000.0..6_000_000_000.0_f64).round();
        let book = level * base.gen_range(0.3..1.5);
        let earnings = level * base.gen_range(0.02..0.15);
        let dividend = earnings * base.gen_range(0.0..0.5);

        let mut daily = Self::rng_for(instrument, Some(date));
        let change: f64 = daily.gen_range(-0.05..0.05);
        let close = (level * (1.0 + change)).round();

        match family {
            Family::Ohlcv => {
                let open = (level * (1.0 + daily.gen_range(-0.02..0.02))).round();
                let high = open.max(close) * (1.0 + daily.gen_range(0.0..0.02));
                let low = open.min(close) * (1.0 - daily.gen_range(0.0..0.02));
                let volume = daily.gen_range(100_000.0..30_000_000.0_f64).round();
                vec![
                    Some(open),
                    Some(high.round()),
                    Some(low.round()),
                    Some(close),
                    Some(volume),
                    Some(volume * close),
                    Some((change * 10_000.0).round() / 100.0),
                ]
            }
            Family::MarketCap => vec![Some(close * shares), Some(shares)],
            Family::Fundamental => vec![
                Some(book.round()),
                Some(close / earnings),
                Some(close / book),
                Some(earnings.round()),
                Some(dividend / close * 100.0),
                Some(dividend.round()),
            ],
        }
    }
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new(DEFAULT_INSTRUMENTS)
    }
}

impl SnapshotProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn source(&self) -> Source {
        Source::Krx
    }

    fn fetch_snapshot(&self, family: Family, date: NaiveDate) -> Result<WideSnapshot, DataError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let fields: Vec<String> = match family {
            Family::Ohlcv => vec!["open", "high", "low", "close", "volume", "turnover", "change_rate"],
            Family::MarketCap => vec!["market_cap", "listed_shares"],
            Family::Fundamental => vec!["bps", "per", "pbr", "eps", "div_yield", "dps"],
        }
        .into_iter()
        .map(String::from)
        .collect();

        let mut snapshot = WideSnapshot::new(date, fields);
        if Self::is_trading_day(date) {
            for instrument in &self.instruments {
                snapshot.push_row(instrument.clone(), Self::row(family, instrument, date));
            }
        }
        Ok(snapshot)
    }

    fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, DataError> {
        Ok(crate::dates::calendar_days(start, end, true)
            .into_iter()
            .filter(|d| Self::is_trading_day(*d))
            .collect())
    }

    fn is_available(&self) -> bool {
        true
    }
}
