//! Daily price rows and ordered series of them

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

/// One OHLCV row for one symbol and day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub as_of: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

impl Quote {
    /// A row where every price field is `close`. Handy for rate series, which
    /// are usually only meaningful at the close.
    pub fn flat(as_of: NaiveDate, close: Decimal) -> Self {
        Quote {
            as_of,
            open: close,
            high: close,
            low: close,
            close,
            volume: 0,
        }
    }

    fn scaled(&self, factor: Decimal) -> Option<Self> {
        Some(Quote {
            as_of: self.as_of,
            open: self.open.checked_mul(factor)?,
            high: self.high.checked_mul(factor)?,
            low: self.low.checked_mul(factor)?,
            close: self.close.checked_mul(factor)?,
            volume: self.volume,
        })
    }
}

/// Quotes ordered ascending by date, at most one per date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSeries {
    quotes: Vec<Quote>,
}

impl PriceSeries {
    /// Builds a series from rows in any order. When a date repeats, the last
    /// row for it wins.
    pub fn from_quotes(quotes: impl IntoIterator<Item = Quote>) -> Self {
        let by_date: BTreeMap<NaiveDate, Quote> =
            quotes.into_iter().map(|q| (q.as_of, q)).collect();
        PriceSeries {
            quotes: by_date.into_values().collect(),
        }
    }

    pub fn quotes(&self) -> &[Quote] {
        &self.quotes
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    pub fn first(&self) -> Option<&Quote> {
        self.quotes.first()
    }

    pub fn latest(&self) -> Option<&Quote> {
        self.quotes.last()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&Quote> {
        self.quotes
            .binary_search_by_key(&date, |q| q.as_of)
            .ok()
            .map(|i| &self.quotes[i])
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.quotes.iter().map(|q| q.as_of)
    }

    /// Rows dated within `[start, end]`.
    pub fn within(&self, start: NaiveDate, end: NaiveDate) -> Self {
        PriceSeries {
            quotes: self
                .quotes
                .iter()
                .filter(|q| q.as_of >= start && q.as_of <= end)
                .cloned()
                .collect(),
        }
    }

    /// Every price multiplied by `factor`. `None` on overflow.
    pub fn scaled(&self, factor: Decimal) -> Option<Self> {
        let quotes = self
            .quotes
            .iter()
            .map(|q| q.scaled(factor))
            .collect::<Option<Vec<_>>>()?;
        Some(PriceSeries { quotes })
    }

    /// Every price replaced by its reciprocal, for inverse-quoted pairs.
    /// Rows with a zero close are dropped. High and low swap places.
    pub fn inverted(&self) -> Self {
        let quotes = self
            .quotes
            .iter()
            .filter_map(|q| {
                let inv = |v: Decimal| Decimal::ONE.checked_div(v);
                Some(Quote {
                    as_of: q.as_of,
                    open: inv(q.open).unwrap_or(Decimal::ZERO),
                    high: inv(q.low).unwrap_or(Decimal::ZERO),
                    low: inv(q.high).unwrap_or(Decimal::ZERO),
                    close: inv(q.close)?,
                    volume: q.volume,
                })
            })
            .collect();
        PriceSeries { quotes }
    }
}

/// A row as the upstream reported it, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBar {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<u64>,
}

/// Why a raw row did not make it into a [`PriceSeries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Dated after the end of the requested window.
    FutureDated,
    /// Dated before the start of the requested window.
    BeforeWindow,
    /// Close missing, non-finite or not positive.
    Unparseable(String),
    /// Another row already claimed the date.
    Duplicate,
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::FutureDated => write!(f, "dated after the requested window"),
            RejectReason::BeforeWindow => write!(f, "dated before the requested window"),
            RejectReason::Unparseable(detail) => write!(f, "unusable value: {detail}"),
            RejectReason::Duplicate => write!(f, "duplicate date"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    pub date: NaiveDate,
    pub reason: RejectReason,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_from_quotes_sorts_and_dedups() {
        let series = PriceSeries::from_quotes(vec![
            Quote::flat(day(3), dec!(3)),
            Quote::flat(day(1), dec!(1)),
            Quote::flat(day(3), dec!(30)),
        ]);

        let dates: Vec<_> = series.dates().collect();
        assert_eq!(dates, vec![day(1), day(3)]);
        assert_eq!(series.latest().unwrap().close, dec!(30));
        assert_eq!(series.get(day(1)).unwrap().close, dec!(1));
        assert!(series.get(day(2)).is_none());
    }

    #[test]
    fn test_within_is_inclusive() {
        let series = PriceSeries::from_quotes((1..=5).map(|d| Quote::flat(day(d), dec!(1))));
        let window = series.within(day(2), day(4));
        assert_eq!(window.len(), 3);
        assert_eq!(window.first().unwrap().as_of, day(2));
        assert_eq!(window.latest().unwrap().as_of, day(4));
        // the source series is left alone
        assert_eq!(series.len(), 5);
    }

    #[test]
    fn test_scaled_and_inverted() {
        let series = PriceSeries::from_quotes(vec![Quote {
            as_of: day(1),
            open: dec!(4),
            high: dec!(5),
            low: dec!(2),
            close: dec!(4),
            volume: 7,
        }]);

        let scaled = series.scaled(dec!(10)).unwrap();
        assert_eq!(scaled.latest().unwrap().close, dec!(40));
        assert_eq!(scaled.latest().unwrap().volume, 7);

        let inverted = series.inverted();
        let q = inverted.latest().unwrap();
        assert_eq!(q.close, dec!(0.25));
        assert_eq!(q.high, dec!(0.5));
        assert_eq!(q.low, dec!(0.2));
    }

    #[test]
    fn test_inverted_drops_zero_close() {
        let series = PriceSeries::from_quotes(vec![
            Quote::flat(day(1), Decimal::ZERO),
            Quote::flat(day(2), dec!(2)),
        ]);
        let inverted = series.inverted();
        assert_eq!(inverted.len(), 1);
        assert_eq!(inverted.latest().unwrap().as_of, day(2));
    }
}
