//! Headline figures over a price series

use super::quote::PriceSeries;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Grams in one troy ounce.
pub const GRAMS_PER_TROY_OUNCE: Decimal = dec!(31.1034768);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceSummary {
    pub latest: Decimal,
    pub previous: Option<Decimal>,
    /// Change from the previous close, in percent.
    pub change_pct: Option<Decimal>,
    pub high: Decimal,
    pub low: Decimal,
    /// Spread between the window's high and low relative to the low, in percent.
    pub range_pct: Option<Decimal>,
}

fn pct_change(from: Decimal, to: Decimal) -> Option<Decimal> {
    if from.is_zero() {
        return None;
    }
    (to - from)
        .checked_div(from)?
        .checked_mul(Decimal::ONE_HUNDRED)
}

impl PriceSummary {
    /// `None` for an empty series.
    pub fn from_series(series: &PriceSeries) -> Option<Self> {
        let quotes = series.quotes();
        let latest = quotes.last()?.close;
        let previous = quotes.len().checked_sub(2).map(|i| quotes[i].close);
        let high = quotes.iter().map(|q| q.high.max(q.close)).max()?;
        let low = quotes.iter().map(|q| q.low.min(q.close)).min()?;

        Some(Self {
            latest,
            previous,
            change_pct: previous.and_then(|p| pct_change(p, latest)),
            high,
            low,
            range_pct: pct_change(low, high),
        })
    }
}

/// Price per gram for a price per troy ounce.
pub fn per_gram(per_ounce: Decimal) -> Decimal {
    per_ounce / GRAMS_PER_TROY_OUNCE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::quote::Quote;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    #[test]
    fn test_summary_over_series() {
        let series = PriceSeries::from_quotes(vec![
            Quote {
                as_of: day(1),
                open: dec!(2000),
                high: dec!(2050),
                low: dec!(1980),
                close: dec!(2040),
                volume: 10,
            },
            Quote::flat(day(2), dec!(2000)),
            Quote::flat(day(3), dec!(2100)),
        ]);

        let summary = PriceSummary::from_series(&series).unwrap();
        assert_eq!(summary.latest, dec!(2100));
        assert_eq!(summary.previous, Some(dec!(2000)));
        assert_eq!(summary.change_pct, Some(dec!(5)));
        assert_eq!(summary.high, dec!(2100));
        assert_eq!(summary.low, dec!(1980));
        assert!(summary.range_pct.unwrap() > dec!(6.06));
        assert!(summary.range_pct.unwrap() < dec!(6.07));
    }

    #[test]
    fn test_summary_single_row() {
        let series = PriceSeries::from_quotes(vec![Quote::flat(day(1), dec!(2000))]);
        let summary = PriceSummary::from_series(&series).unwrap();
        assert!(summary.previous.is_none());
        assert!(summary.change_pct.is_none());
        assert_eq!(summary.range_pct, Some(Decimal::ZERO));

        assert!(PriceSummary::from_series(&PriceSeries::default()).is_none());
    }

    #[test]
    fn test_per_gram() {
        let gram = per_gram(GRAMS_PER_TROY_OUNCE * dec!(2));
        assert_eq!(gram, dec!(2));
    }
}
