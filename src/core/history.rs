//! Reconciles an asset series with an exchange-rate series into one table.
//!
//! The two series are sampled independently upstream and rarely line up
//! perfectly: markets close on different holidays, feeds occasionally carry a
//! row for a day that has not happened yet, and single rows can be broken.
//! [`reconcile`] keeps only the dates both sides agree on and explains every
//! date it leaves out through a [`Diagnostic`].

use super::config::SourceCandidate;
use super::error::{FetchError, SeriesSide, SourceError};
use super::fetcher::{Fetched, Fetcher};
use super::quote::{PriceSeries, Quote, RejectReason};
use chrono::{Days, NaiveDate};
use futures::future::join;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// One day's asset price expressed in both currencies.
///
/// `asset_price_quote_ccy = asset_price_base_ccy * fx_rate` and
/// `local_price_quote_ccy = asset_price_quote_ccy * premium_multiplier`.
/// The premium is configured, not observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledRecord {
    pub date: NaiveDate,
    pub asset_price_base_ccy: Decimal,
    pub asset_price_quote_ccy: Decimal,
    pub local_price_quote_ccy: Decimal,
    pub fx_rate: Decimal,
    pub premium_multiplier: Decimal,
}

impl ReconciledRecord {
    /// Derives the composite fields for one date.
    pub fn compute(
        date: NaiveDate,
        asset_price_base_ccy: Decimal,
        fx_rate: Decimal,
        premium_multiplier: Decimal,
    ) -> Result<Self, String> {
        if asset_price_base_ccy <= Decimal::ZERO {
            return Err(format!("non-positive asset price {asset_price_base_ccy}"));
        }
        if fx_rate <= Decimal::ZERO {
            return Err(format!("non-positive rate {fx_rate}"));
        }
        let asset_price_quote_ccy = asset_price_base_ccy
            .checked_mul(fx_rate)
            .ok_or_else(|| format!("{asset_price_base_ccy} x {fx_rate} overflows"))?;
        let local_price_quote_ccy = asset_price_quote_ccy
            .checked_mul(premium_multiplier)
            .ok_or_else(|| format!("{asset_price_quote_ccy} x {premium_multiplier} overflows"))?;
        Ok(Self {
            date,
            asset_price_base_ccy,
            asset_price_quote_ccy,
            local_price_quote_ccy,
            fx_rate,
            premium_multiplier,
        })
    }
}

/// Records ordered ascending by date, one per date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledSeries {
    records: Vec<ReconciledRecord>,
}

impl ReconciledSeries {
    pub fn from_records(mut records: Vec<ReconciledRecord>) -> Self {
        records.sort_by_key(|r| r.date);
        records.dedup_by_key(|r| r.date);
        Self { records }
    }

    pub fn records(&self) -> &[ReconciledRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.records.iter().map(|r| r.date)
    }

    pub fn latest(&self) -> Option<&ReconciledRecord> {
        self.records.last()
    }

    /// The asset price in base currency as a plain series, for summaries.
    pub fn base_prices(&self) -> PriceSeries {
        PriceSeries::from_quotes(
            self.records
                .iter()
                .map(|r| Quote::flat(r.date, r.asset_price_base_ccy)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticReason {
    /// The date exists in one series only.
    MissingCounterpart,
    /// The row is dated after today.
    FutureDated,
    /// Upstream sent a row that could not be used.
    RejectedRow(String),
    /// Both rows exist but the composite fields could not be derived.
    ConversionFailed(String),
}

impl Display for DiagnosticReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticReason::MissingCounterpart => write!(f, "missing counterpart"),
            DiagnosticReason::FutureDated => write!(f, "future-dated row"),
            DiagnosticReason::RejectedRow(detail) => write!(f, "rejected row: {detail}"),
            DiagnosticReason::ConversionFailed(detail) => write!(f, "conversion failed: {detail}"),
        }
    }
}

/// A date left out of the reconciled series and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub date: NaiveDate,
    /// The side the problem was seen on; `None` when it concerns both.
    pub side: Option<SeriesSide>,
    pub reason: DiagnosticReason,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.side {
            Some(side) => write!(f, "{} ({side}): {}", self.date, self.reason),
            None => write!(f, "{}: {}", self.date, self.reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryReport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub asset_symbol: String,
    pub rate_symbol: String,
    pub series: ReconciledSeries,
    pub diagnostics: Vec<Diagnostic>,
}

/// Inner-joins `asset` and `rate` on date.
///
/// Rows dated after `today` are dropped from both sides first. Dates present
/// on one side only, and dates whose conversion fails, are reported and
/// skipped; nothing is interpolated.
pub fn reconcile(
    asset: &PriceSeries,
    rate: &PriceSeries,
    premium_multiplier: Decimal,
    today: NaiveDate,
) -> (ReconciledSeries, Vec<Diagnostic>) {
    let mut records = Vec::new();
    let mut diagnostics = Vec::new();

    let dates: BTreeSet<NaiveDate> = asset.dates().chain(rate.dates()).collect();
    for date in dates {
        let asset_row = asset.get(date);
        let rate_row = rate.get(date);

        if date > today {
            for (side, row) in [(SeriesSide::Asset, asset_row), (SeriesSide::Rate, rate_row)] {
                if row.is_some() {
                    diagnostics.push(Diagnostic {
                        date,
                        side: Some(side),
                        reason: DiagnosticReason::FutureDated,
                    });
                }
            }
            continue;
        }

        match (asset_row, rate_row) {
            (Some(a), Some(r)) => {
                match ReconciledRecord::compute(date, a.close, r.close, premium_multiplier) {
                    Ok(record) => records.push(record),
                    Err(detail) => diagnostics.push(Diagnostic {
                        date,
                        side: None,
                        reason: DiagnosticReason::ConversionFailed(detail),
                    }),
                }
            }
            (Some(_), None) => diagnostics.push(Diagnostic {
                date,
                side: Some(SeriesSide::Asset),
                reason: DiagnosticReason::MissingCounterpart,
            }),
            (None, Some(_)) => diagnostics.push(Diagnostic {
                date,
                side: Some(SeriesSide::Rate),
                reason: DiagnosticReason::MissingCounterpart,
            }),
            (None, None) => {}
        }
    }

    (ReconciledSeries::from_records(records), diagnostics)
}

fn rejected_diagnostics(side: SeriesSide, fetched: &Fetched) -> impl Iterator<Item = Diagnostic> {
    fetched.rejected.iter().map(move |row| Diagnostic {
        date: row.date,
        side: Some(side),
        reason: match &row.reason {
            RejectReason::FutureDated => DiagnosticReason::FutureDated,
            other => DiagnosticReason::RejectedRow(other.to_string()),
        },
    })
}

/// Applies the candidate's inversion and unit conversion to a whole series.
pub(crate) fn normalize_series(candidate: &SourceCandidate, series: &PriceSeries) -> Result<PriceSeries, FetchError> {
    let series = if candidate.inverse {
        series.inverted()
    } else {
        series.clone()
    };
    if candidate.unit_multiplier == Decimal::ONE {
        return Ok(series);
    }
    series.scaled(candidate.unit_multiplier).ok_or_else(|| {
        FetchError::Malformed(format!(
            "{} overflows after unit conversion",
            candidate.symbol
        ))
    })
}

pub struct HistoryBuilder {
    fetcher: Arc<Fetcher>,
    asset: SourceCandidate,
    rate: SourceCandidate,
    premium_multiplier: Decimal,
}

impl HistoryBuilder {
    pub fn new(
        fetcher: Arc<Fetcher>,
        asset: SourceCandidate,
        rate: SourceCandidate,
        premium_multiplier: Decimal,
    ) -> Self {
        Self {
            fetcher,
            asset,
            rate,
            premium_multiplier,
        }
    }

    /// Builds the reconciled series for the last `days` calendar days.
    ///
    /// Fails only when a whole side is unavailable; problems with single
    /// dates end up in [`HistoryReport::diagnostics`].
    #[instrument(name = "BuildHistory", skip(self))]
    pub async fn build_history(&self, days: u32) -> Result<HistoryReport, SourceError> {
        if days == 0 {
            return Err(SourceError::InvalidRequest(
                "history needs at least one day".to_string(),
            ));
        }
        let end = self.fetcher.today();
        let start = end
            .checked_sub_days(Days::new(u64::from(days)))
            .ok_or_else(|| {
                SourceError::InvalidRequest(format!("{days} days reaches before the calendar"))
            })?;

        let (asset, rate) = join(
            self.fetcher.fetch(&self.asset.symbol, start, end),
            self.fetcher.fetch(&self.rate.symbol, start, end),
        )
        .await;
        let asset = asset.map_err(|cause| SourceError::IncompleteHistory {
            side: SeriesSide::Asset,
            cause,
        })?;
        let rate = rate.map_err(|cause| SourceError::IncompleteHistory {
            side: SeriesSide::Rate,
            cause,
        })?;

        let asset_series = normalize_series(&self.asset, &asset.series).map_err(|cause| {
            SourceError::IncompleteHistory {
                side: SeriesSide::Asset,
                cause,
            }
        })?;
        let rate_series = normalize_series(&self.rate, &rate.series).map_err(|cause| {
            SourceError::IncompleteHistory {
                side: SeriesSide::Rate,
                cause,
            }
        })?;
        if rate_series.is_empty() {
            return Err(SourceError::IncompleteHistory {
                side: SeriesSide::Rate,
                cause: FetchError::EmptyPayload,
            });
        }

        let (series, mut diagnostics) =
            reconcile(&asset_series, &rate_series, self.premium_multiplier, end);
        diagnostics.extend(rejected_diagnostics(SeriesSide::Asset, &asset));
        diagnostics.extend(rejected_diagnostics(SeriesSide::Rate, &rate));
        diagnostics.sort_by_key(|d| (d.date, d.side.map(|s| s == SeriesSide::Rate)));

        if !diagnostics.is_empty() {
            info!(
                records = series.len(),
                skipped = diagnostics.len(),
                "History reconciled with gaps"
            );
        } else {
            debug!(records = series.len(), "History reconciled");
        }

        Ok(HistoryReport {
            start,
            end,
            asset_symbol: self.asset.symbol.clone(),
            rate_symbol: self.rate.symbol.clone(),
            series,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::fetcher::RetryPolicy;
    use crate::core::fetcher::tests::{ScriptedSource, bar, day};
    use rust_decimal_macros::dec;

    fn series(rows: &[(NaiveDate, Decimal)]) -> PriceSeries {
        PriceSeries::from_quotes(rows.iter().map(|(d, c)| Quote::flat(*d, *c)))
    }

    #[test]
    fn test_reconcile_inner_join_example() {
        let asset = series(&[
            (day(2024, 1, 1), dec!(2000)),
            (day(2024, 1, 2), dec!(2010)),
        ]);
        let rate = series(&[(day(2024, 1, 1), dec!(7.1)), (day(2024, 1, 3), dec!(7.2))]);

        let (reconciled, diagnostics) = reconcile(&asset, &rate, dec!(1.02), day(2024, 1, 10));

        assert_eq!(reconciled.len(), 1);
        let record = &reconciled.records()[0];
        assert_eq!(record.date, day(2024, 1, 1));
        assert_eq!(record.asset_price_base_ccy, dec!(2000));
        assert_eq!(record.asset_price_quote_ccy, dec!(14200));
        assert_eq!(record.local_price_quote_ccy, dec!(14484));
        assert_eq!(record.fx_rate, dec!(7.1));
        assert_eq!(record.premium_multiplier, dec!(1.02));

        assert_eq!(
            diagnostics,
            vec![
                Diagnostic {
                    date: day(2024, 1, 2),
                    side: Some(SeriesSide::Asset),
                    reason: DiagnosticReason::MissingCounterpart,
                },
                Diagnostic {
                    date: day(2024, 1, 3),
                    side: Some(SeriesSide::Rate),
                    reason: DiagnosticReason::MissingCounterpart,
                },
            ]
        );
        assert_eq!(diagnostics[0].reason.to_string(), "missing counterpart");
    }

    #[test]
    fn test_reconcile_drops_future_rows() {
        let today = day(2024, 1, 2);
        let asset = series(&[
            (day(2024, 1, 1), dec!(2000)),
            (day(2024, 1, 2), dec!(2010)),
            (day(2024, 1, 3), dec!(2020)),
        ]);
        let rate = series(&[
            (day(2024, 1, 1), dec!(7)),
            (day(2024, 1, 2), dec!(7)),
            (day(2024, 1, 3), dec!(7)),
        ]);

        let (reconciled, diagnostics) = reconcile(&asset, &rate, Decimal::ONE, today);

        assert_eq!(reconciled.dates().collect::<Vec<_>>(), vec![day(2024, 1, 1), today]);
        assert_eq!(diagnostics.len(), 2);
        assert!(
            diagnostics
                .iter()
                .all(|d| d.date == day(2024, 1, 3) && d.reason == DiagnosticReason::FutureDated)
        );
    }

    #[test]
    fn test_reconcile_skips_failed_conversion_only() {
        let asset = series(&[
            (day(2024, 1, 1), dec!(2000)),
            (day(2024, 1, 2), Decimal::MAX),
            (day(2024, 1, 3), dec!(2020)),
        ]);
        let rate = series(&[
            (day(2024, 1, 1), dec!(7)),
            (day(2024, 1, 2), dec!(7)),
            (day(2024, 1, 3), dec!(7)),
        ]);

        let (reconciled, diagnostics) = reconcile(&asset, &rate, Decimal::ONE, day(2024, 1, 5));

        assert_eq!(reconciled.len(), 2);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].date, day(2024, 1, 2));
        assert!(matches!(
            diagnostics[0].reason,
            DiagnosticReason::ConversionFailed(_)
        ));
    }

    #[test]
    fn test_reconciled_records_hold_invariants() {
        let asset = series(&[
            (day(2024, 1, 3), dec!(2031.7)),
            (day(2024, 1, 1), dec!(2000.25)),
            (day(2024, 1, 2), dec!(2011.5)),
        ]);
        let rate = series(&[
            (day(2024, 1, 2), dec!(7.1234)),
            (day(2024, 1, 3), dec!(7.1301)),
            (day(2024, 1, 1), dec!(7.0999)),
        ]);

        let (reconciled, _) = reconcile(&asset, &rate, dec!(1.015), day(2024, 1, 5));

        let dates: Vec<_> = reconciled.dates().collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);
        for r in reconciled.records() {
            assert_eq!(r.asset_price_quote_ccy, r.asset_price_base_ccy * r.fx_rate);
            assert_eq!(
                r.local_price_quote_ccy,
                r.asset_price_quote_ccy * r.premium_multiplier
            );
            assert!(asset.get(r.date).is_some() && rate.get(r.date).is_some());
        }
    }

    fn builder(source: Arc<ScriptedSource>, today: NaiveDate) -> HistoryBuilder {
        let clock = Arc::new(ManualClock::at_date(today));
        let fetcher = Arc::new(Fetcher::new(source, RetryPolicy::immediate(2), clock));
        HistoryBuilder::new(
            fetcher,
            SourceCandidate::new("GC=F", 1),
            SourceCandidate::new("CNY=X", 1),
            dec!(1.02),
        )
    }

    #[tokio::test]
    async fn test_build_history_reports_upstream_future_rows() {
        let today = day(2024, 1, 3);
        let source = Arc::new(
            ScriptedSource::new()
                .script("GC=F", vec![Ok(vec![
                    bar(day(2024, 1, 2), 2000.0),
                    bar(day(2024, 1, 3), 2010.0),
                    bar(day(2024, 1, 4), 2020.0),
                ])])
                .script("CNY=X", vec![Ok(vec![
                    bar(day(2024, 1, 2), 7.1),
                    bar(day(2024, 1, 3), 7.2),
                ])]),
        );

        let report = builder(source, today).build_history(5).await.unwrap();

        assert_eq!(report.start, day(2023, 12, 29));
        assert_eq!(report.end, today);
        assert_eq!(
            report.series.dates().collect::<Vec<_>>(),
            vec![day(2024, 1, 2), today]
        );
        assert_eq!(report.series.records()[0].asset_price_quote_ccy, dec!(14200));
        assert_eq!(
            report.diagnostics,
            vec![Diagnostic {
                date: day(2024, 1, 4),
                side: Some(SeriesSide::Asset),
                reason: DiagnosticReason::FutureDated,
            }]
        );
    }

    #[tokio::test]
    async fn test_build_history_fails_when_a_side_is_empty() {
        let today = day(2024, 1, 3);
        let source = Arc::new(
            ScriptedSource::new()
                .script("GC=F", vec![Ok(vec![bar(day(2024, 1, 2), 2000.0)])])
                .script("CNY=X", vec![Ok(vec![])]),
        );

        let err = builder(Arc::clone(&source), today)
            .build_history(5)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SourceError::IncompleteHistory {
                side: SeriesSide::Rate,
                cause: FetchError::EmptyPayload,
            }
        );
        assert!(err.to_string().starts_with("incomplete source data"));
        assert_eq!(source.calls("CNY=X"), 2);
    }

    #[tokio::test]
    async fn test_build_history_rejects_zero_days() {
        let source = Arc::new(ScriptedSource::new());
        let err = builder(Arc::clone(&source), day(2024, 1, 3))
            .build_history(0)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidRequest(_)));
        assert_eq!(source.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_build_history_rejects_window_past_calendar_start() {
        let source = Arc::new(ScriptedSource::new());
        let err = builder(Arc::clone(&source), day(2024, 1, 3))
            .build_history(u32::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidRequest(_)));
        assert_eq!(source.total_calls(), 0);
    }
}
