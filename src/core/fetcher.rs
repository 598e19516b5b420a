//! Bounded, retrying retrieval of one symbol's daily series

use super::clock::Clock;
use super::error::FetchError;
use super::quote::{PriceSeries, Quote, RawBar, RejectReason, RejectedRow};
use super::source::QuoteSource;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// How many times to ask and how long to wait in between.
///
/// The wait before retry `n` (1-based) is `min(base_delay * n, max_delay)`
/// plus a random jitter in `[0, jitter]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// No waiting at all; used where retries must not slow things down.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let linear = self.base_delay.saturating_mul(attempt).min(self.max_delay);
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(fastrand::u64(0..=jitter_ms))
        };
        linear + jitter
    }

    /// Longest time a single fetch can spend sleeping between attempts.
    pub fn worst_case_wait(&self) -> Duration {
        (self.max_delay + self.jitter).saturating_mul(self.max_retries.saturating_sub(1))
    }
}

/// A successfully fetched series together with the rows that were thrown away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub symbol: String,
    pub series: PriceSeries,
    pub rejected: Vec<RejectedRow>,
    pub attempts: u32,
}

pub struct Fetcher {
    source: Arc<dyn QuoteSource>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Fetcher {
    pub fn new(source: Arc<dyn QuoteSource>, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            policy,
            clock,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Fetches `symbol` over `[start, end]`, retrying transient failures.
    ///
    /// Returns the last error once every attempt has failed, or immediately
    /// for failures that retrying cannot fix.
    #[instrument(name = "Fetch", skip(self), fields(symbol = %symbol))]
    pub async fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Fetched, FetchError> {
        let today = self.clock.today();
        if start > end {
            return Err(FetchError::InvalidRequest(format!(
                "window start {start} is after its end {end}"
            )));
        }
        if end > today {
            return Err(FetchError::InvalidRequest(format!(
                "window end {end} is after today {today}"
            )));
        }

        let max_retries = self.policy.max_retries.max(1);
        let mut attempt = 1;
        loop {
            let outcome = self
                .source
                .daily_bars(symbol, start, end)
                .await
                .and_then(|bars| normalize(bars, start, end));

            match outcome {
                Ok((series, rejected)) => {
                    debug!(
                        attempt,
                        rows = series.len(),
                        rejected = rejected.len(),
                        "Fetched series"
                    );
                    return Ok(Fetched {
                        symbol: symbol.to_string(),
                        series,
                        rejected,
                        attempts: attempt,
                    });
                }
                Err(err) => {
                    warn!(attempt, max_retries, error = %err, "Fetch attempt failed");
                    if !err.is_transient() || attempt >= max_retries {
                        return Err(err);
                    }
                    tokio::time::sleep(self.policy.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn to_decimal(value: Option<f64>) -> Option<Decimal> {
    value
        .filter(|v| v.is_finite() && *v > 0.0)
        .and_then(Decimal::from_f64)
}

/// Validates raw rows into a series. Fails with [`FetchError::EmptyPayload`]
/// when nothing usable is left.
fn normalize(
    bars: Vec<RawBar>,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(PriceSeries, Vec<RejectedRow>), FetchError> {
    let mut seen = HashSet::new();
    let mut quotes = Vec::with_capacity(bars.len());
    let mut rejected = Vec::new();

    for bar in bars {
        let reject = |reason| RejectedRow {
            date: bar.date,
            reason,
        };
        if bar.date > end {
            rejected.push(reject(RejectReason::FutureDated));
            continue;
        }
        if bar.date < start {
            rejected.push(reject(RejectReason::BeforeWindow));
            continue;
        }
        let Some(close) = to_decimal(bar.close) else {
            let detail = match bar.close {
                Some(v) => format!("close {v}"),
                None => "close missing".to_string(),
            };
            rejected.push(reject(RejectReason::Unparseable(detail)));
            continue;
        };
        if !seen.insert(bar.date) {
            rejected.push(reject(RejectReason::Duplicate));
            continue;
        }
        quotes.push(Quote {
            as_of: bar.date,
            open: to_decimal(bar.open).unwrap_or(close),
            high: to_decimal(bar.high).unwrap_or(close),
            low: to_decimal(bar.low).unwrap_or(close),
            close,
            volume: bar.volume.unwrap_or(0),
        });
    }

    if quotes.is_empty() {
        return Err(FetchError::EmptyPayload);
    }
    Ok((PriceSeries::from_quotes(quotes), rejected))
}
