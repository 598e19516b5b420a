//! First-success-wins price resolution over prioritized symbols

use super::config::SourceCandidate;
use super::error::{CandidateFailure, FetchError, SourceError};
use super::fetcher::{Fetched, Fetcher};
use super::quote::PriceSeries;
use chrono::Days;
use rust_decimal::Decimal;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info};

/// Calendar days looked back for a "current" price, enough to cover a long
/// weekend or a market holiday.
pub const RECENT_WINDOW_DAYS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTier {
    Primary,
    Backup,
}

impl Display for SourceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceTier::Primary => write!(f, "primary"),
            SourceTier::Backup => write!(f, "backup"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentPrice {
    /// Latest close after unit conversion.
    pub price: Decimal,
    /// The series as fetched, before unit conversion.
    pub raw_series: PriceSeries,
    pub symbol: String,
    pub tier: SourceTier,
    /// Candidates that were tried and failed before this one.
    pub skipped: Vec<CandidateFailure>,
}

/// Picks the latest close of `fetched`, inverting and scaling per candidate.
pub(crate) fn usable_close(
    candidate: &SourceCandidate,
    fetched: &Fetched,
) -> Result<Decimal, FetchError> {
    let raw = fetched
        .series
        .latest()
        .map(|q| q.close)
        .ok_or(FetchError::EmptyPayload)?;

    let normalized = if candidate.inverse {
        Decimal::ONE
            .checked_div(raw)
            .ok_or_else(|| FetchError::Malformed(format!("cannot invert {raw}")))?
    } else {
        raw
    };

    let value = normalized
        .checked_mul(candidate.unit_multiplier)
        .ok_or_else(|| FetchError::Malformed(format!("{raw} overflows after conversion")))?;

    if value <= Decimal::ZERO {
        return Err(FetchError::Malformed(format!("non-positive value {value}")));
    }
    Ok(value)
}

pub struct SourceSelector {
    fetcher: Arc<Fetcher>,
}

impl SourceSelector {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetches the recent window for one candidate and converts its close.
    pub(crate) async fn try_candidate(
        &self,
        candidate: &SourceCandidate,
    ) -> Result<(Decimal, Fetched), FetchError> {
        let end = self.fetcher.today();
        let start = end
            .checked_sub_days(Days::new(RECENT_WINDOW_DAYS))
            .ok_or_else(|| FetchError::InvalidRequest(format!("no window before {end}")))?;
        let fetched = self.fetcher.fetch(&candidate.symbol, start, end).await?;
        let value = usable_close(candidate, &fetched)?;
        Ok((value, fetched))
    }

    /// Tries `primary` then `backup` in the given order and returns the first
    /// usable price. Later candidates are never contacted once one succeeds.
    pub async fn resolve_current_price(
        &self,
        primary: &[SourceCandidate],
        backup: &[SourceCandidate],
    ) -> Result<CurrentPrice, SourceError> {
        let mut failures = Vec::new();
        let tiers = primary
            .iter()
            .map(|c| (SourceTier::Primary, c))
            .chain(backup.iter().map(|c| (SourceTier::Backup, c)));

        for (tier, candidate) in tiers {
            match self.try_candidate(candidate).await {
                Ok((price, fetched)) => {
                    if tier == SourceTier::Backup {
                        info!(symbol = %candidate.symbol, "Using backup source for current price");
                    }
                    debug!(symbol = %candidate.symbol, %price, "Resolved current price");
                    return Ok(CurrentPrice {
                        price,
                        raw_series: fetched.series,
                        symbol: candidate.symbol.clone(),
                        tier,
                        skipped: failures,
                    });
                }
                Err(error) => {
                    debug!(symbol = %candidate.symbol, %error, "Source candidate failed");
                    failures.push(CandidateFailure {
                        symbol: candidate.symbol.clone(),
                        error,
                    });
                }
            }
        }

        Err(SourceError::SourceExhausted { failures })
    }
}
