//! Currency rate resolution with a configured last resort

use super::config::SourceCandidate;
use super::error::CandidateFailure;
use super::selector::SourceSelector;
use rust_decimal::Decimal;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRate {
    pub rate: Decimal,
    /// Set when no candidate answered and the configured constant was used.
    pub is_fallback: bool,
    /// The candidate that supplied the rate, if any did.
    pub symbol: Option<String>,
    pub failures: Vec<CandidateFailure>,
}

pub struct RateResolver {
    selector: SourceSelector,
    fallback_rate: Decimal,
}

impl RateResolver {
    pub fn new(selector: SourceSelector, fallback_rate: Decimal) -> Self {
        Self {
            selector,
            fallback_rate,
        }
    }

    /// Never fails: if every candidate does, the fallback rate is returned and
    /// flagged as such.
    pub async fn resolve_rate(&self, candidates: &[SourceCandidate]) -> ResolvedRate {
        let mut failures = Vec::new();
        for candidate in candidates {
            match self.selector.try_candidate(candidate).await {
                Ok((rate, _)) => {
                    debug!(symbol = %candidate.symbol, %rate, "Resolved rate");
                    return ResolvedRate {
                        rate,
                        is_fallback: false,
                        symbol: Some(candidate.symbol.clone()),
                        failures,
                    };
                }
                Err(error) => failures.push(CandidateFailure {
                    symbol: candidate.symbol.clone(),
                    error,
                }),
            }
        }

        warn!(
            fallback = %self.fallback_rate,
            tried = failures.len(),
            "No rate source answered, using fallback rate"
        );
        ResolvedRate {
            rate: self.fallback_rate,
            is_fallback: true,
            symbol: None,
            failures,
        }
    }
}
