//! The upstream seam: anything that can list daily bars for a symbol

use super::error::FetchError;
use super::quote::RawBar;
use async_trait::async_trait;
use chrono::NaiveDate;

/// One request to an upstream provider. Implementations make exactly one
/// attempt; retrying is the fetcher's business.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawBar>, FetchError>;
}
