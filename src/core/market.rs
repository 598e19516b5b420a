//! The application facade: cached price, rate and history lookups plus the
//! daily snapshot.

use super::cache::{Cached, ResultCache};
use super::clock::{Clock, SystemClock};
use super::config::{AppConfig, SourceCandidate};
use super::error::SourceError;
use super::fetcher::{Fetcher, RetryPolicy};
use super::history::{
    HistoryBuilder, HistoryReport, ReconciledRecord, ReconciledSeries, normalize_series,
};
use super::quote::PriceSeries;
use super::rate::{RateResolver, ResolvedRate};
use super::selector::{CurrentPrice, RECENT_WINDOW_DAYS, SourceSelector, SourceTier};
use super::source::QuoteSource;
use crate::providers::yahoo_finance::YahooChartSource;
use crate::store::{self, SnapshotStore};
use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const OP_CURRENT_PRICE: &str = "resolve_current_price";
pub const OP_RATE: &str = "resolve_rate";
pub const OP_HISTORY: &str = "build_history";

/// Where a snapshot's numbers came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// Read back from the snapshot store.
    Stored,
    Live {
        price_symbol: String,
        tier: SourceTier,
        /// Candidates that failed before `price_symbol` answered.
        skipped: usize,
        rate_symbol: Option<String>,
        rate_is_fallback: bool,
        /// The price came out of the result cache.
        from_cache: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketSnapshot {
    pub record: ReconciledRecord,
    pub provenance: Provenance,
    /// Recent benchmark closes in the base currency, oldest first.
    pub recent: PriceSeries,
}

pub struct MarketService {
    config: AppConfig,
    selector: SourceSelector,
    rates: RateResolver,
    history: HistoryBuilder,
    cache: ResultCache,
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
}

impl MarketService {
    pub fn new(
        config: AppConfig,
        source: Arc<dyn QuoteSource>,
        store: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let fetcher = Arc::new(Fetcher::new(
            source,
            RetryPolicy::from(&config.retry),
            clock.clone(),
        ));
        let asset = config
            .sources
            .history_asset()
            .cloned()
            .context("No asset source configured for history")?;
        let rate = config
            .sources
            .history_rate()
            .cloned()
            .context("No rate source configured for history")?;

        Ok(Self {
            selector: SourceSelector::new(fetcher.clone()),
            rates: RateResolver::new(SourceSelector::new(fetcher.clone()), config.fallback_rate),
            history: HistoryBuilder::new(fetcher, asset, rate, config.premium_multiplier),
            cache: ResultCache::new(clock.clone(), config.cache.max_ttl()),
            store,
            clock,
            config,
        })
    }

    /// Wires the Yahoo source, the configured snapshot store and the system
    /// clock.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let yahoo = config
            .providers
            .yahoo
            .clone()
            .context("Yahoo provider is not configured")?;
        let source = YahooChartSource::new(
            &yahoo.base_url,
            std::time::Duration::from_secs(yahoo.timeout_secs),
        )?;
        let store = store::open(&config);
        Self::new(config, Arc::new(source), store, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub async fn current_price(&self) -> Cached<CurrentPrice, SourceError> {
        let sources = &self.config.sources;
        self.cache
            .cached(
                OP_CURRENT_PRICE,
                &(&sources.primary, &sources.backup),
                self.config.cache.price_ttl(),
                || self.selector.resolve_current_price(&sources.primary, &sources.backup),
            )
            .await
    }

    pub async fn rate(&self) -> Cached<ResolvedRate, Infallible> {
        let candidates = &self.config.sources.rate;
        self.cache
            .cached(
                OP_RATE,
                candidates,
                std::time::Duration::from_secs(self.config.cache.default_ttl_secs),
                || async { Ok(self.rates.resolve_rate(candidates).await) },
            )
            .await
    }

    /// Reconciled history for the last `days` days, cached per day count.
    pub async fn history(&self, days: u32) -> Cached<HistoryReport, SourceError> {
        let max_days = self.config.history.max_days;
        if days > max_days {
            return Cached {
                value: Err(SourceError::InvalidRequest(format!(
                    "history is limited to {max_days} days, got {days}"
                ))),
                computed_at: self.clock.now(),
                from_cache: false,
            };
        }
        self.cache
            .cached(OP_HISTORY, &days, self.config.cache.history_ttl(), || {
                self.history.build_history(days)
            })
            .await
    }

    /// Today's reconciled record. A record already stored for today is served
    /// as is; otherwise the price and rate are resolved live.
    pub async fn snapshot(&self) -> Result<MarketSnapshot, SourceError> {
        let today = self.clock.today();

        match self.store.latest().await {
            Ok(Some(record)) if record.date == today => {
                debug!(%today, "Serving snapshot from store");
                let recent_start = today
                    .checked_sub_days(Days::new(RECENT_WINDOW_DAYS))
                    .unwrap_or(NaiveDate::MIN);
                let recent = match self.store.range(recent_start, today).await {
                    Ok(records) => ReconciledSeries::from_records(records).base_prices(),
                    Err(e) => {
                        warn!(error = %e, "Failed to read recent snapshots");
                        PriceSeries::default()
                    }
                };
                return Ok(MarketSnapshot {
                    record,
                    provenance: Provenance::Stored,
                    recent,
                });
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Snapshot store read failed, resolving live"),
        }

        self.live_snapshot(today).await
    }

    /// Drops every cached result and resolves today's snapshot from upstream,
    /// ignoring any stored record.
    pub async fn refresh_snapshot(&self) -> Result<MarketSnapshot, SourceError> {
        self.refresh();
        self.live_snapshot(self.clock.today()).await
    }

    /// Only snapshots priced from a primary source and a live rate are saved,
    /// so a stored record never hides a substitution.
    async fn live_snapshot(&self, today: NaiveDate) -> Result<MarketSnapshot, SourceError> {
        let cached_price = self.current_price().await;
        let from_cache = cached_price.from_cache;
        let price = cached_price.into_result()?;
        let Ok(rate) = self.rate().await.value;

        let record = ReconciledRecord::compute(
            today,
            price.price,
            rate.rate,
            self.config.premium_multiplier,
        )
        .map_err(|e| SourceError::InvalidRequest(format!("cannot price snapshot: {e}")))?;

        if rate.is_fallback {
            info!(rate = %rate.rate, "Snapshot priced with the fallback rate");
        }
        if rate.is_fallback || price.tier == SourceTier::Backup {
            debug!(%today, "Degraded snapshot, not saving");
        } else if let Err(e) = self.store.save(&record).await {
            warn!(error = %e, "Failed to save snapshot");
        }

        let recent = self
            .candidate(&price.symbol, price.tier)
            .and_then(|c| normalize_series(c, &price.raw_series).ok())
            .unwrap_or_default();

        Ok(MarketSnapshot {
            record,
            provenance: Provenance::Live {
                price_symbol: price.symbol,
                tier: price.tier,
                skipped: price.skipped.len(),
                rate_symbol: rate.symbol,
                rate_is_fallback: rate.is_fallback,
                from_cache,
            },
            recent,
        })
    }

    fn candidate(&self, symbol: &str, tier: SourceTier) -> Option<&SourceCandidate> {
        let list = match tier {
            SourceTier::Primary => &self.config.sources.primary,
            SourceTier::Backup => &self.config.sources.backup,
        };
        list.iter().find(|c| c.symbol == symbol)
    }

    /// Forces the next call of `operation` to recompute.
    pub fn invalidate(&self, operation: &str) -> usize {
        self.cache.invalidate(operation)
    }

    pub fn refresh(&self) {
        self.cache.invalidate_all();
    }

    /// Deletes stored snapshots older than `keep_days` days.
    pub async fn prune(&self, keep_days: u32) -> Result<usize> {
        let today = self.clock.today();
        let cutoff = today
            .checked_sub_days(Days::new(u64::from(keep_days)))
            .with_context(|| format!("Cannot keep {keep_days} days before {today}"))?;
        let removed = self.store.prune_before(cutoff).await?;
        info!(%cutoff, removed, "Pruned snapshots");
        Ok(removed)
    }
}
