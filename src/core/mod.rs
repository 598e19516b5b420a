//! Core business logic: fetching, source selection, reconciliation and caching

pub mod analytics;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod history;
pub mod log;
pub mod market;
pub mod quote;
pub mod rate;
pub mod selector;
pub mod source;

// Re-export main types for cleaner imports
pub use error::{FetchError, SourceError};
pub use market::{MarketService, MarketSnapshot, Provenance};
pub use source::QuoteSource;
