//! Typed failures for price acquisition.
//!
//! [`FetchError`] describes why a single upstream attempt failed and whether it
//! is worth retrying. [`SourceError`] is what the selector and the history
//! builder hand back once retries and fallbacks are used up.

use std::fmt;
use thiserror::Error;

/// Failure of one upstream request for one symbol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection, timeout or body read failure.
    #[error("network error: {0}")]
    Network(String),

    /// Upstream throttled the request (HTTP 429).
    #[error("rate limited by upstream")]
    RateLimited,

    /// Any other non-success status.
    #[error("upstream returned HTTP {0}")]
    Http(u16),

    /// The request succeeded but carried no usable rows.
    #[error("empty payload")]
    EmptyPayload,

    /// The payload could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Upstream does not know the symbol.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// The request itself was invalid and was never sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// Whether waiting and asking again may give a different answer.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_)
            | FetchError::RateLimited
            | FetchError::EmptyPayload
            | FetchError::Malformed(_) => true,
            FetchError::Http(status) => *status >= 500 || *status == 408,
            FetchError::UnknownSymbol(_) | FetchError::InvalidRequest(_) => false,
        }
    }
}

/// Which side of the reconciliation a series belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesSide {
    Asset,
    Rate,
}

impl fmt::Display for SeriesSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesSide::Asset => write!(f, "asset"),
            SeriesSide::Rate => write!(f, "rate"),
        }
    }
}

/// A candidate symbol and the reason it was given up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFailure {
    pub symbol: String,
    pub error: FetchError,
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.symbol, self.error)
    }
}

/// Outcome of an operation that could not produce any data.
///
/// These are results, not aborts: the caller is expected to render a degraded
/// state from them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Every primary and backup candidate failed.
    #[error("all sources exhausted")]
    SourceExhausted { failures: Vec<CandidateFailure> },

    /// One whole side of a historical join is unavailable.
    #[error("incomplete source data: {side} series unavailable ({cause})")]
    IncompleteHistory { side: SeriesSide, cause: FetchError },

    /// The request was rejected before any source was consulted.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
