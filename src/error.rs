//! Error types for the search pipeline.

use std::time::Duration;

use thiserror::Error;

use crate::ProviderKind;

/// Result type alias for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Result type alias for a single provider fetch.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Failures local to one provider.
///
/// These never cross the library boundary on their own: the orchestrator
/// recovers from them by falling back to the next provider, and only reports
/// them when every provider has failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Meta-search backend unreachable, non-success status, or empty/malformed payload.
    #[error("Aggregator unavailable: {0}")]
    AggregatorUnavailable(String),

    /// Scrape target served a block or challenge page.
    #[error("Scrape target blocked the request: {0}")]
    Blocked(String),

    /// Page loaded but no selector strategy extracted a valid result.
    #[error("No selector strategy matched ({tried} tried)")]
    NoSelectorMatched { tried: usize },

    /// Provider exceeded its latency budget.
    #[error("{provider} provider timed out after {}ms", .after.as_millis())]
    Timeout { provider: ProviderKind, after: Duration },

    /// Browser session could not be opened or driven.
    #[error("Browser session failed: {0}")]
    Browser(String),
}

impl ProviderError {
    /// Whether this failure points at a structural drift that needs a
    /// selector-chain update rather than waiting it out.
    pub fn needs_maintenance(&self) -> bool {
        matches!(self, Self::NoSelectorMatched { .. })
    }
}

/// Errors that can occur during search operations.
#[derive(Error, Debug)]
pub enum SearchError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Credential exhausted its quota for the current window.
    #[error("Quota exceeded, retry after {}s", .retry_after.as_secs())]
    QuotaExceeded { retry_after: Duration },

    /// Primary and fallback provider both failed for this request.
    #[error("All providers failed (primary: {primary}; fallback: {fallback})")]
    BothProvidersFailed {
        primary: ProviderError,
        fallback: ProviderError,
    },

    /// Invalid query.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// URL parsing error.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Browser automation error.
    #[error("Browser error: {0}")]
    Browser(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}
