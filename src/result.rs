//! Provider-native result types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which upstream produced a batch of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Meta-search backend queried over its JSON API.
    Aggregator,
    /// Headless scrape of a public search engine.
    Scrape,
}

impl ProviderKind {
    /// Returns the lowercase identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggregator => "aggregator",
            Self::Scrape => "scrape",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single result as the provider reported it.
///
/// Nothing here is validated yet; the mapper decides what survives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    /// Result URL, possibly relative or wrapped in a redirect.
    pub url: String,
    /// Result title.
    pub title: String,
    /// Result description/snippet.
    pub snippet: String,
    /// 1-based position in the upstream ordering.
    pub position: Option<u32>,
    /// URL as the upstream displayed it.
    pub displayed_url: Option<String>,
    /// Engines that contributed this result (aggregator only).
    pub engines: Vec<String>,
}

impl RawResult {
    /// Creates a new raw result.
    pub fn new(url: impl Into<String>, title: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: snippet.into(),
            position: None,
            displayed_url: None,
            engines: Vec::new(),
        }
    }

    /// Sets the upstream position.
    pub fn with_position(mut self, position: u32) -> Self {
        self.position = Some(position);
        self
    }

    /// Sets the displayed URL.
    pub fn with_displayed_url(mut self, displayed_url: impl Into<String>) -> Self {
        self.displayed_url = Some(displayed_url.into());
        self
    }

    /// Adds a contributing engine.
    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engines.push(engine.into());
        self
    }
}

/// Ordered results from one successful provider fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderBatch {
    /// Provider that produced the batch.
    pub kind: ProviderKind,
    /// Results in upstream order.
    pub results: Vec<RawResult>,
    /// Upstream's own total-result estimate, when it reports one.
    pub estimated_total: Option<u64>,
}

impl ProviderBatch {
    /// Creates a batch without a total estimate.
    pub fn new(kind: ProviderKind, results: Vec<RawResult>) -> Self {
        Self {
            kind,
            results,
            estimated_total: None,
        }
    }

    /// Sets the upstream total estimate. Zero is treated as "unknown".
    pub fn with_estimated_total(mut self, total: u64) -> Self {
        self.estimated_total = (total > 0).then_some(total);
        self
    }

    /// Total estimate, falling back to a page-size heuristic.
    pub fn total_estimate(&self) -> u64 {
        self.estimated_total
            .unwrap_or(self.results.len() as u64 * 100)
    }
}
