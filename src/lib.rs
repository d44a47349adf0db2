//! # a3s-cse
//!
//! A Custom Search JSON API compatible endpoint. Results come from a SearXNG
//! instance first and, when that fails, from a scrape of a public search
//! engine's results page, and are returned in the Custom Search response
//! shape.
//!
//! The pipeline is:
//!
//! - Per-credential quota check ([`rate_limit`])
//! - Fingerprint-keyed response cache with a TTL ([`cache`])
//! - Aggregator provider, then scrape provider on failure ([`providers`])
//! - Mapping raw results into canonical items ([`mapper`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use a3s_cse::{Orchestrator, SearchQuery, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServiceConfig::load(None)?;
//!     let orchestrator = Orchestrator::from_config(&config)?;
//!
//!     let served = orchestrator
//!         .search("anonymous", SearchQuery::new("rust programming"))
//!         .await?;
//!     for item in &served.response.items {
//!         println!("{}: {}", item.title, item.link);
//!     }
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```

mod error;
mod query;
mod result;

pub mod artifacts;
pub mod block;
#[cfg(feature = "headless")]
pub mod browser;
#[cfg(feature = "headless")]
pub mod browser_setup;
pub mod cache;
pub mod config;
pub mod fetcher;
pub mod fetcher_http;
pub mod fingerprint;
pub mod mapper;
pub mod orchestrator;
pub mod provider;
pub mod providers;
pub mod rate_limit;
pub mod response;
pub mod selector;
pub mod server;

pub use config::ServiceConfig;
pub use error::{ProviderError, ProviderResult, Result, SearchError};
pub use orchestrator::{Orchestrator, Served, ServedFrom};
pub use provider::Provider;
pub use query::{Fingerprint, SafeSearch, SearchQuery, TimeRange};
pub use response::{CanonicalItem, CanonicalResponse};
pub use result::{ProviderBatch, ProviderKind, RawResult};
