//! Provider implementations.

mod scrape;
mod searxng;

pub use scrape::{build_fetcher, ScrapeProvider};
pub use searxng::Searxng;
