//! Service configuration.
//!
//! Every field has a default, so an empty TOML file (or none at all) yields a
//! working local setup: SearXNG on `localhost:8080` as the aggregator and the
//! DuckDuckGo HTML endpoint as the scrape target.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::block;
use crate::fingerprint::RotationStrategy;
use crate::rate_limit::WindowMode;
use crate::selector::{self, SelectorChain, SelectorStrategy};
use crate::{Result, SearchError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub limits: QueryLimits,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub aggregator: AggregatorConfig,
    pub scrape: ScrapeConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8765".to_string(),
        }
    }
}

/// API key checking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Reject requests whose key is not listed.
    pub enabled: bool,
    /// Known credentials.
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    /// Returns whether a request carrying `key` may proceed.
    pub fn accepts(&self, key: Option<&str>) -> bool {
        if !self.enabled {
            return true;
        }
        key.is_some_and(|k| self.api_keys.iter().any(|known| known == k))
    }
}

/// Bounds applied to `num` and `start` before any provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLimits {
    /// Maximum results per request.
    pub max_results: u32,
    /// Maximum 1-based start index.
    pub max_start: u32,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_results: 10,
            max_start: 91,
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether responses are cached at all.
    pub enabled: bool,
    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
    /// LRU bound. `None` leaves the cache unbounded.
    pub max_entries: Option<usize>,
    /// Interval between proactive expiry sweeps.
    pub sweep_interval_secs: u64,
    /// Coalesce concurrent misses for the same fingerprint.
    pub single_flight: bool,
}

impl CacheConfig {
    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 7 * 24 * 60 * 60,
            max_entries: Some(1000),
            sweep_interval_secs: 300,
            single_flight: true,
        }
    }
}

/// Per-credential quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Whether quotas are enforced.
    pub enabled: bool,
    /// Requests allowed per window.
    pub quota: u32,
    /// Window length in seconds.
    pub window_secs: u64,
    /// Rolling or fixed window.
    pub mode: WindowMode,
}

impl RateLimitConfig {
    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            quota: 100,
            window_secs: 3600,
            mode: WindowMode::Rolling,
        }
    }
}

/// Meta-search backend (SearXNG) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Base URL of the SearXNG instance.
    pub base_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Results per upstream page, used to translate `start` into `pageno`.
    pub page_size: u32,
    /// Restrict the backend to these engines. Empty means its defaults.
    pub engines: Vec<String>,
}

impl AggregatorConfig {
    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: 15,
            page_size: 10,
            engines: Vec::new(),
        }
    }
}

/// How the scrape provider loads pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Renderer {
    /// Headless Chrome over CDP.
    Browser,
    /// Plain HTTP GET.
    Http,
}

impl Default for Renderer {
    fn default() -> Self {
        if cfg!(feature = "headless") {
            Self::Browser
        } else {
            Self::Http
        }
    }
}

/// Scrape provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Results page of the scraped engine.
    pub base_url: String,
    /// Upper bound on navigation, rendering and extraction, in seconds.
    pub timeout_secs: u64,
    /// Ordered extraction strategies.
    pub strategies: Vec<SelectorStrategy>,
    /// Case-insensitive markers of block/challenge pages.
    pub block_markers: Vec<String>,
    /// Upper bound of the random delay before navigation, in milliseconds.
    pub jitter_ms: u64,
    /// How client fingerprints are picked.
    pub rotation: RotationStrategy,
    /// Page loading backend.
    pub renderer: Renderer,
    /// Concurrent browser tabs.
    pub max_tabs: usize,
    /// Chrome executable. Auto-detected when unset.
    pub chrome_path: Option<String>,
    /// Selector awaited after navigation before reading the page.
    pub wait_selector: Option<String>,
    /// How long to wait for `wait_selector`, in milliseconds.
    pub wait_timeout_ms: u64,
    /// Where debug artifacts go. `None` disables capture.
    pub debug_dir: Option<PathBuf>,
}

impl ScrapeConfig {
    /// Upper bound on one scrape attempt.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://html.duckduckgo.com/html/".to_string(),
            timeout_secs: 30,
            strategies: selector::default_strategies(),
            block_markers: block::default_markers(),
            jitter_ms: 250,
            rotation: RotationStrategy::default(),
            renderer: Renderer::default(),
            max_tabs: 4,
            chrome_path: None,
            wait_selector: Some("div.result, article[data-testid='result']".to_string()),
            wait_timeout_ms: 10_000,
            debug_dir: Some(PathBuf::from("logs")),
        }
    }
}

impl ServiceConfig {
    /// Loads configuration from an optional TOML file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        debug!("Loaded config from {}", path.display());
        Self::from_toml(&content)
    }

    /// Parses TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SearchError::Config(e.to_string()))
    }

    /// Applies overrides from a key lookup (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SEARXNG_URL") {
            self.aggregator.base_url = url;
        }
        if let Some(keys) = lookup("CSE_API_KEYS") {
            self.auth.api_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
            self.auth.enabled = !self.auth.api_keys.is_empty();
        }
        if let Some(ttl) = parse_override(&lookup, "CSE_CACHE_TTL")? {
            self.cache.ttl_secs = ttl;
        }
        if let Some(calls) = parse_override(&lookup, "CSE_RATE_LIMIT_CALLS")? {
            self.rate_limit.quota = calls;
        }
        if let Some(period) = parse_override(&lookup, "CSE_RATE_LIMIT_PERIOD")? {
            self.rate_limit.window_secs = period;
        }
        if let Some(dir) = lookup("CSE_DEBUG_DIR") {
            self.scrape.debug_dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }
        Ok(())
    }

    /// Checks ranges, URLs and that every selector compiles.
    pub fn validate(&self) -> Result<()> {
        if self.limits.max_results == 0 || self.limits.max_start == 0 {
            return Err(SearchError::Config("limits must be positive".into()));
        }
        if self.cache.ttl_secs == 0 {
            return Err(SearchError::Config("cache.ttl_secs must be positive".into()));
        }
        if self.cache.max_entries == Some(0) {
            return Err(SearchError::Config("cache.max_entries must be positive".into()));
        }
        if self.rate_limit.enabled && (self.rate_limit.quota == 0 || self.rate_limit.window_secs == 0) {
            return Err(SearchError::Config(
                "rate_limit.quota and rate_limit.window_secs must be positive".into(),
            ));
        }
        if self.aggregator.timeout_secs == 0 || self.scrape.timeout_secs == 0 {
            return Err(SearchError::Config("provider timeouts must be positive".into()));
        }
        if self.aggregator.page_size == 0 {
            return Err(SearchError::Config("aggregator.page_size must be positive".into()));
        }
        url::Url::parse(&self.aggregator.base_url)?;
        url::Url::parse(&self.scrape.base_url)?;
        SelectorChain::compile(&self.scrape.strategies)?;
        Ok(())
    }
}

fn parse_override<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SearchError::Config(format!("{key} must be a number, got '{raw}'"))),
        None => Ok(None),
    }
}
