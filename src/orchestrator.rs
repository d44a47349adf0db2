//! Request orchestration.
//!
//! Each request runs `RateCheck -> CacheCheck -> Aggregator -> Scrape (on
//! failure) -> Map -> CacheStore`. Only a successful live fetch populates the
//! cache; quota rejections and total provider failure never do.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::artifacts::{ArtifactSink, FsArtifactSink, NoopArtifactSink};
use crate::cache::ResponseCache;
use crate::config::{QueryLimits, ServiceConfig};
use crate::fetcher::PageFetcher;
use crate::mapper;
use crate::provider::Provider;
use crate::providers::{build_fetcher, ScrapeProvider, Searxng};
use crate::rate_limit::{InMemoryRateLimiter, RateDecision, RateLimiter, UnlimitedRateLimiter};
use crate::response::{CanonicalItem, CanonicalResponse};
use crate::{Fingerprint, ProviderError, ProviderKind, ProviderResult, Result, SearchError, SearchQuery};

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
    Cache,
    Aggregator,
    Scrape,
}

impl ServedFrom {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Aggregator => "aggregator",
            Self::Scrape => "scrape",
        }
    }
}

impl From<ProviderKind> for ServedFrom {
    fn from(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Aggregator => Self::Aggregator,
            ProviderKind::Scrape => Self::Scrape,
        }
    }
}

impl fmt::Display for ServedFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successfully answered request.
#[derive(Debug, Clone)]
pub struct Served {
    pub response: Arc<CanonicalResponse>,
    pub source: ServedFrom,
}

impl Served {
    /// A cache hit, echoing the current request's pass-through parameters.
    fn cached(response: Arc<CanonicalResponse>, query: &SearchQuery) -> Self {
        let response = if response.echoes(query) {
            response
        } else {
            Arc::new(response.echoing(query))
        };
        Self {
            response,
            source: ServedFrom::Cache,
        }
    }
}

/// Per-fingerprint gates so concurrent misses for one key fetch once.
#[derive(Debug, Default)]
struct Inflight {
    gates: StdMutex<HashMap<Fingerprint, Arc<Mutex<()>>>>,
}

impl Inflight {
    fn join(self: &Arc<Self>, key: &Fingerprint) -> FlightTicket {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        let gate = Arc::clone(gates.entry(key.clone()).or_default());
        FlightTicket {
            inflight: Arc::clone(self),
            key: key.clone(),
            gate,
        }
    }

    fn len(&self) -> usize {
        self.gates.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Membership in one fingerprint's flight. The gate entry is removed when
/// the last member leaves, including on cancellation.
struct FlightTicket {
    inflight: Arc<Inflight>,
    key: Fingerprint,
    gate: Arc<Mutex<()>>,
}

impl Drop for FlightTicket {
    fn drop(&mut self) {
        let mut gates = self.inflight.gates.lock().unwrap_or_else(|e| e.into_inner());
        // The map holds one reference and this ticket the other.
        if Arc::strong_count(&self.gate) <= 2 {
            gates.remove(&self.key);
        }
    }
}

/// Composes the rate limiter, cache and both providers.
pub struct Orchestrator {
    primary: Arc<dyn Provider>,
    fallback: Arc<dyn Provider>,
    limiter: Arc<dyn RateLimiter>,
    cache: Arc<ResponseCache>,
    limits: QueryLimits,
    single_flight: bool,
    inflight: Arc<Inflight>,
    fetcher: Option<Arc<dyn PageFetcher>>,
}

impl Orchestrator {
    /// Creates an orchestrator with the default cache and quota.
    pub fn new(primary: Arc<dyn Provider>, fallback: Arc<dyn Provider>) -> Self {
        let defaults = ServiceConfig::default();
        Self {
            primary,
            fallback,
            limiter: Arc::new(InMemoryRateLimiter::new(
                defaults.rate_limit.quota,
                defaults.rate_limit.window(),
                defaults.rate_limit.mode,
            )),
            cache: Arc::new(ResponseCache::from_config(&defaults.cache)),
            limits: defaults.limits,
            single_flight: defaults.cache.single_flight,
            inflight: Arc::new(Inflight::default()),
            fetcher: None,
        }
    }

    /// Wires SearXNG, the scrape provider and the configured limiter.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let primary = Arc::new(Searxng::new(&config.aggregator)?);

        let fetcher = build_fetcher(&config.scrape)?;
        let sink: Arc<dyn ArtifactSink> = match &config.scrape.debug_dir {
            Some(dir) => Arc::new(FsArtifactSink::new(dir)),
            None => Arc::new(NoopArtifactSink),
        };
        let fallback = Arc::new(
            ScrapeProvider::new(&config.scrape, Arc::clone(&fetcher))?.with_artifact_sink(sink),
        );

        let limiter: Arc<dyn RateLimiter> = if config.rate_limit.enabled {
            Arc::new(InMemoryRateLimiter::new(
                config.rate_limit.quota,
                config.rate_limit.window(),
                config.rate_limit.mode,
            ))
        } else {
            Arc::new(UnlimitedRateLimiter)
        };

        info!(
            "Orchestrator ready: aggregator {}, scrape {} ({:?} renderer)",
            config.aggregator.base_url, config.scrape.base_url, config.scrape.renderer
        );

        let mut orchestrator = Self::new(primary, fallback)
            .with_rate_limiter(limiter)
            .with_cache(Arc::new(ResponseCache::from_config(&config.cache)))
            .with_limits(config.limits)
            .with_single_flight(config.cache.single_flight);
        orchestrator.fetcher = Some(fetcher);
        Ok(orchestrator)
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_limits(mut self, limits: QueryLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    pub fn limits(&self) -> QueryLimits {
        self.limits
    }

    /// Answers one request on behalf of `credential`.
    pub async fn search(&self, credential: &str, query: SearchQuery) -> Result<Served> {
        let started = Instant::now();
        let query = query.normalize(&self.limits)?;

        if let RateDecision::QuotaExceeded { retry_after } =
            self.limiter.check_and_charge(credential).await
        {
            info!("Quota exceeded for credential '{}'", credential);
            return Err(SearchError::QuotaExceeded { retry_after });
        }

        let key = query.fingerprint();
        if let Some(response) = self.cache.get(&key).await {
            debug!("Cache hit for '{}' ({})", query.text, key);
            return Ok(Served::cached(response, &query));
        }

        if !self.single_flight {
            return self.fetch_live(&query, key, started).await;
        }

        let ticket = self.inflight.join(&key);
        let _turn = ticket.gate.lock().await;
        if let Some(response) = self.cache.recheck(&key).await {
            debug!("Cache filled while waiting for '{}'", query.text);
            return Ok(Served::cached(response, &query));
        }
        self.fetch_live(&query, key, started).await
    }

    async fn fetch_live(&self, query: &SearchQuery, key: Fingerprint, started: Instant) -> Result<Served> {
        debug!("Cache miss for '{}', querying {}", query.text, self.primary.name());

        let (source, items, total) = match self.attempt(self.primary.as_ref(), query).await {
            Ok((items, total)) => (self.primary.kind(), items, total),
            Err(primary) => {
                warn!(
                    "{} failed for '{}': {}; falling back to {}",
                    self.primary.name(),
                    query.text,
                    primary,
                    self.fallback.name()
                );
                match self.attempt(self.fallback.as_ref(), query).await {
                    Ok((items, total)) => (self.fallback.kind(), items, total),
                    Err(fallback) => {
                        if fallback.needs_maintenance() {
                            warn!("Selector chain no longer matches {}", self.fallback.name());
                        }
                        warn!("All providers failed for '{}'", query.text);
                        return Err(SearchError::BothProvidersFailed { primary, fallback });
                    }
                }
            }
        };

        let response = Arc::new(CanonicalResponse::build(
            query,
            items,
            total,
            started.elapsed(),
            self.limits.max_start,
        ));
        self.cache.put(key, Arc::clone(&response)).await;

        info!(
            "Served '{}' from {} ({} items)",
            query.text,
            source,
            response.items.len()
        );
        Ok(Served {
            response,
            source: source.into(),
        })
    }

    /// One bounded provider call, mapped and truncated.
    async fn attempt(
        &self,
        provider: &dyn Provider,
        query: &SearchQuery,
    ) -> ProviderResult<(Vec<CanonicalItem>, u64)> {
        let budget = provider.timeout();
        let batch = match timeout(budget, provider.fetch(query)).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(ProviderError::Timeout {
                    provider: provider.kind(),
                    after: budget,
                })
            }
        };

        let total = batch.total_estimate();
        let mut items = mapper::map(batch.kind, batch.results);
        items.truncate(query.num as usize);
        if items.is_empty() {
            return Err(match provider.kind() {
                ProviderKind::Aggregator => {
                    ProviderError::AggregatorUnavailable("no usable results after mapping".into())
                }
                ProviderKind::Scrape => ProviderError::NoSelectorMatched { tried: 0 },
            });
        }
        Ok((items, total))
    }

    /// Closes the browser (if one was launched).
    pub async fn shutdown(&self) {
        if let Some(fetcher) = &self.fetcher {
            fetcher.shutdown().await;
        }
    }

    /// Spawns a task that, every `interval`, purges expired cache entries and
    /// drops idle rate-limit bookkeeping. It exits once the orchestrator is
    /// dropped.
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let orchestrator: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(orchestrator) = orchestrator.upgrade() else {
                    break;
                };
                let purged = orchestrator.cache.purge_expired().await;
                let pruned = orchestrator.limiter.prune_idle().await;
                if purged > 0 || pruned > 0 {
                    debug!(
                        "Maintenance removed {} cache entries and {} idle credentials",
                        purged, pruned
                    );
                }
            }
        })
    }

    /// Gates currently held for in-flight fingerprints.
    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.name())
            .field("limits", &self.limits)
            .field("single_flight", &self.single_flight)
            .finish()
    }
}
