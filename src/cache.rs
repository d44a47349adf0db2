//! TTL-bounded response cache keyed by query fingerprint.
//!
//! Expired entries are filtered on read and removed by `purge_expired`,
//! which the service runs periodically.
//! With `max_entries` set, the least recently used entry is evicted first.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::CacheConfig;
use crate::query::Fingerprint;
use crate::response::CanonicalResponse;

#[derive(Debug, Clone)]
struct CacheEntry {
    response: Arc<CanonicalResponse>,
    created_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.created_at) >= ttl
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub size: usize,
    pub max_entries: Option<usize>,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Fingerprint to response store.
#[derive(Debug)]
pub struct ResponseCache {
    enabled: bool,
    ttl: Duration,
    max_entries: Option<NonZeroUsize>,
    entries: Mutex<LruCache<Fingerprint, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Creates a cache. `max_entries` of `None` (or zero) leaves it unbounded.
    pub fn new(ttl: Duration, max_entries: Option<usize>) -> Self {
        let max_entries = max_entries.and_then(NonZeroUsize::new);
        let entries = match max_entries {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            enabled: true,
            ttl,
            max_entries,
            entries: Mutex::new(entries),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache from configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        let mut cache = Self::new(config.ttl(), config.max_entries);
        cache.enabled = config.enabled;
        cache
    }

    /// A cache that stores nothing.
    pub fn disabled() -> Self {
        let mut cache = Self::new(Duration::ZERO, Some(1));
        cache.enabled = false;
        cache
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns a live entry. Expired entries are removed, never returned.
    pub async fn get(&self, key: &Fingerprint) -> Option<Arc<CanonicalResponse>> {
        self.lookup(key, true).await
    }

    /// Same as [`get`](Self::get) without touching the hit/miss counters.
    pub(crate) async fn recheck(&self, key: &Fingerprint) -> Option<Arc<CanonicalResponse>> {
        self.lookup(key, false).await
    }

    async fn lookup(&self, key: &Fingerprint, record: bool) -> Option<Arc<CanonicalResponse>> {
        if !self.enabled {
            return None;
        }
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let live = entries
            .get(key)
            .map(|entry| (!entry.is_expired(self.ttl, now)).then(|| Arc::clone(&entry.response)));
        let hit = match live {
            Some(Some(response)) => Some(response),
            Some(None) => {
                entries.pop(key);
                debug!("Cache entry {} expired", key);
                None
            }
            None => None,
        };

        if record {
            match hit {
                Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
                None => self.misses.fetch_add(1, Ordering::Relaxed),
            };
        }
        hit
    }

    /// Stores a response. An existing entry for the key is replaced.
    pub async fn put(&self, key: Fingerprint, response: Arc<CanonicalResponse>) {
        if !self.enabled {
            return;
        }
        let entry = CacheEntry {
            response,
            created_at: Instant::now(),
        };
        let mut entries = self.entries.lock().await;
        if let Some((evicted, _)) = entries.push(key.clone(), entry) {
            if evicted != key {
                debug!("Cache full, evicted {}", evicted);
            }
        }
    }

    /// Removes every expired entry, returning how many went.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let expired: Vec<Fingerprint> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    /// Drops every entry, returning how many there were.
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let count = entries.len();
        entries.clear();
        count
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.enabled,
            size: self.len().await,
            max_entries: self.max_entries.map(NonZeroUsize::get),
            ttl_secs: self.ttl.as_secs(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
