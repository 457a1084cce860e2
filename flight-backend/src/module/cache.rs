//! Best-effort flight cache
//!
//! The cache is optional: every operation reports an explicit outcome and
//! callers branch on it. An unavailable cache changes latency, never answers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use flight_common::{FlightQueryKey, FlightRecord};
use tracing::{debug, warn};

/// Reason reported by [`DisabledCache`]
pub const CACHE_DISABLED: &str = "cache disabled";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(String),
    Miss,
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheWrite {
    Stored,
    Unavailable(String),
}

/// Key-value cache with per-entry TTL and key-level set semantics.
#[async_trait]
pub trait FlightCache: Send + Sync {
    async fn try_get(&self, key: &str) -> CacheLookup;

    async fn try_set(&self, key: &str, value: &str, ttl: Duration) -> CacheWrite;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-process TTL cache
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, expired ones included until purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Purge expired entries every `interval` in the background.
    pub fn start_purge_task(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let purged = self.purge_expired();
                if purged > 0 {
                    debug!("Purged {} expired cache entries", purged);
                }
            }
        })
    }
}

#[async_trait]
impl FlightCache for InMemoryCache {
    async fn try_get(&self, key: &str) -> CacheLookup {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return CacheLookup::Hit(entry.value.clone());
            }
        }

        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        CacheLookup::Miss
    }

    async fn try_set(&self, key: &str, value: &str, ttl: Duration) -> CacheWrite {
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            return CacheWrite::Unavailable(format!("ttl {:?} out of range", ttl));
        };

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        CacheWrite::Stored
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

/// Cache that is never there
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCache;

#[async_trait]
impl FlightCache for DisabledCache {
    async fn try_get(&self, _key: &str) -> CacheLookup {
        CacheLookup::Unavailable(CACHE_DISABLED.to_string())
    }

    async fn try_set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheWrite {
        CacheWrite::Unavailable(CACHE_DISABLED.to_string())
    }

    fn backend_name(&self) -> &'static str {
        "Disabled"
    }
}

fn log_unavailable(action: &str, key: &str, reason: &str) {
    if reason == CACHE_DISABLED {
        debug!("Skipping cache {} for {}: {}", action, key, reason);
    } else {
        warn!("Cache unavailable for {} of {}, proceeding without cache: {}", action, key, reason);
    }
}

/// Read the cached record for `key`; unreadable entries count as a miss.
pub async fn cached_record(cache: &dyn FlightCache, key: &FlightQueryKey) -> Option<FlightRecord> {
    let cache_key = key.cache_key();

    match cache.try_get(&cache_key).await {
        CacheLookup::Hit(json) => match serde_json::from_str::<FlightRecord>(&json) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Discarding unreadable cache entry {}: {}", cache_key, e);
                None
            }
        },
        CacheLookup::Miss => None,
        CacheLookup::Unavailable(reason) => {
            log_unavailable("read", &cache_key, &reason);
            None
        }
    }
}

/// Write `record` through to the cache. Failures are logged, never returned.
pub async fn cache_record(cache: &dyn FlightCache, record: &FlightRecord, ttl: Duration) -> bool {
    let cache_key = record.key().cache_key();

    let json = match serde_json::to_string(record) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize {} for caching: {}", cache_key, e);
            return false;
        }
    };

    match cache.try_set(&cache_key, &json, ttl).await {
        CacheWrite::Stored => {
            debug!("Cached {} for {:?}", cache_key, ttl);
            true
        }
        CacheWrite::Unavailable(reason) => {
            log_unavailable("write", &cache_key, &reason);
            false
        }
    }
}
