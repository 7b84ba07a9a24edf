//! TTL cache in front of an enrichment source.
//!
//! A fresh entry is returned as is, with no limiter interaction. A stale
//! entry is evicted on lookup. Misses spend a token from the subject's
//! partition before consulting the source; only successful lookups are
//! cached. Misses on the same name are serialized, so concurrent callers
//! share one lookup and one token.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use blackbox_core::Clock;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    limiter::{LimiterConfig, TokenBucketLimiter},
    partition::partition_key,
    source::{Enrichment, EnrichmentSource},
};

/// Cache and limiter settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnrichmentConfig {
    /// How long a computed result stays fresh.
    pub ttl: Duration,
    /// Number of limiter partitions subjects hash into.
    pub partitions: u64,
    /// Per-partition token bucket sizing.
    pub limiter: LimiterConfig,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(crate::DEFAULT_TTL_SECONDS),
            partitions: crate::DEFAULT_PARTITIONS,
            limiter: LimiterConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Enrichment,
    computed_at: Instant,
}

/// Rate-limited, TTL-cached enrichment lookups.
pub struct EnrichmentCache {
    config: EnrichmentConfig,
    entries: Mutex<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    limiter: TokenBucketLimiter,
    source: Arc<dyn EnrichmentSource>,
    clock: Arc<dyn Clock>,
}

impl EnrichmentCache {
    /// Creates an empty cache over `source`.
    pub fn new(
        config: EnrichmentConfig,
        source: Arc<dyn EnrichmentSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            limiter: TokenBucketLimiter::new(config.limiter, clock.clone()),
            source,
            clock,
        }
    }

    /// Enriches `name`.
    ///
    /// An empty name yields an empty map. When the partition is out of
    /// tokens the result is `{"enriched": false, "reason": "rate_limited"}`,
    /// which is not an error and is not cached.
    pub async fn enrich(&self, name: &str) -> Enrichment {
        if name.is_empty() {
            return Enrichment::new();
        }

        if let Some(value) = self.fresh_entry(name).await {
            debug!(name, "enrichment cache hit");
            return value;
        }

        let name_lock = self.name_lock(name).await;
        let value = {
            let _miss = name_lock.lock().await;
            self.fill(name).await
        };
        self.release_name_lock(name, &name_lock).await;

        value
    }

    async fn fill(&self, name: &str) -> Enrichment {
        // Another caller may have filled the entry while this one waited.
        if let Some(value) = self.fresh_entry(name).await {
            debug!(name, "enrichment filled by concurrent caller");
            return value;
        }

        let partition = partition_key(name, self.config.partitions);
        if !self.limiter.try_consume(&partition).await {
            debug!(name, partition = %partition, "enrichment rate limited");
            return unenriched("rate_limited");
        }

        match self.source.lookup(name).await {
            Ok(value) => {
                let entry = CacheEntry { value: value.clone(), computed_at: self.clock.now() };
                self.entries.lock().await.insert(name.to_string(), entry);
                value
            },
            Err(error) => {
                warn!(name, error = %error, "enrichment lookup failed");
                unenriched("lookup_failed")
            },
        }
    }

    async fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.in_flight.lock().await.entry(name.to_string()).or_default().clone()
    }

    async fn release_name_lock(&self, name: &str, name_lock: &Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().await;
        // Only the map and this caller hold it: nobody is waiting.
        if Arc::strong_count(name_lock) == 2 {
            in_flight.remove(name);
        }
    }

    /// Cached value for `name`, fresh or not.
    pub async fn cached(&self, name: &str) -> Option<Enrichment> {
        self.entries.lock().await.get(name).map(|entry| entry.value.clone())
    }

    /// Number of cached entries, including stale ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Returns true if nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// The limiter guarding the source.
    pub fn limiter(&self) -> &TokenBucketLimiter {
        &self.limiter
    }

    async fn fresh_entry(&self, name: &str) -> Option<Enrichment> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;

        let entry = entries.get(name)?;
        if now.saturating_duration_since(entry.computed_at) < self.config.ttl {
            return Some(entry.value.clone());
        }

        entries.remove(name);
        debug!(name, "stale enrichment evicted");
        None
    }
}

fn unenriched(reason: &str) -> Enrichment {
    let mut result = Enrichment::new();
    result.insert("enriched".to_string(), json!(false));
    result.insert("reason".to_string(), json!(reason));
    result
}
