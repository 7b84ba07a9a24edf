//! Enrichment cache behavior with a counting source and a test clock.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use blackbox_core::TestClock;
use blackbox_enrichment::{
    partition::partition_key, Enrichment, EnrichmentCache, EnrichmentConfig, EnrichmentError,
    EnrichmentSource, LimiterConfig, SimulatedRegistry,
};
use serde_json::json;

#[derive(Default)]
struct CountingSource {
    calls: AtomicUsize,
}

impl CountingSource {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EnrichmentSource for CountingSource {
    fn lookup<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = blackbox_enrichment::Result<Enrichment>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(SimulatedRegistry::record_for(name)) })
    }
}

/// Counts lookups and takes a while to answer each one.
#[derive(Default)]
struct SlowSource {
    calls: AtomicUsize,
}

impl EnrichmentSource for SlowSource {
    fn lookup<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = blackbox_enrichment::Result<Enrichment>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(SimulatedRegistry::record_for(name))
        })
    }
}

struct FailingSource;

impl EnrichmentSource for FailingSource {
    fn lookup<'a>(
        &'a self,
        _name: &'a str,
    ) -> Pin<Box<dyn Future<Output = blackbox_enrichment::Result<Enrichment>> + Send + 'a>> {
        Box::pin(async { Err(EnrichmentError::lookup("registry returned 503")) })
    }
}

fn cache_with(
    config: EnrichmentConfig,
) -> (EnrichmentCache, Arc<CountingSource>, TestClock) {
    let source = Arc::new(CountingSource::default());
    let clock = TestClock::new();
    let cache = EnrichmentCache::new(config, source.clone(), Arc::new(clock.clone()));
    (cache, source, clock)
}

fn rate_limited() -> Enrichment {
    json!({"enriched": false, "reason": "rate_limited"}).as_object().cloned().expect("object")
}

#[tokio::test]
async fn second_call_within_ttl_is_served_from_cache() {
    let (cache, source, clock) = cache_with(EnrichmentConfig::default());

    let first = cache.enrich("Acme").await;
    clock.advance(Duration::from_secs(3_599));
    let second = cache.enrich("Acme").await;

    assert_eq!(
        serde_json::to_vec(&first).expect("serializes"),
        serde_json::to_vec(&second).expect("serializes")
    );
    assert_eq!(first["enriched"], true);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn cache_hits_do_not_spend_tokens() {
    let (cache, _source, _clock) = cache_with(EnrichmentConfig::default());
    let partition = partition_key("Acme", 10);

    cache.enrich("Acme").await;
    for _ in 0..20 {
        cache.enrich("Acme").await;
    }

    assert_eq!(cache.limiter().available(&partition).await, Some(4));
}

#[tokio::test]
async fn expired_entry_is_recomputed() {
    let (cache, source, clock) = cache_with(EnrichmentConfig::default());

    cache.enrich("Acme").await;
    clock.advance(Duration::from_secs(3_600));
    let refreshed = cache.enrich("Acme").await;

    assert_eq!(source.calls(), 2);
    assert_eq!(refreshed, SimulatedRegistry::record_for("Acme"));
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn empty_name_touches_nothing() {
    let (cache, source, _clock) = cache_with(EnrichmentConfig::default());

    let result = cache.enrich("").await;

    assert!(result.is_empty());
    assert_eq!(source.calls(), 0);
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn exhausted_partition_reports_rate_limited_without_caching() {
    let config = EnrichmentConfig {
        partitions: 1,
        limiter: LimiterConfig { capacity: 2, refill_per_second: 1.0 },
        ..EnrichmentConfig::default()
    };
    let (cache, source, clock) = cache_with(config);

    cache.enrich("Acme").await;
    cache.enrich("Globex").await;
    let limited = cache.enrich("Initech").await;

    assert_eq!(limited, rate_limited());
    assert!(cache.cached("Initech").await.is_none());
    assert_eq!(source.calls(), 2);

    // Cached subjects in the same partition are still served.
    assert_eq!(cache.enrich("Acme").await["enriched"], true);

    clock.advance(Duration::from_secs(1));
    assert_eq!(cache.enrich("Initech").await["enriched"], true);
    assert!(cache.cached("Initech").await.is_some());
}

#[tokio::test]
async fn failed_lookup_is_reported_and_not_cached() {
    let clock = TestClock::new();
    let cache = EnrichmentCache::new(
        EnrichmentConfig::default(),
        Arc::new(FailingSource),
        Arc::new(clock.clone()),
    );

    let result = cache.enrich("Acme").await;

    assert_eq!(result["enriched"], false);
    assert_eq!(result["reason"], "lookup_failed");
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn concurrent_callers_share_one_limiter() {
    let config = EnrichmentConfig {
        partitions: 1,
        limiter: LimiterConfig { capacity: 5, refill_per_second: 1.0 },
        ..EnrichmentConfig::default()
    };
    let (cache, _source, _clock) = cache_with(config);
    let cache = Arc::new(cache);

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.enrich(&format!("Company {i}")).await })
        })
        .collect();

    let mut enriched = 0;
    for handle in handles {
        if handle.await.expect("task completes")["enriched"] == true {
            enriched += 1;
        }
    }

    assert_eq!(enriched, 5);
}

#[tokio::test]
async fn concurrent_misses_on_one_name_share_a_lookup() {
    let source = Arc::new(SlowSource::default());
    let cache = Arc::new(EnrichmentCache::new(
        EnrichmentConfig::default(),
        source.clone(),
        Arc::new(TestClock::new()),
    ));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.enrich("Acme").await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.expect("task completes"), SimulatedRegistry::record_for("Acme"));
    }

    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.limiter().available(&partition_key("Acme", 10)).await, Some(4));
}
