//! Per-partition token buckets.
//!
//! Buckets are created on first use and refilled lazily from elapsed time on
//! each consumption attempt; there is no refill timer. State is
//! process-local and lost on restart.

use std::{collections::HashMap, sync::Arc, time::Instant};

use blackbox_core::Clock;
use tokio::sync::Mutex;
use tracing::debug;

/// Token bucket sizing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterConfig {
    /// Maximum tokens a bucket can hold.
    pub capacity: u32,
    /// Tokens added per elapsed second.
    pub refill_per_second: f64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self { capacity: 5, refill_per_second: 1.0 }
    }
}

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: u32,
    last_refill_at: Instant,
}

/// Rate limiter keyed by partition.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    config: LimiterConfig,
    buckets: Mutex<HashMap<String, TokenBucket>>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    /// Creates a limiter with no buckets.
    pub fn new(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, buckets: Mutex::new(HashMap::new()), clock }
    }

    /// Takes one token from `partition`, returning false if none is left.
    ///
    /// A new bucket starts full and gives up its first token immediately.
    /// The refill timestamp only moves when at least one whole token was
    /// added, so fractional progress is not lost between calls.
    pub async fn try_consume(&self, partition: &str) -> bool {
        let now = self.clock.now();
        let capacity = self.config.capacity;
        let mut buckets = self.buckets.lock().await;

        let Some(bucket) = buckets.get_mut(partition) else {
            if capacity == 0 {
                return false;
            }
            buckets.insert(
                partition.to_string(),
                TokenBucket { tokens: capacity - 1, last_refill_at: now },
            );
            return true;
        };

        let elapsed = now.saturating_duration_since(bucket.last_refill_at);
        let refill = (elapsed.as_secs_f64() * self.config.refill_per_second).floor();
        if refill >= 1.0 {
            let refill = if refill >= f64::from(capacity) { capacity } else { refill as u32 };
            bucket.tokens = bucket.tokens.saturating_add(refill).min(capacity);
            bucket.last_refill_at = now;
        }

        if bucket.tokens == 0 {
            debug!(partition, "token bucket empty");
            return false;
        }

        bucket.tokens -= 1;
        true
    }

    /// Tokens currently held by `partition`, without refilling.
    pub async fn available(&self, partition: &str) -> Option<u32> {
        self.buckets.lock().await.get(partition).map(|bucket| bucket.tokens)
    }

    /// Limiter configuration.
    pub fn config(&self) -> LimiterConfig {
        self.config
    }
}
