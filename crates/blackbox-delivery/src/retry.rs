//! Backoff policies for the two retry layers.
//!
//! The dispatcher retries a single delivery a few times in-process with a
//! linear backoff of `base * attempt`. The drainer retries across sweep
//! cycles with `base * 2^attempts`, persisted on the record, and falls back
//! to a fixed delay when processing a record fails unexpectedly. The three
//! are independent `RetryPolicy` values.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempt count at which the work is abandoned.
    pub max_attempts: u32,

    /// Base delay fed into the backoff strategy.
    pub base_delay: Duration,

    /// Upper bound for any computed delay.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0); zero keeps delays exact.
    pub jitter_factor: f64,

    /// Strategy for calculating backoff delays.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        drain_policy(crate::DEFAULT_MAX_ATTEMPTS)
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Same delay after every attempt.
    Fixed,
    /// `base * attempt`.
    Linear,
    /// `base * 2^attempt`.
    Exponential,
}

impl RetryPolicy {
    /// Delay to wait after the given attempt (1-based) failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = match self.backoff_strategy {
            BackoffStrategy::Fixed => Some(self.base_delay),
            BackoffStrategy::Linear => self.base_delay.checked_mul(attempt),
            BackoffStrategy::Exponential => {
                let multiplier = 2_u32.saturating_pow(attempt.min(30));
                self.base_delay.checked_mul(multiplier)
            },
        };

        let capped = raw.map_or(self.max_delay, |delay| delay.min(self.max_delay));
        apply_jitter(capped, self.jitter_factor).min(self.max_delay)
    }

    /// Returns true once `attempts` has reached the cap.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Retry decision context for a failed drain cycle.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt count after counting the failure that just happened.
    pub attempts: u32,
    /// Timestamp of the failed attempt.
    pub failed_at: DateTime<Utc>,
    /// Retry policy to apply.
    pub policy: RetryPolicy,
}

/// Result of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Keep the record live and try again at the given time.
    Retry {
        /// When the next delivery attempt should be made
        next_attempt_at: DateTime<Utc>,
    },
    /// Dead-letter the record.
    GiveUp {
        /// Reason why the delivery should not be retried
        reason: String,
    },
}

impl RetryContext {
    /// Creates a new retry context.
    pub fn new(attempts: u32, failed_at: DateTime<Utc>, policy: RetryPolicy) -> Self {
        Self { attempts, failed_at, policy }
    }

    /// Decides whether to reschedule or dead-letter.
    ///
    /// The cap check runs on the already incremented count, so a record at
    /// `max_attempts - 1` that fails again is given up on.
    pub fn decide_retry(&self) -> RetryDecision {
        if self.policy.is_exhausted(self.attempts) {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) reached", self.policy.max_attempts),
            };
        }

        let delay = self.policy.delay_for(self.attempts);
        let Ok(chrono_delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::GiveUp {
                reason: "retry delay duration out of range".to_string(),
            };
        };

        RetryDecision::Retry { next_attempt_at: self.failed_at + chrono_delay }
    }
}

/// Randomizes a delay by up to ±`jitter_factor` of its length.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);

    Duration::from_secs_f64((duration.as_secs_f64() + jitter_offset).max(0.0))
}

/// Drainer policy: `2^attempts` seconds, dead-letter at `max_attempts`.
pub fn drain_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(24 * 60 * 60),
        jitter_factor: 0.0,
        backoff_strategy: BackoffStrategy::Exponential,
    }
}

/// Policy for records whose processing failed unexpectedly: a fixed delay,
/// still counted against the same attempt cap.
pub fn fault_policy(max_attempts: u32, delay: Duration) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: delay,
        max_delay: delay,
        jitter_factor: 0.0,
        backoff_strategy: BackoffStrategy::Fixed,
    }
}

/// Dispatcher policy: `retries` attempts separated by `backoff_base * n`.
pub fn dispatch_policy(retries: u32, backoff_base: Duration) -> RetryPolicy {
    RetryPolicy {
        max_attempts: retries,
        base_delay: backoff_base,
        max_delay: backoff_base.saturating_mul(retries.max(1)),
        jitter_factor: 0.0,
        backoff_strategy: BackoffStrategy::Linear,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_backoff_doubles_per_attempt() {
        let policy = drain_policy(5);

        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
    }

    #[test]
    fn drain_backoff_is_capped() {
        let policy = drain_policy(64);
        assert_eq!(policy.delay_for(40), Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn dispatch_backoff_is_linear() {
        let policy = dispatch_policy(4, Duration::from_millis(500));

        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1_500));
    }

    #[test]
    fn fault_backoff_is_fixed() {
        let policy = fault_policy(5, Duration::from_secs(30));

        assert_eq!(policy.delay_for(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(4), Duration::from_secs(30));
    }

    #[test]
    fn retry_context_schedules_below_cap() {
        let failed_at = Utc::now();
        let decision = RetryContext::new(2, failed_at, drain_policy(3)).decide_retry();

        assert_eq!(
            decision,
            RetryDecision::Retry { next_attempt_at: failed_at + chrono::Duration::seconds(4) }
        );
    }

    #[test]
    fn retry_context_gives_up_at_cap() {
        let decision = RetryContext::new(3, Utc::now(), drain_policy(3)).decide_retry();
        assert!(matches!(decision, RetryDecision::GiveUp { .. }));

        let decision =
            RetryContext::new(5, Utc::now(), fault_policy(5, Duration::from_secs(30)))
                .decide_retry();
        assert!(matches!(decision, RetryDecision::GiveUp { .. }));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy { jitter_factor: 0.25, ..drain_policy(10) };

        for _ in 0..100 {
            let delay = policy.delay_for(3);
            assert!(delay >= Duration::from_secs(6));
            assert!(delay <= Duration::from_secs(10));
        }
    }
}
