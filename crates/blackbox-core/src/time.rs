//! Clock abstraction shared by the queue, the drainer and the enrichment
//! cache.
//!
//! Backoff eligibility, cache TTLs and token refills are all driven from a
//! `Clock` so tests can move time forward without sleeping.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};

/// Source of monotonic time, wall-clock time and sleeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant for elapsed-time measurements.
    fn now(&self) -> Instant;

    /// Returns the current wall-clock time.
    fn now_system(&self) -> SystemTime;

    /// Sleeps for the specified duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Returns the current wall-clock time as a UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }
}

/// Production clock backed by the operating system and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same underlying time, so a clock handed to a component
/// can be advanced from the test body. `sleep` advances time instantly and
/// yields once.
#[derive(Debug, Clone)]
pub struct TestClock {
    elapsed_ns: Arc<AtomicU64>,
    wall_ns: Arc<AtomicU64>,
    base_instant: Instant,
}

impl TestClock {
    /// Creates a test clock starting at the current wall-clock time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a test clock starting at a specific wall-clock time.
    pub fn with_start_time(start: SystemTime) -> Self {
        let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or_default();

        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            wall_ns: Arc::new(AtomicU64::new(saturating_nanos(since_epoch))),
            base_instant: Instant::now(),
        }
    }

    /// Advances monotonic and wall-clock time together.
    pub fn advance(&self, duration: Duration) {
        let step = saturating_nanos(duration);
        self.elapsed_ns.fetch_add(step, Ordering::AcqRel);
        self.wall_ns.fetch_add(step, Ordering::AcqRel);
    }

    /// Returns the total time advanced since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.wall_ns.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advancing_moves_both_clocks() {
        let start = UNIX_EPOCH + Duration::from_secs(1_000);
        let clock = TestClock::with_start_time(start);
        let instant = clock.now();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now().duration_since(instant), Duration::from_secs(90));
        assert_eq!(clock.now_system(), start + Duration::from_secs(90));
    }

    #[test]
    fn utc_view_tracks_system_time() {
        let clock = TestClock::with_start_time(UNIX_EPOCH + Duration::from_secs(60));
        assert_eq!(clock.now_utc().timestamp(), 60);

        clock.advance(Duration::from_secs(3_600));
        assert_eq!(clock.now_utc().timestamp(), 3_660);
    }

    #[test]
    fn clones_share_time() {
        let clock = TestClock::new();
        let handle = clock.clone();

        handle.advance(Duration::from_secs(5));

        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn sleep_advances_without_waiting() {
        let clock = TestClock::new();
        let wall_start = std::time::Instant::now();

        clock.sleep(Duration::from_secs(30)).await;

        assert_eq!(clock.elapsed(), Duration::from_secs(30));
        assert!(wall_start.elapsed() < Duration::from_secs(1));
    }
}
