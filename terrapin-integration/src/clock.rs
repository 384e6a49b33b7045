use chrono::{DateTime, TimeDelta, Utc};
use std::{
    fmt::Debug,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

/// Defines how a component determines the current time.
///
/// Components take a [`SharedClock`] so production code runs on [`LiveClock`]
/// while tests inject a [`MockClock`] and advance it explicitly.
pub trait Clock: Debug {
    /// Wall-clock instant, for persistence and interop.
    fn now(&self) -> DateTime<Utc>;

    /// Monotonic duration since an arbitrary fixed origin, for TTLs and
    /// rate-limiter windows. Never goes backwards.
    fn monotonic(&self) -> Duration;
}

/// Convenient alias for a clock shared across components.
pub type SharedClock = Arc<dyn Clock + Send + Sync>;

/// Live `Clock` backed by `Utc::now()` and a process-wide [`Instant`] origin.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct LiveClock;

impl LiveClock {
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

fn process_origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

impl Clock for LiveClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Duration {
        process_origin().elapsed()
    }
}

/// Settable `Clock` for deterministic tests.
///
/// `advance` moves both the wall and monotonic surfaces forward together, so
/// TTL and timestamp behaviour stay consistent.
#[derive(Debug, Clone)]
pub struct MockClock {
    inner: Arc<parking_lot::RwLock<MockClockInner>>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct MockClockInner {
    now: DateTime<Utc>,
    monotonic: Duration,
}

impl MockClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(parking_lot::RwLock::new(MockClockInner {
                now,
                monotonic: Duration::ZERO,
            })),
        }
    }

    pub fn shared(now: DateTime<Utc>) -> (SharedClock, Self) {
        let clock = Self::new(now);
        (Arc::new(clock.clone()), clock)
    }

    pub fn advance(&self, duration: Duration) {
        let mut lock = self.inner.write();
        lock.monotonic += duration;
        lock.now += TimeDelta::from_std(duration).unwrap_or(TimeDelta::zero());
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.inner.write().now = now;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        self.inner.read().now
    }

    fn monotonic(&self) -> Duration {
        self.inner.read().monotonic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_clock_monotonic_never_decreases() {
        let clock = LiveClock;
        let first = clock.monotonic();
        let second = clock.monotonic();
        assert!(second >= first);
    }

    #[test]
    fn test_mock_clock_advance_moves_both_surfaces() {
        let start = DateTime::<Utc>::MIN_UTC;
        let clock = MockClock::new(start);

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.monotonic(), Duration::from_secs(90));
        assert_eq!(clock.now(), start + TimeDelta::seconds(90));
    }
}
