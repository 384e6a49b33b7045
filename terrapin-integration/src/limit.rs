use crate::clock::SharedClock;
use parking_lot::Mutex;
use std::time::Duration;

/// Token bucket refilled to capacity at the start of each window.
///
/// Broker adapters run one bucket per venue (`rate_limit_per_minute`); the
/// streaming hub runs one per connection (messages per second). `try_acquire`
/// never blocks: callers decide whether exhaustion means an error
/// (`RateLimit`) or a dropped message.
#[derive(Debug)]
pub struct TokenBucket {
    clock: SharedClock,
    capacity: u32,
    window: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct BucketState {
    tokens: u32,
    window_start: Duration,
}

impl TokenBucket {
    pub fn new(clock: SharedClock, capacity: u32, window: Duration) -> Self {
        let window_start = clock.monotonic();
        Self {
            clock,
            capacity,
            window,
            state: Mutex::new(BucketState {
                tokens: capacity,
                window_start,
            }),
        }
    }

    /// Bucket refilled once per minute, the broker adapter default.
    pub fn per_minute(clock: SharedClock, capacity: u32) -> Self {
        Self::new(clock, capacity, Duration::from_secs(60))
    }

    /// Bucket refilled once per second, the hub fan-out default.
    pub fn per_second(clock: SharedClock, capacity: u32) -> Self {
        Self::new(clock, capacity, Duration::from_secs(1))
    }

    /// Take one token. Returns false when the window's budget is exhausted.
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.monotonic();
        let mut state = self.state.lock();

        if now.saturating_sub(state.window_start) >= self.window {
            state.tokens = self.capacity;
            state.window_start = now;
        }

        if state.tokens == 0 {
            return false;
        }

        state.tokens -= 1;
        true
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Tokens remaining in the current window, without refilling.
    pub fn remaining(&self) -> u32 {
        self.state.lock().tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::Utc;

    #[test]
    fn test_bucket_exhausts_then_refills_on_window() {
        let (clock, handle) = MockClock::shared(Utc::now());
        let bucket = TokenBucket::per_minute(clock, 2);

        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire(), "budget exhausted within window");

        handle.advance(Duration::from_secs(60));
        assert!(bucket.try_acquire(), "window elapsed, bucket refilled");
    }

    #[test]
    fn test_partial_window_does_not_refill() {
        let (clock, handle) = MockClock::shared(Utc::now());
        let bucket = TokenBucket::per_minute(clock, 1);

        assert!(bucket.try_acquire());
        handle.advance(Duration::from_secs(59));
        assert!(!bucket.try_acquire());
    }
}
