//! Injectable clock (spec §6.4).
//!
//! Sticky-failure and rate-tracker windows (§3, §4.A, §4.H) are all
//! expressed in terms of "now minus some instant"; tests need to move
//! time forward deterministically rather than sleeping real wall-clock
//! seconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A source of "now", injectable so tests can control time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Production clock: delegates to `std::time::Instant::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Test clock: starts at construction time and advances only when told
/// to. Stored as an offset in milliseconds from an anchor `Instant` so
/// it can be shared behind an `Arc` and advanced from another thread.
pub struct TestClock {
    anchor: Instant,
    offset_ms: AtomicU64,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    /// Move the clock forward by `d`.
    pub fn advance(&self, d: Duration) {
        self.offset_ms
            .fetch_add(d.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.anchor + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_monotonically() {
        let clock = TestClock::new();
        let t0 = clock.now();
        clock.advance(Duration::from_secs(5));
        let t1 = clock.now();
        assert_eq!(t1 - t0, Duration::from_secs(5));
    }
}
