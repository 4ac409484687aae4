//! Windowed rate trackers backing the newcomer-endpoint rate and the
//! restart-request rate (spec §3, §4.A, §4.H).

use std::time::{Duration, Instant};

use crate::clock::Clock;

/// Accumulates events within a sliding window and reports the total
/// still inside the window.
///
/// Kept intentionally simple (a bucket of timestamps, swept lazily on
/// read) rather than a ring-buffer histogram: windows here are short
/// (seconds to tens of seconds) and per-bridge event rates are low, so
/// a `Vec<Instant>` swept on access is the right tradeoff of simplicity
/// over throughput.
#[derive(Debug, Clone)]
pub struct RateTracker {
    window: Duration,
    events: Vec<Instant>,
}

impl RateTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            events: Vec::new(),
        }
    }

    /// Record one event at `now`.
    pub fn record(&mut self, now: Instant) {
        self.events.push(now);
        self.sweep(now);
    }

    /// Record `n` events at `now` (used when a single call represents
    /// several endpoints joining at once).
    pub fn record_n(&mut self, now: Instant, n: u32) {
        for _ in 0..n {
            self.events.push(now);
        }
        self.sweep(now);
    }

    /// Total events still within the window as of `now`.
    pub fn accumulated(&mut self, now: Instant) -> u32 {
        self.sweep(now);
        self.events.len() as u32
    }

    fn sweep(&mut self, now: Instant) {
        let window = self.window;
        self.events
            .retain(|t| now.saturating_duration_since(*t) < window);
    }
}

/// Convenience wrapper binding a [`RateTracker`] to an injected
/// [`Clock`], matching how `Bridge` reads time throughout §4.A.
pub fn accumulated_now(tracker: &mut RateTracker, clock: &dyn Clock) -> u32 {
    tracker.accumulated(clock.now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;

    #[test]
    fn events_expire_out_of_window() {
        let clock = TestClock::new();
        let mut tracker = RateTracker::new(Duration::from_secs(10));
        tracker.record(clock.now());
        assert_eq!(tracker.accumulated(clock.now()), 1);
        clock.advance(Duration::from_secs(11));
        assert_eq!(tracker.accumulated(clock.now()), 0);
    }

    #[test]
    fn record_n_counts_all_endpoints() {
        let clock = TestClock::new();
        let mut tracker = RateTracker::new(Duration::from_secs(10));
        tracker.record_n(clock.now(), 5);
        assert_eq!(tracker.accumulated(clock.now()), 5);
    }
}
