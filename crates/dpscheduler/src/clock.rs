//! Cached monotonic millisecond clock.
//!
//! The delay queues sort their entries by comparing each task's remaining
//! delay, which is derived from "now". Re-reading the OS clock for every
//! comparison made while repositioning an entry can make that comparator
//! inconsistent, because real time keeps advancing between reads. [`Clock`]
//! caches the last observed time and lets a caller freeze it for the
//! duration of an operation that needs a single, stable notion of "now".

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// A monotonic clock, measured in milliseconds since the clock was created.
pub(crate) struct Clock {
    epoch: Instant,
    cached_ms: AtomicU64,
    suspended: AtomicBool,
}

impl Clock {
    pub(crate) fn new() -> Self {
        Self {
            epoch: Instant::now(),
            cached_ms: AtomicU64::new(0),
            suspended: AtomicBool::new(false),
        }
    }

    /// The last value this clock observed from the OS, without refreshing it.
    pub(crate) fn last_known_time(&self) -> u64 {
        self.cached_ms.load(Ordering::Acquire)
    }

    /// The current time. Refreshes the cache unless a caller has suspended
    /// forced updates with [`Clock::stop_forcing_update`].
    pub(crate) fn accurate_time(&self) -> u64 {
        if self.suspended.load(Ordering::Acquire) {
            self.cached_ms.load(Ordering::Acquire)
        } else {
            self.update_clock()
        }
    }

    /// Reads the OS clock and stores the result as the cached value,
    /// regardless of suspension state. Returns the value it stored.
    pub(crate) fn update_clock(&self) -> u64 {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.cached_ms.store(now, Ordering::Release);
        now
    }

    /// Freezes the cached value so [`Clock::accurate_time`] stops refreshing
    /// it until [`Clock::resume_forcing_update`] is called. Pair with an
    /// explicit [`Clock::update_clock`] to establish the frozen "now".
    pub(crate) fn stop_forcing_update(&self) {
        self.suspended.store(true, Ordering::Release);
    }

    pub(crate) fn resume_forcing_update(&self) {
        self.suspended.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accurate_time_advances() {
        let clock = Clock::new();
        let first = clock.accurate_time();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = clock.accurate_time();
        assert!(second >= first);
    }

    #[test]
    fn suspension_freezes_cached_value() {
        let clock = Clock::new();
        clock.update_clock();
        clock.stop_forcing_update();
        let frozen = clock.accurate_time();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(clock.accurate_time(), frozen);
        clock.resume_forcing_update();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(clock.accurate_time() >= frozen);
    }

    #[test]
    fn last_known_time_does_not_refresh() {
        let clock = Clock::new();
        clock.update_clock();
        let cached = clock.last_known_time();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(clock.last_known_time(), cached);
    }
}
