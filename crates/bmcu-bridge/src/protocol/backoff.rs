//! Reconnect backoff
//!
//! The delay starts at one second, doubles on every failed open and is capped
//! at thirty seconds. Any successful open resets it.

use std::time::Duration;

use tokio::time::Instant;

/// Delay after a success
pub const BACKOFF_FLOOR: Duration = Duration::from_secs(1);
/// Longest delay between attempts
pub const BACKOFF_CEILING: Duration = Duration::from_secs(30);

/// Reconnect rate limiter
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    last_attempt: Option<Instant>,
    failures: u32,
}

impl Backoff {
    /// Starts at the floor with no attempt recorded
    pub fn new() -> Self {
        Self {
            delay: BACKOFF_FLOOR,
            last_attempt: None,
            failures: 0,
        }
    }

    /// Current wait between attempts
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Consecutive failures since the last success
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// True when enough time has passed since the previous attempt
    pub fn ready(&self, now: Instant) -> bool {
        match self.last_attempt {
            Some(at) => now.saturating_duration_since(at) >= self.delay,
            None => true,
        }
    }

    /// Stamp an attempt; call before trying to open
    pub fn begin_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }

    /// Double the delay, up to the ceiling
    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        self.delay = (self.delay * 2).min(BACKOFF_CEILING);
    }

    /// Back to the floor
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.delay = BACKOFF_FLOOR;
    }

    /// Time left before the next attempt is allowed
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last_attempt {
            Some(at) => self.delay.saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_up_to_ceiling() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.delay(), Duration::from_secs(1));

        for n in 1..=8u32 {
            backoff.record_failure();
            let expected = 2u64.pow(n).min(30);
            assert_eq!(backoff.delay(), Duration::from_secs(expected), "after {n} failures");
        }
        assert_eq!(backoff.failures(), 8);
    }

    #[test]
    fn test_success_resets() {
        let mut backoff = Backoff::new();
        backoff.record_failure();
        backoff.record_failure();
        backoff.record_success();
        assert_eq!(backoff.delay(), BACKOFF_FLOOR);
        assert_eq!(backoff.failures(), 0);
    }

    #[test]
    fn test_ready_respects_delay() {
        let start = Instant::now();
        let mut backoff = Backoff::new();
        assert!(backoff.ready(start));

        backoff.begin_attempt(start);
        backoff.record_failure();
        assert!(!backoff.ready(start + Duration::from_millis(1999)));
        assert_eq!(
            backoff.remaining(start + Duration::from_millis(500)),
            Duration::from_millis(1500)
        );
        assert!(backoff.ready(start + Duration::from_secs(2)));
    }
}
