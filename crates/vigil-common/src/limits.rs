//! Small rolling-window rate limiter.
//!
//! Used by the registrar to bound re-registrations per instance id (§4.7:
//! up to `max_events` within any `window` rolling window; defaults 6 events
//! / 20 s, both profile-settable).

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub max_events: u32,
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        RateLimiterConfig {
            max_events: 6,
            window: Duration::from_secs(20),
        }
    }
}

/// Tracks event timestamps within a rolling window and reports whether the
/// next event would exceed the configured budget. Not thread-safe by
/// design — callers own it from a single task, matching the rest of the
/// core's single-active-key discipline.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    events: Vec<Instant>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        RateLimiter {
            config,
            events: Vec::new(),
        }
    }

    /// Records an attempt at `now` and returns `true` if it falls within the
    /// budget, `false` if the budget is exceeded. On `false`, the caller is
    /// expected to reset the limiter (`reset`) as part of handling the
    /// overflow (e.g. destroying and reallocating a ring).
    pub fn record(&mut self, now: Instant) -> bool {
        self.events.retain(|t| now.duration_since(*t) <= self.config.window);
        if self.events.len() as u32 >= self.config.max_events {
            return false;
        }
        self.events.push(now);
        true
    }

    pub fn reset(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_events_within_window() {
        let mut limiter = RateLimiter::new(RateLimiterConfig {
            max_events: 6,
            window: Duration::from_secs(20),
        });
        let start = Instant::now();

        for _ in 0..6 {
            assert!(limiter.record(start));
        }
        // The seventh attempt within the same instant exceeds the budget.
        assert!(!limiter.record(start));
    }

    #[test]
    fn reset_clears_the_window() {
        let mut limiter = RateLimiter::new(RateLimiterConfig {
            max_events: 1,
            window: Duration::from_secs(20),
        });
        let start = Instant::now();
        assert!(limiter.record(start));
        assert!(!limiter.record(start));
        limiter.reset();
        assert!(limiter.record(start));
    }

    #[test]
    fn events_outside_window_are_forgotten() {
        let mut limiter = RateLimiter::new(RateLimiterConfig {
            max_events: 1,
            window: Duration::from_millis(10),
        });
        let start = Instant::now();
        assert!(limiter.record(start));
        let later = start + Duration::from_millis(11);
        assert!(limiter.record(later));
    }
}
