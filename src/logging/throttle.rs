//! Rate-limited logging utilities.
//!
//! Provides `LogThrottle` to prevent log storms while still tracking suppressed messages.

use std::time::{Duration, Instant};

/// A lightweight rate limiter for logging to prevent log storms.
#[derive(Debug)]
pub struct LogThrottle {
    last_log_time: Option<Instant>,
    suppressed_count: u64,
    interval: Duration,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_log_time: None,
            suppressed_count: 0,
            interval,
        }
    }

    /// Checks if a log should be emitted.
    /// Returns true if the interval has passed since the last log.
    /// If false, increments the suppressed counter.
    pub fn should_log(&mut self) -> bool {
        self.should_log_at(Instant::now())
    }

    fn should_log_at(&mut self, now: Instant) -> bool {
        match self.last_log_time {
            Some(last) if now.duration_since(last) < self.interval => {
                self.suppressed_count += 1;
                false
            }
            _ => {
                self.last_log_time = Some(now);
                true
            }
        }
    }

    /// Returns the number of suppressed logs since the last successful log, and resets the counter.
    pub fn get_and_reset_suppressed_count(&mut self) -> u64 {
        std::mem::take(&mut self.suppressed_count)
    }
}

/// Throttlers for the warnings a pair worker can emit on every tick.
#[derive(Debug)]
pub struct PairLogThrottler {
    /// Unmatched or out-of-order leg ticks
    pub data_gap: LogThrottle,
    /// Kalman update rejected
    pub degraded: LogThrottle,
    /// Entry rejected by risk or failed at the venue
    pub rejection: LogThrottle,
}

impl PairLogThrottler {
    pub fn new(interval_secs: u64) -> Self {
        let interval = Duration::from_secs(interval_secs);
        Self {
            data_gap: LogThrottle::new(interval),
            degraded: LogThrottle::new(interval),
            rejection: LogThrottle::new(interval),
        }
    }
}
