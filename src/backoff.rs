//! Reconnection delay policy for the TCP socket writer.

use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Delays plateau here; ten minutes between attempts.
pub const DEFAULT_CEILING: Duration = Duration::from_secs(10 * 60);

/// Exponential backoff yielding `0, b, 2b, 4b, 8b, ...` capped at a
/// ceiling: the first attempt is immediate, subsequent attempts wait
/// increasingly long. `reset` restores the immediate first attempt after
/// a successful connection.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    ceiling: Duration,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        ExponentialBackoff {
            base,
            ceiling,
            current: Duration::ZERO,
        }
    }

    /// The delay to wait before the next connection attempt. Advances
    /// the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = if self.current.is_zero() {
            self.base.min(self.ceiling)
        } else {
            (self.current * 2).min(self.ceiling)
        };
        delay
    }

    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        ExponentialBackoff::new(DEFAULT_BASE_DELAY, DEFAULT_CEILING)
    }
}
