//! Backoff policies.
//!
//! - `calculate_backoff`: exponential with jitter, used between fallback attempts
//! - `RestartBackoff`: deterministic capped doubling for node controller restarts

use rand::Rng;
use std::time::Duration;

/// First delay before restarting a failed node controller.
pub const RESTART_INITIAL_DELAY: Duration = Duration::from_secs(10);
/// Restart delays never exceed this.
pub const RESTART_MAX_DELAY: Duration = Duration::from_secs(60);

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Capped-doubling delay sequence: 10s, 20s, 40s, 60s, 60s, ...
#[derive(Debug, Clone)]
pub struct RestartBackoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl RestartBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            initial,
            max,
        }
    }

    /// Returns the delay to wait now and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        if self.current < self.max {
            self.current = self.current.saturating_mul(2).min(self.max);
        }
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for RestartBackoff {
    fn default() -> Self {
        Self::new(RESTART_INITIAL_DELAY, RESTART_MAX_DELAY)
    }
}
