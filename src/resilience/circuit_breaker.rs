//! Circuit breaker guarding the persistent panel channel.
//!
//! # States
//! - Unknown: never tried, or cooldown elapsed; the channel may be attempted
//! - Available: last channel exchange succeeded
//! - Unavailable: channel failed twice in a row; fallback only until cooldown
//!
//! # State Transitions
//! ```text
//! Unknown/Available → Available: exchange succeeded
//! Unknown/Available → Unavailable: exchange and its single retry failed
//! Unavailable → Unknown: next check after the cooldown has elapsed
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long the channel stays disabled after a failure.
pub const CHANNEL_COOLDOWN: Duration = Duration::from_secs(60);

/// Channel state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unknown = 0,
    Available = 1,
    Unavailable = 2,
}

impl From<u8> for ChannelState {
    fn from(val: u8) -> Self {
        match val {
            1 => ChannelState::Available,
            2 => ChannelState::Unavailable,
            _ => ChannelState::Unknown,
        }
    }
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Unknown => "unknown",
            ChannelState::Available => "available",
            ChannelState::Unavailable => "unavailable",
        }
    }
}

/// Fixed-cooldown breaker for one transport client.
#[derive(Debug)]
pub struct ChannelBreaker {
    state: AtomicU8,
    last_failure: Mutex<Option<Instant>>,
    cooldown: Duration,
}

impl ChannelBreaker {
    pub fn new() -> Self {
        Self::with_cooldown(CHANNEL_COOLDOWN)
    }

    pub fn with_cooldown(cooldown: Duration) -> Self {
        Self {
            state: AtomicU8::new(ChannelState::Unknown as u8),
            last_failure: Mutex::new(None),
            cooldown,
        }
    }

    /// Current state, without applying the cooldown.
    pub fn state(&self) -> ChannelState {
        ChannelState::from(self.state.load(Ordering::Acquire))
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Returns true if the channel should be attempted.
    ///
    /// A stale Unavailable state is reset to Unknown here.
    pub fn allows_attempt(&self) -> bool {
        if self.state() != ChannelState::Unavailable {
            return true;
        }

        let last_failure = *self
            .last_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match last_failure {
            Some(at) if at.elapsed() >= self.cooldown => {
                self.state
                    .store(ChannelState::Unknown as u8, Ordering::Release);
                tracing::debug!(
                    cooldown_secs = self.cooldown.as_secs(),
                    "Channel cooldown elapsed, will retry"
                );
                true
            }
            _ => false,
        }
    }

    pub fn mark_available(&self) {
        self.state
            .store(ChannelState::Available as u8, Ordering::Release);
    }

    pub fn mark_unavailable(&self) {
        *self
            .last_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Instant::now());
        let previous = self
            .state
            .swap(ChannelState::Unavailable as u8, Ordering::AcqRel);
        if ChannelState::from(previous) != ChannelState::Unavailable {
            tracing::warn!(
                cooldown_secs = self.cooldown.as_secs(),
                "Panel channel unavailable, using fallback transport"
            );
        }
    }
}

impl Default for ChannelBreaker {
    fn default() -> Self {
        Self::new()
    }
}
