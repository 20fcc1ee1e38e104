//! Reconnect policy: a bounded attempt count and the delay before each attempt.
//!
//! The policy is pure math; the connection task owns the timer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default number of reconnect attempts after an unexpected drop.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Default fixed delay between reconnect attempts in milliseconds.
pub const DEFAULT_DELAY_MS: u64 = 3000;

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// Delay strategy between successive reconnect attempts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Backoff {
    /// Same delay before every attempt.
    #[serde(rename_all = "camelCase")]
    Fixed {
        /// Delay in milliseconds.
        delay_ms: u64,
    },
    /// `base * 2^(attempt - 1)`, capped at `max_delay_ms`.
    #[serde(rename_all = "camelCase")]
    Exponential {
        /// Delay before the first attempt in milliseconds.
        base_delay_ms: u64,
        /// Upper bound in milliseconds.
        max_delay_ms: u64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Fixed {
            delay_ms: DEFAULT_DELAY_MS,
        }
    }
}

impl Backoff {
    /// Delay before 1-based `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Exponential {
                base_delay_ms,
                max_delay_ms,
            } => {
                let exponent = attempt.saturating_sub(1).min(31);
                let exponential = base_delay_ms.saturating_mul(1u64 << exponent);
                Duration::from_millis(exponential.min(max_delay_ms))
            }
        }
    }
}

/// Bounded reconnect policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    /// Attempts made after an unexpected drop before giving up (0 = never retry).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay strategy.
    #[serde(default)]
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never reconnects.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            backoff: Backoff::default(),
        }
    }

    /// Delay before 1-based `attempt`, or `None` once attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.backoff.delay(attempt))
    }
}
