//! Reconnect backoff policy and attempt tracking
//!
//! Delays double from the base delay up to the maximum delay. The attempt
//! counter only resets once a connection has stayed up for the stable
//! duration, so a flapping link keeps backing off.

use std::time::Duration;
use tokio::time::Instant;

/// Configuration governing reconnect timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Connected time after which the attempt counter resets
    pub stable_after: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            stable_after: Duration::from_secs(20),
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt` (zero-based): base * 2^attempt,
    /// capped at the maximum delay
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Whether a session that lasted `uptime` qualifies as stable
    pub fn is_stable(&self, uptime: Duration) -> bool {
        uptime >= self.stable_after
    }
}

/// Attempt counter for one connection
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempts: u32,
    connected_since: Option<Instant>,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            connected_since: None,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Consecutive failed attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay to wait before the next attempt. Counts the attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Record that a session came up at `at`
    pub fn connected(&mut self, at: Instant) {
        self.connected_since = Some(at);
    }

    /// Record that the session went down at `at`.
    ///
    /// Returns true when the session had been stable long enough to reset the
    /// attempt counter.
    pub fn link_lost(&mut self, at: Instant) -> bool {
        let Some(since) = self.connected_since.take() else {
            return false;
        };
        if self.policy.is_stable(at.saturating_duration_since(since)) {
            self.attempts = 0;
            return true;
        }
        false
    }
}
