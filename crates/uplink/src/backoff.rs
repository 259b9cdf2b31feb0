//! Exponential reconnect backoff with jitter.
//!
//! The delay after the `n`-th consecutive failure (0-based) is
//! `min(base * 2^n, max)` scaled by a random factor in `[1 - jitter, 1 + jitter]`.
//! The result is clamped to `[previous delay, max]` so that delays never
//! shrink between consecutive failures and never exceed the cap. A success
//! resets everything.
//!
//! Deadlines are measured with [`tokio::time::Instant`], which is monotonic.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::types::ReconnectConfig;

/// Tracks consecutive connect failures and when the next attempt is allowed.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
    last_delay: Duration,
    retry_at: Option<Instant>,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt: 0,
            last_delay: Duration::ZERO,
            retry_at: None,
        }
    }

    /// Number of consecutive failures since the last success.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Un-jittered delay for the given 0-based attempt.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(62) as i32;
        let secs = self.config.base_delay.as_secs_f64() * 2f64.powi(exp);
        let max = self.config.max_delay.as_secs_f64();
        if !secs.is_finite() || secs > max {
            self.config.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Records a failed attempt and returns how long to wait before the next one.
    pub fn fail(&mut self) -> Duration {
        let base = self.base_delay(self.attempt).as_secs_f64();
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            1.0
        };
        let delay = Duration::from_secs_f64((base * factor).max(0.0))
            .max(self.last_delay)
            .min(self.config.max_delay);

        self.attempt = self.attempt.saturating_add(1);
        self.last_delay = delay;
        self.retry_at = Some(Instant::now() + delay);
        delay
    }

    /// Forgets all failures after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last_delay = Duration::ZERO;
        self.retry_at = None;
    }

    /// Time left before the next attempt is allowed, if any.
    pub fn remaining(&self) -> Option<Duration> {
        let retry_at = self.retry_at?;
        let left = retry_at.saturating_duration_since(Instant::now());
        (!left.is_zero()).then_some(left)
    }
}
