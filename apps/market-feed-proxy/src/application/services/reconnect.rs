//! Reconnection Policy
//!
//! Exponential backoff with optional jitter for the stream connection
//! manager. Delays grow from `initial_delay` by `multiplier` per attempt and
//! never exceed `max_delay`. An optional attempt cap ends reconnection.

use std::time::Duration;

use rand::Rng;

/// Reconnection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt after a disconnect.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor per attempt (1.0 keeps the delay fixed).
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts allowed between successful opens (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// A fixed delay retried forever.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    /// Base delay (before jitter) for a 1-based attempt number.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let scaled = self.initial_delay.as_millis() as f64 * factor;
        #[allow(clippy::cast_precision_loss)]
        let cap = self.max_delay.as_millis() as f64;

        if !scaled.is_finite() || scaled >= cap {
            return self.max_delay;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(scaled.round() as u64)
    }
}

/// Tracks attempts since the last successful open.
///
/// # Example
///
/// ```rust
/// use market_feed_proxy::application::services::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(3)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(6)));
///
/// // A successful open starts over.
/// policy.reset();
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(3)));
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the cap is reached.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;
        Some(self.apply_jitter(self.config.base_delay(self.attempt_count)))
    }

    /// Start over after a successful open.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts handed out since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }

        #[allow(clippy::cast_precision_loss)]
        let base = delay.as_millis() as f64;
        let range = base * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-range..=range);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis((base + jitter).max(1.0) as u64)
    }
}
