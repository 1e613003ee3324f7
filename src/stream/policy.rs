//! Reconnect policies.

use std::time::Duration;

use crate::config::Config;

// == Reconnect Policy Trait ==
/// Decides how long to wait before reconnect attempt `attempt` (0-indexed).
///
/// Delays must be non-decreasing in `attempt`. Returning None gives up.
pub trait ReconnectPolicy: Send + Sync + 'static {
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

// == Fixed Delay ==
/// Same delay every time, optionally for a bounded number of attempts.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl ReconnectPolicy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay),
        }
    }
}

// == Exponential Backoff ==
/// `base * factor^attempt`, capped at `ceiling`. No jitter, so the
/// sequence stays monotonic.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub ceiling: Duration,
    pub factor: u32,
    pub max_attempts: Option<u32>,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
            factor: 2,
            max_attempts: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.reconnect_max_attempts,
            ..Self::new(config.reconnect_base_delay, config.reconnect_ceiling_delay)
        }
    }

    pub fn with_factor(mut self, factor: u32) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        if self.factor <= 1 || self.base.is_zero() {
            return self.base.min(self.ceiling);
        }

        let mut delay = self.base;
        for _ in 0..attempt {
            if delay >= self.ceiling {
                break;
            }
            delay = delay.saturating_mul(self.factor);
        }
        delay.min(self.ceiling)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay_for(attempt)),
        }
    }
}
