//! Reconnect backoff shared by the upstream adapters.
//!
//! Delays grow exponentially up to a cap, with a jitter band so adapters
//! restarted together do not reconnect in lockstep. Adapters call
//! [`ExponentialBackoff::reset`] after a healthy stretch so the next
//! failure starts from the initial delay again.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Jitter band as a fraction of the computed delay (0.0 disables it).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

pub struct ExponentialBackoff {
    config: BackoffConfig,
    current: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        let current = config.initial_delay;
        Self {
            config,
            current,
            attempt: 0,
        }
    }

    /// The delay to wait before the next reconnect attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let base = (self.current.as_millis() as f64 * self.config.multiplier)
            .min(self.config.max_delay.as_millis() as f64);

        let millis = if self.config.jitter_factor > 0.0 {
            let band = base * self.config.jitter_factor;
            (base + rand::rng().random_range(-band..band)).max(1.0)
        } else {
            base.max(1.0)
        };

        self.current = Duration::from_millis(millis as u64);
        self.current
    }

    /// Start over from the initial delay after a healthy stretch.
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
