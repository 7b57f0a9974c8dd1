//! Retry policy shared between the engine and whoever tunes it at runtime.

use std::sync::Arc;
use std::time::Duration;

use doppel_core::{ConfigError, RetryPolicyConfig, RetryPolicyUpdate};
use parking_lot::RwLock;

/// Process-wide retry policy, updatable between turns.
///
/// Clones share the same config. Sessions read it when they start (round
/// count) and again at every delay computation, so an update affects rounds
/// that read it afterwards.
#[derive(Debug, Clone, Default)]
pub struct SharedRetryPolicy {
    inner: Arc<RwLock<RetryPolicyConfig>>,
}

impl SharedRetryPolicy {
    pub fn new(config: RetryPolicyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(config)),
        })
    }

    pub fn snapshot(&self) -> RetryPolicyConfig {
        self.inner.read().clone()
    }

    pub fn max_attempts(&self) -> u32 {
        self.inner.read().max_attempts
    }

    pub fn delay_for_round(&self, round: u32) -> Duration {
        self.inner.read().delay_for_round(round)
    }

    /// Apply a partial update. An invalid update changes nothing.
    pub fn update(&self, update: &RetryPolicyUpdate) -> Result<RetryPolicyConfig, ConfigError> {
        let mut config = self.inner.write();
        let next = config.updated(update)?;
        tracing::debug!(
            max_attempts = next.max_attempts,
            base_delay_ms = next.base_delay.as_millis() as u64,
            max_delay_ms = next.max_delay.as_millis() as u64,
            backoff_multiplier = next.backoff_multiplier,
            "Retry policy updated"
        );
        *config = next.clone();
        Ok(next)
    }

    /// Replace the whole config.
    pub fn replace(&self, config: RetryPolicyConfig) -> Result<(), ConfigError> {
        config.validate()?;
        *self.inner.write() = config;
        Ok(())
    }
}
