//! Retry policy configuration.
//!
//! Two independent retry layers exist:
//! - [`CompletionRetryConfig`]: attempts per provider call, `unit * 2^i` backoff
//! - [`RetryPolicyConfig`]: regeneration rounds after a rejected reply,
//!   `min(base * multiplier^(round - 1), max)` between rounds

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors in settings or policy values.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Regeneration strategy used after a rejected reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// One regeneration, evaluated once.
    Single,
    /// Same loop as `Progressive`.
    Multiple,
    /// Up to `max_attempts` rounds, each seeded with the latest feedback.
    #[default]
    Progressive,
    /// N sibling candidates from the original feedback, first acceptable wins.
    BestOfN,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Single,
        StrategyKind::Multiple,
        StrategyKind::Progressive,
        StrategyKind::BestOfN,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Single => "single",
            StrategyKind::Multiple => "multiple",
            StrategyKind::Progressive => "progressive",
            StrategyKind::BestOfN => "best_of_n",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                ConfigError::invalid(
                    "strategy",
                    format!("unknown strategy '{}', expected one of single, multiple, progressive, best_of_n", s),
                )
            })
    }
}

/// Regeneration round policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    /// Maximum regeneration rounds per session.
    pub max_attempts: u32,

    /// Delay after the first rejected round.
    #[serde(with = "crate::durations")]
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    #[serde(with = "crate::durations")]
    pub max_delay: Duration,

    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.base_delay.is_zero() {
            return Err(ConfigError::invalid("retry.base_delay", "must be positive"));
        }
        if self.max_delay.is_zero() {
            return Err(ConfigError::invalid("retry.max_delay", "must be positive"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid(
                "retry.max_delay",
                "must not be shorter than retry.base_delay",
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 0.0 {
            return Err(ConfigError::invalid(
                "retry.backoff_multiplier",
                format!("must be a positive number, got {}", self.backoff_multiplier),
            ));
        }
        Ok(())
    }

    /// Delay to wait after round `round` (1-based) before the next one.
    pub fn delay_for_round(&self, round: u32) -> Duration {
        let exponent = i32::try_from(round.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped)
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    /// Apply a partial update, returning the new validated config.
    pub fn updated(&self, update: &RetryPolicyUpdate) -> Result<Self, ConfigError> {
        let next = Self {
            max_attempts: update.max_attempts.unwrap_or(self.max_attempts),
            base_delay: update.base_delay.unwrap_or(self.base_delay),
            max_delay: update.max_delay.unwrap_or(self.max_delay),
            backoff_multiplier: update.backoff_multiplier.unwrap_or(self.backoff_multiplier),
        };
        next.validate()?;
        Ok(next)
    }
}

/// Partial update of a [`RetryPolicyConfig`]; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryPolicyUpdate {
    pub max_attempts: Option<u32>,
    pub base_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub backoff_multiplier: Option<f64>,
}

impl RetryPolicyUpdate {
    pub fn max_attempts(mut self, value: u32) -> Self {
        self.max_attempts = Some(value);
        self
    }

    pub fn base_delay(mut self, value: Duration) -> Self {
        self.base_delay = Some(value);
        self
    }

    pub fn max_delay(mut self, value: Duration) -> Self {
        self.max_delay = Some(value);
        self
    }

    pub fn backoff_multiplier(mut self, value: f64) -> Self {
        self.backoff_multiplier = Some(value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Per-call provider retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionRetryConfig {
    /// Provider attempts per completion call.
    pub max_attempts: u32,

    /// Time unit of the `2^attempt_index` backoff.
    #[serde(with = "crate::durations")]
    pub backoff_unit: Duration,
}

impl Default for CompletionRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl CompletionRetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("completion.max_attempts", "must be at least 1"));
        }
        if self.backoff_unit.is_zero() {
            return Err(ConfigError::invalid("completion.backoff_unit", "must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RetryPolicyConfig::default().validate().is_ok());
        assert!(CompletionRetryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_delay_schedule() {
        let policy = RetryPolicyConfig::default();
        assert_eq!(policy.delay_for_round(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_round(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_round(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_round(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for_round(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for_round(200), Duration::from_secs(10));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let policy = RetryPolicyConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(ConfigError::Invalid { field: "retry.max_attempts", .. })
        ));
    }

    #[test]
    fn test_rejects_max_below_base() {
        let policy = RetryPolicyConfig {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_multiplier() {
        for multiplier in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let policy = RetryPolicyConfig {
                backoff_multiplier: multiplier,
                ..Default::default()
            };
            assert!(policy.validate().is_err(), "accepted {}", multiplier);
        }
    }

    #[test]
    fn test_partial_update() {
        let policy = RetryPolicyConfig::default();
        let next = policy
            .updated(&RetryPolicyUpdate::default().max_attempts(5))
            .unwrap();
        assert_eq!(next.max_attempts, 5);
        assert_eq!(next.base_delay, policy.base_delay);
    }

    #[test]
    fn test_invalid_update_rejected() {
        let policy = RetryPolicyConfig::default();
        let update = RetryPolicyUpdate::default().max_delay(Duration::from_millis(10));
        assert!(policy.updated(&update).is_err());
    }

    #[test]
    fn test_yaml_with_humantime() {
        let yaml = "max_attempts: 2\nbase_delay: 500ms\n";
        let policy: RetryPolicyConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("progressive".parse::<StrategyKind>().unwrap(), StrategyKind::Progressive);
        assert_eq!("Best-Of-N".parse::<StrategyKind>().unwrap(), StrategyKind::BestOfN);
        assert!("random".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_strategy_serde_names() {
        let yaml = serde_yaml::to_string(&StrategyKind::BestOfN).unwrap();
        assert_eq!(yaml.trim(), "best_of_n");
    }

    proptest! {
        #[test]
        fn prop_delay_never_exceeds_cap(
            base_ms in 1u64..5_000,
            extra_ms in 0u64..60_000,
            multiplier in 0.1f64..10.0,
            round in 1u32..1_000,
        ) {
            let policy = RetryPolicyConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(base_ms + extra_ms),
                backoff_multiplier: multiplier,
            };
            prop_assert!(policy.delay_for_round(round) <= policy.max_delay);
        }

        #[test]
        fn prop_delay_non_decreasing_when_growing(
            base_ms in 1u64..5_000,
            multiplier in 1.0f64..4.0,
            round in 1u32..100,
        ) {
            let policy = RetryPolicyConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_secs(120),
                backoff_multiplier: multiplier,
            };
            prop_assert!(policy.delay_for_round(round) <= policy.delay_for_round(round + 1));
        }
    }
}
