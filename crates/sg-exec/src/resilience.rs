use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_RETRY_COUNT: u32 = 6;
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 250;
pub const DEFAULT_BREAKER_FAILURE_COUNT: u32 = 20;
pub const DEFAULT_BREAKER_TEST_INTERVAL_MS: u64 = 5_000;

/// How the wait between retries grows with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffShape {
    /// `attempt * r`
    #[default]
    Linear,
    /// `(2 * attempt - 1) * r`
    Fibonacci,
    /// `attempt * (attempt + 1) / 2 * r`
    Cumulative,
    /// `2 * (attempt - 1) * r`
    Doubling,
    /// `r * 2^(attempt - 1)`
    Squaring,
}

/// One named resilience strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub retry_count: u32,
    pub retry_interval_ms: u64,
    pub backoff: BackoffShape,
    pub breaker_failure_count: u32,
    pub breaker_test_interval_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        ResilienceConfig {
            retry_count: DEFAULT_RETRY_COUNT,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            backoff: BackoffShape::Linear,
            breaker_failure_count: DEFAULT_BREAKER_FAILURE_COUNT,
            breaker_test_interval_ms: DEFAULT_BREAKER_TEST_INTERVAL_MS,
        }
    }
}

impl ResilienceConfig {
    /// Wait before retry number `attempt` (1-based). Attempt 0 waits zero.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let a = u64::from(attempt);
        let r = self.retry_interval_ms;
        let ms = match self.backoff {
            BackoffShape::Linear => a.saturating_mul(r),
            BackoffShape::Fibonacci => (2 * a - 1).saturating_mul(r),
            BackoffShape::Cumulative => (a * (a + 1) / 2).saturating_mul(r),
            BackoffShape::Doubling => (2 * (a - 1)).saturating_mul(r),
            BackoffShape::Squaring => 1u64
                .checked_shl(attempt - 1)
                .map(|factor| factor.saturating_mul(r))
                .unwrap_or(u64::MAX),
        };
        Duration::from_millis(ms)
    }

    pub fn breaker_test_interval(&self) -> Duration {
        Duration::from_millis(self.breaker_test_interval_ms)
    }
}

/// The built-in default strategy plus named strategies connections refer to
/// by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSection {
    pub default: ResilienceConfig,
    pub strategies: HashMap<String, ResilienceConfig>,
}

impl ResilienceSection {
    /// Strategy for `key`; the default when `key` is absent or unknown.
    pub fn resolve(&self, key: Option<&str>) -> ResilienceConfig {
        let Some(key) = key else {
            return self.default.clone();
        };
        match self.strategies.get(key) {
            Some(config) => config.clone(),
            None => {
                tracing::warn!(strategy = key, "resilience strategy not configured, using defaults");
                self.default.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays(shape: BackoffShape) -> Vec<u64> {
        let config = ResilienceConfig { backoff: shape, retry_interval_ms: 250, ..Default::default() };
        (1..=6).map(|a| config.backoff(a).as_millis() as u64).collect()
    }

    #[test]
    fn backoff_shapes_match_closed_forms() {
        assert_eq!(delays(BackoffShape::Linear), [250, 500, 750, 1000, 1250, 1500]);
        assert_eq!(delays(BackoffShape::Fibonacci), [250, 750, 1250, 1750, 2250, 2750]);
        assert_eq!(delays(BackoffShape::Cumulative), [250, 750, 1500, 2500, 3750, 5250]);
        assert_eq!(delays(BackoffShape::Doubling), [0, 500, 1000, 1500, 2000, 2500]);
        assert_eq!(delays(BackoffShape::Squaring), [250, 500, 1000, 2000, 4000, 8000]);
    }

    #[test]
    fn squaring_saturates_instead_of_overflowing() {
        let config = ResilienceConfig { backoff: BackoffShape::Squaring, ..Default::default() };
        assert_eq!(config.backoff(200), Duration::from_millis(u64::MAX));
        assert_eq!(config.backoff(0), Duration::ZERO);
    }

    #[test]
    fn defaults_match_builtin_strategy() {
        let config = ResilienceConfig::default();
        assert_eq!(config.retry_count, 6);
        assert_eq!(config.breaker_failure_count, 20);
        assert_eq!(config.breaker_test_interval(), Duration::from_millis(5_000));
    }

    #[test]
    fn resolve_falls_back_to_default() {
        let fast = ResilienceConfig { retry_count: 1, ..Default::default() };
        let section = ResilienceSection {
            default: ResilienceConfig::default(),
            strategies: HashMap::from([("fast".to_string(), fast.clone())]),
        };
        assert_eq!(section.resolve(Some("fast")), fast);
        assert_eq!(section.resolve(Some("missing")), ResilienceConfig::default());
        assert_eq!(section.resolve(None), ResilienceConfig::default());
    }
}
