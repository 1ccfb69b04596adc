use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use validator::{Validate, ValidationError};

use super::circuit::CircuitBreakerConfig;
use super::classification::ErrorCategory;
use super::duration::secs;

/// Attempts kept in each key's attempt log.
pub const ATTEMPT_LOG_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Fixed,
    /// `base * attempt`
    Linear,
    /// `base * multiplier^(attempt - 1)`
    Exponential,
    /// Each delay is the sum of the previous two
    Fibonacci,
    /// Exponential plus a uniform random term bounded by the jitter factor
    JitteredExponential,
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffStrategy::Fixed => write!(f, "fixed"),
            BackoffStrategy::Linear => write!(f, "linear"),
            BackoffStrategy::Exponential => write!(f, "exponential"),
            BackoffStrategy::Fibonacci => write!(f, "fibonacci"),
            BackoffStrategy::JitteredExponential => write!(f, "jittered_exponential"),
        }
    }
}

/// Retry policy for one call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_retry_config"))]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[validate(range(min = 1))]
    pub max_attempts: u32,
    #[serde(with = "secs")]
    pub base_delay: Duration,
    #[serde(with = "secs")]
    pub max_delay: Duration,
    #[validate(range(min = 1.0))]
    pub multiplier: f64,
    pub backoff: BackoffStrategy,
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter_factor: f64,
    pub circuit_breaker_enabled: bool,
    #[validate(nested)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Adjust the policy from a key's recorded statistics
    pub adaptive: bool,
    /// Historical success rate below which attempts are reduced
    #[validate(range(min = 0.0, max = 1.0))]
    pub adaptive_success_threshold: f64,
    /// Recorded attempts required before adapting
    pub adaptive_min_samples: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            backoff: BackoffStrategy::Exponential,
            jitter_factor: 0.1,
            circuit_breaker_enabled: true,
            circuit_breaker: CircuitBreakerConfig::default(),
            adaptive: true,
            adaptive_success_threshold: 0.5,
            adaptive_min_samples: 10,
        }
    }
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ValidationError> {
    if config.base_delay > config.max_delay {
        return Err(ValidationError::new("base_delay_exceeds_max_delay"));
    }
    Ok(())
}

/// One entry of a key's attempt log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryAttempt {
    /// 1-based attempt number within its call
    pub attempt: u32,
    /// Delay slept after this attempt (zero when no retry followed)
    #[serde(with = "secs")]
    pub delay: Duration,
    pub success: bool,
    #[serde(with = "secs")]
    pub response_time: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated retry statistics for one operation key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryStats {
    pub operation: String,
    pub key: String,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub failed_attempts: u64,
    #[serde(with = "secs")]
    pub total_delay: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_category: Option<ErrorCategory>,
    pub recent_attempts: VecDeque<RetryAttempt>,
    pub last_updated: DateTime<Utc>,
}

impl RetryStats {
    pub fn new(operation: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            key: key.into(),
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            total_attempts: 0,
            successful_attempts: 0,
            failed_attempts: 0,
            total_delay: Duration::ZERO,
            last_error_category: None,
            recent_attempts: VecDeque::with_capacity(ATTEMPT_LOG_SIZE),
            last_updated: Utc::now(),
        }
    }

    pub fn record_attempt(&mut self, attempt: RetryAttempt) {
        self.total_attempts += 1;
        if attempt.success {
            self.successful_attempts += 1;
        } else {
            self.failed_attempts += 1;
            self.last_error_category = attempt.error_category;
        }
        self.total_delay += attempt.delay;
        self.last_updated = attempt.timestamp;

        if self.recent_attempts.len() >= ATTEMPT_LOG_SIZE {
            self.recent_attempts.pop_front();
        }
        self.recent_attempts.push_back(attempt);
    }

    pub fn record_call(&mut self, success: bool) {
        self.total_calls += 1;
        if success {
            self.successful_calls += 1;
        } else {
            self.failed_calls += 1;
        }
    }

    /// Attempt-level success rate; 1.0 before anything was recorded.
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            1.0
        } else {
            self.successful_attempts as f64 / self.total_attempts as f64
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.failed_attempts as f64 / self.total_attempts as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(number: u32, success: bool, delay_ms: u64) -> RetryAttempt {
        RetryAttempt {
            attempt: number,
            delay: Duration::from_millis(delay_ms),
            success,
            response_time: Duration::from_millis(5),
            error_category: if success { None } else { Some(ErrorCategory::Network) },
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_stats_rates() {
        let mut stats = RetryStats::new("llm.generate", "llm.generate:abc");
        assert_eq!(stats.success_rate(), 1.0);
        assert_eq!(stats.failure_rate(), 0.0);

        stats.record_attempt(attempt(1, false, 100));
        stats.record_attempt(attempt(2, false, 200));
        stats.record_attempt(attempt(3, true, 0));
        stats.record_call(true);

        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.failed_attempts, 2);
        assert_eq!(stats.total_delay, Duration::from_millis(300));
        assert_eq!(stats.last_error_category, Some(ErrorCategory::Network));
        assert!((stats.success_rate() - 1.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.successful_calls, 1);
    }

    #[test]
    fn test_attempt_log_is_bounded() {
        let mut stats = RetryStats::new("op", "op:1");
        for i in 0..(ATTEMPT_LOG_SIZE as u32 + 5) {
            stats.record_attempt(attempt(i, true, 0));
        }
        assert_eq!(stats.recent_attempts.len(), ATTEMPT_LOG_SIZE);
        assert_eq!(stats.total_attempts, ATTEMPT_LOG_SIZE as u64 + 5);
    }

    #[test]
    fn test_retry_config_validation() {
        assert!(RetryConfig::default().validate().is_ok());

        let inverted = RetryConfig {
            base_delay: Duration::from_secs(120),
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let zero_attempts = RetryConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(zero_attempts.validate().is_err());
    }
}
